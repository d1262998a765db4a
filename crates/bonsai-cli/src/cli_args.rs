use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "bai",
    about = "Branching conversation tree: seed, grow, prune and graft conversation turns",
    version
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "BONSAI_DB",
        help = "SQLite database path. Defaults to ~/.bonsai/bonsai.db"
    )]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Clone, Subcommand)]
pub enum CliCommand {
    /// Start a new conversation root and make it current.
    Seed {
        content: String,
        #[arg(long = "llm", help = "Model label stored on the root")]
        model: Option<String>,
    },
    /// Add a user turn under the current node.
    Say {
        message: String,
        #[arg(
            long = "llm",
            help = "Model label; inherited from the current node when omitted"
        )]
        model: Option<String>,
    },
    /// Record an assistant reply under the current node or --parent.
    Reply {
        content: String,
        #[arg(long, help = "Model that produced the reply")]
        model: String,
        #[arg(long, help = "Parent node id; defaults to the current node")]
        parent: Option<String>,
    },
    /// Move the current pointer to an existing node.
    Checkout { id: String },
    /// Show the current node.
    Current,
    /// Show ancestors of the current node, nearest first.
    Log {
        #[arg(
            long,
            default_value_t = 1,
            allow_negative_numbers = true,
            help = "Number of ancestor levels to show; values below 1 show one level"
        )]
        up: i64,
        #[arg(long, conflicts_with = "up", help = "Walk all the way to the root")]
        all: bool,
    },
    /// Show the conversation from its root down to the current node.
    History,
    /// List direct children of the current node.
    Offshoots,
    /// List conversation roots.
    Seeds,
    /// Delete a node and everything below it.
    Prune {
        id: String,
        #[arg(long, short = 'y', help = "Skip the confirmation prompt")]
        yes: bool,
    },
    /// Copy a node under the current node.
    CherryPick { id: String },
    /// Export the forest as nested JSON.
    Tree {
        #[arg(long, help = "Write JSON to this file instead of stdout")]
        output: Option<PathBuf>,
    },
    /// Check for dangling parent links and parent cycles.
    Validate,
}
