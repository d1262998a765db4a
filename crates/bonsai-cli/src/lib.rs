//! `bai`: command-line front end for the bonsai conversation tree.

mod bootstrap;
mod cli_args;
mod commands;
mod tree_view;

use std::io;

use anyhow::{Context, Result};
use bonsai_tree::{SqliteTreeBackend, TreeStore};
use tracing::debug;

pub use bootstrap::{init_tracing, resolve_db_path};
pub use cli_args::{Cli, CliCommand};
pub use commands::{content_preview, execute_command};
pub use tree_view::{
    build_tree_view, export_tree_json, render_tree_json, TreeView, TreeViewNode,
};

/// Opens the database, runs one command against stdin/stdout, then closes the
/// connection so close failures are reported.
pub fn run_cli(cli: Cli) -> Result<()> {
    let db_path = resolve_db_path(cli.db)?;
    debug!(path = %db_path.display(), "opening tree database");
    let backend = SqliteTreeBackend::open(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.display()))?;
    let store = TreeStore::new(backend);

    let stdin = io::stdin();
    let stdout = io::stdout();
    let result = execute_command(&store, cli.command, &mut stdin.lock(), &mut stdout.lock());
    let closed = store
        .into_backend()
        .close()
        .with_context(|| format!("failed to close database {}", db_path.display()));
    result.and(closed)
}
