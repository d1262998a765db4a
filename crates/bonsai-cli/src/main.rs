use anyhow::Result;
use bonsai_cli::{init_tracing, run_cli, Cli};
use clap::Parser;

fn main() -> Result<()> {
    init_tracing();
    run_cli(Cli::parse())
}
