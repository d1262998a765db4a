use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

const BONSAI_DIR_NAME: &str = ".bonsai";
const BONSAI_DB_FILE_NAME: &str = "bonsai.db";

pub fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

/// `--db`/`BONSAI_DB` when set, otherwise `~/.bonsai/bonsai.db`.
pub fn resolve_db_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit.filter(|path| !path.as_os_str().is_empty()) {
        return Ok(path);
    }
    let home = dirs::home_dir().context("could not determine home directory for database")?;
    Ok(home.join(BONSAI_DIR_NAME).join(BONSAI_DB_FILE_NAME))
}
