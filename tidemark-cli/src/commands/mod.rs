//! CLI command implementations.

pub mod migrate;
pub mod seed;
pub mod version;

use std::path::{Path, PathBuf};

use tidemark_migrate::{CancellationToken, MigrationConfig};
use tidemark_postgres::{PgConfig, PgConnection};
use tracing::info;

use crate::config::Config;
use crate::error::CliResult;

/// Everything a command needs besides its own arguments.
#[derive(Debug)]
pub struct Context {
    /// Loaded configuration.
    pub config: Config,
    /// Directory relative paths in the configuration resolve against.
    pub base_dir: PathBuf,
    /// `--db-url` / `TIDEMARK_DB_URL`.
    pub db_url: Option<String>,
    /// Cancelled on Ctrl-C.
    pub cancel: CancellationToken,
}

impl Context {
    /// Load the configuration at `config_path`.
    pub fn load(
        config_path: &Path,
        db_url: Option<String>,
        cancel: CancellationToken,
    ) -> CliResult<Self> {
        let config = Config::load_or_default(config_path)?;
        let base_dir = match config_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Ok(Self {
            config,
            base_dir,
            db_url,
            cancel,
        })
    }

    /// Engine configuration derived from the file.
    pub fn engine_config(&self) -> MigrationConfig {
        self.config.engine_config(&self.base_dir)
    }

    /// Open the database session.
    pub async fn connect(&self) -> CliResult<PgConnection> {
        let url = self.config.database_url(self.db_url.as_deref())?;
        let pg_config = PgConfig::from_url(&url)?;
        info!(url = %pg_config.redacted_url(), "Connecting");
        Ok(PgConnection::connect(&pg_config).await?)
    }
}
