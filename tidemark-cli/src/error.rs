//! CLI error types and result alias.

use miette::Diagnostic;
use thiserror::Error;

use tidemark_migrate::{MigrationError, VersionId};
use tidemark_postgres::PgError;

/// Result type alias for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// CLI error types
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// IO error
    #[error("IO error: {0}")]
    #[diagnostic(code(tidemark::io))]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    #[diagnostic(code(tidemark::config))]
    Config(String),

    /// Migration error
    #[error("Migration error: {0}")]
    #[diagnostic(code(tidemark::migration))]
    Migration(#[from] MigrationError),

    /// Database error
    #[error("Database error: {0}")]
    #[diagnostic(
        code(tidemark::database),
        help("check the database URL and that the server is reachable")
    )]
    Database(String),

    /// Output error
    #[error("Output error: {0}")]
    #[diagnostic(code(tidemark::output))]
    Output(String),
}

impl CliError {
    /// Version of the migration that failed, if any.
    pub fn failed_version(&self) -> Option<&VersionId> {
        match self {
            CliError::Migration(e) => e.failed_version(),
            _ => None,
        }
    }
}

impl From<PgError> for CliError {
    fn from(err: PgError) -> Self {
        match err {
            PgError::Config(msg) => CliError::Config(msg),
            other => CliError::Database(other.to_string()),
        }
    }
}

impl From<toml::de::Error> for CliError {
    fn from(err: toml::de::Error) -> Self {
        CliError::Config(format!("Failed to parse TOML: {}", err))
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        CliError::Output(format!("Failed to serialize JSON: {}", err))
    }
}
