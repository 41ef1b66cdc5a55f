//! Error types for the migration engine.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::version::VersionId;

/// Result type alias for migration operations.
pub type MigrateResult<T> = Result<T, MigrationError>;

/// SQLSTATE for `undefined_table`.
pub const UNDEFINED_TABLE: &str = "42P01";
/// SQLSTATE for `invalid_schema_name`.
pub const INVALID_SCHEMA_NAME: &str = "3F000";
/// SQLSTATE for `undefined_column`.
pub const UNDEFINED_COLUMN: &str = "42703";

/// Errors that can occur during migration operations.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The migrations directory exists but could not be read.
    #[error("cannot read migrations directory {}: {source}", path.display())]
    InvalidDirectory {
        /// Directory that failed to open.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Two local files share a version.
    #[error("duplicate migration version {version}: {first} and {second}")]
    DuplicateVersion {
        /// The shared version.
        version: VersionId,
        /// File name seen first.
        first: String,
        /// File name seen second.
        second: String,
    },

    /// A history table does not have the expected shape.
    #[error("history table has an unexpected shape: {0}")]
    Schema(String),

    /// The database could not be reached.
    #[error("connection error: {0}")]
    Connection(String),

    /// A migration failed to apply.
    #[error("failed to apply migration {version}_{name}: {source}")]
    Apply {
        /// Version of the failing migration.
        version: VersionId,
        /// Name of the failing migration.
        name: String,
        /// Database diagnostic.
        #[source]
        source: DbError,
    },

    /// A seed file failed to apply.
    #[error("failed to apply seed {}: {source}", path.display())]
    Seed {
        /// Path of the failing seed file.
        path: PathBuf,
        /// Database diagnostic.
        #[source]
        source: DbError,
    },

    /// The run was cancelled by the caller.
    #[error("migration run cancelled")]
    Cancelled,

    /// Any other database failure outside of a migration body.
    #[error("database error: {0}")]
    Database(#[from] DbError),

    /// Invalid engine configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MigrationError {
    /// Create a schema error.
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Classify a database error raised outside of a migration body.
    pub fn from_db(err: DbError) -> Self {
        if err.is_connection_lost() {
            Self::Connection(err.message)
        } else {
            Self::Database(err)
        }
    }

    /// Version of the failing migration, if this error belongs to one.
    pub fn failed_version(&self) -> Option<&VersionId> {
        match self {
            Self::Apply { version, .. } => Some(version),
            _ => None,
        }
    }

    /// Check if re-invoking the run is safe without operator intervention.
    ///
    /// Nothing is retried inside the engine.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Cancelled)
    }
}

/// An error reported by the database driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbError {
    /// SQLSTATE code, when the server sent one.
    pub code: Option<String>,
    /// Human readable diagnostic.
    pub message: String,
    connection_lost: bool,
}

impl DbError {
    /// Create an error carrying a SQLSTATE code.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
            connection_lost: false,
        }
    }

    /// Create an error without a SQLSTATE code.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            connection_lost: false,
        }
    }

    /// Create an error for a connection that is closed or unreachable.
    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            connection_lost: true,
        }
    }

    /// Whether the connection itself failed, rather than a statement.
    pub fn is_connection_lost(&self) -> bool {
        self.connection_lost
    }

    /// Whether the queried relation (or its schema) does not exist.
    pub fn is_undefined_table(&self) -> bool {
        matches!(
            self.code.as_deref(),
            Some(UNDEFINED_TABLE) | Some(INVALID_SCHEMA_NAME)
        )
    }

    /// Whether the query referenced a column the table does not have.
    pub fn is_undefined_column(&self) -> bool {
        self.code.as_deref() == Some(UNDEFINED_COLUMN)
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} (SQLSTATE {})", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for DbError {}
