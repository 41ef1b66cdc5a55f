//! Error types for PostgreSQL operations.

use std::error::Error as _;

use thiserror::Error;
use tidemark_migrate::{DbError, MigrationError};

/// Result type for PostgreSQL operations.
pub type PgResult<T> = Result<T, PgError>;

/// Errors that can occur while setting up a PostgreSQL session.
#[derive(Error, Debug)]
pub enum PgError {
    /// PostgreSQL error.
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection error.
    #[error("connection error: {0}")]
    Connection(String),
}

impl PgError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Check if this is a connection error.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Connection(_) => true,
            Self::Postgres(e) => is_connection_failure(e),
            Self::Config(_) => false,
        }
    }
}

impl From<PgError> for MigrationError {
    fn from(err: PgError) -> Self {
        match err {
            PgError::Config(msg) => MigrationError::Config(msg),
            PgError::Connection(msg) => MigrationError::Connection(msg),
            PgError::Postgres(e) => MigrationError::from_db(to_db_error(&e)),
        }
    }
}

/// Translate a driver error into the engine's [`DbError`].
///
/// Server diagnostics keep their SQLSTATE, with `DETAIL` and `HINT` appended
/// the way `psql` prints them.
pub fn to_db_error(err: &tokio_postgres::Error) -> DbError {
    if let Some(db) = err.as_db_error() {
        let mut message = db.message().to_string();
        if let Some(detail) = db.detail() {
            message.push_str("\nDETAIL: ");
            message.push_str(detail);
        }
        if let Some(hint) = db.hint() {
            message.push_str("\nHINT: ");
            message.push_str(hint);
        }
        return DbError::new(db.code().code(), message);
    }

    if is_connection_failure(err) {
        DbError::connection_lost(err.to_string())
    } else {
        DbError::message(err.to_string())
    }
}

fn is_connection_failure(err: &tokio_postgres::Error) -> bool {
    err.is_closed() || err.source().is_some_and(|s| s.is::<std::io::Error>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = PgError::config("invalid URL");
        assert!(matches!(err, PgError::Config(_)));
        assert!(!err.is_connection_error());

        let err = PgError::connection("connection refused");
        assert!(err.is_connection_error());
    }

    #[test]
    fn test_into_migration_error() {
        let err: MigrationError = PgError::connection("refused").into();
        assert!(matches!(err, MigrationError::Connection(_)));
        assert!(err.is_retryable());

        let err: MigrationError = PgError::config("bad url").into();
        assert!(matches!(err, MigrationError::Config(_)));
        assert!(!err.is_retryable());
    }
}
