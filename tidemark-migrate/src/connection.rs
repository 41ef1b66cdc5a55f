//! The database seam used by the engine.
//!
//! The engine only ever issues SQL through [`Connection`]. Drivers (see
//! `tidemark-postgres`) implement it; tests use the in-memory connection.

use async_trait::async_trait;

use crate::error::DbError;

/// A result row with every column rendered as text (`None` for NULL).
pub type TextRow = Vec<Option<String>>;

/// A single database session owned by the engine for the duration of a run.
#[async_trait]
pub trait Connection: Send {
    /// Run one or more statements through the simple query protocol.
    ///
    /// Returns the rows of every statement that produced any, in order.
    async fn simple_query(&mut self, sql: &str) -> Result<Vec<TextRow>, DbError>;

    /// Run a single statement with text parameters bound to `$1..$n`.
    async fn execute(&mut self, sql: &str, params: &[&str]) -> Result<u64, DbError>;

    /// Open a transaction.
    async fn begin(&mut self) -> Result<(), DbError> {
        self.simple_query("BEGIN").await.map(|_| ())
    }

    /// Commit the open transaction.
    async fn commit(&mut self) -> Result<(), DbError> {
        self.simple_query("COMMIT").await.map(|_| ())
    }

    /// Roll back the open transaction.
    async fn rollback(&mut self) -> Result<(), DbError> {
        self.simple_query("ROLLBACK").await.map(|_| ())
    }

    /// Ask the server to abort whatever statement is currently running.
    async fn cancel_query(&mut self) -> Result<(), DbError> {
        Ok(())
    }
}
