//! Applying pending migrations.
//!
//! Each transactional migration runs as `BEGIN; <file>; INSERT history; COMMIT`
//! so the schema change and its history row land together. Files that
//! PostgreSQL refuses to run inside a transaction block are split into
//! statements and executed one by one, with the history row written last.

use std::future::Future;
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::error::{DbError, MigrateResult, MigrationError};
use crate::file::{ExecutionMode, MigrationFile};
use crate::history::HistoryStore;
use crate::sql::split_statements;
use crate::version::VersionId;

/// Lifecycle of a single migration within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    /// Not started yet.
    Pending,
    /// SQL is being executed.
    Executing,
    /// SQL and history row are durable.
    Committed,
    /// Execution failed; the transaction was rolled back.
    Failed,
}

impl std::fmt::Display for MigrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::Committed => "committed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A migration applied during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedMigration {
    /// Applied version.
    pub version: VersionId,
    /// Migration name.
    pub name: String,
    /// Wall time spent on the migration.
    pub duration_ms: u64,
    /// How the file was executed.
    pub mode: ExecutionMode,
}

/// Why a step stopped before completing.
#[derive(Debug)]
pub(crate) enum Interrupt {
    Db(DbError),
    Cancelled,
}

impl From<DbError> for Interrupt {
    fn from(err: DbError) -> Self {
        Self::Db(err)
    }
}

/// Race a database call against cancellation.
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, Interrupt>
where
    F: Future<Output = Result<T, DbError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupt::Cancelled),
        res = fut => res.map_err(Interrupt::Db),
    }
}

/// Leave the session usable after an interrupted step.
pub(crate) async fn abort<C>(conn: &mut C, interrupt: &Interrupt)
where
    C: Connection + ?Sized,
{
    if matches!(interrupt, Interrupt::Cancelled) {
        if let Err(e) = conn.cancel_query().await {
            warn!(error = %e, "Failed to cancel running statement");
        }
    }
    if let Err(e) = conn.rollback().await {
        warn!(error = %e, "Rollback failed");
    }
}

/// Race a bookkeeping call made outside any transaction against cancellation.
pub(crate) async fn until_cancelled<T, F>(cancel: &CancellationToken, fut: F) -> MigrateResult<T>
where
    F: Future<Output = MigrateResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(MigrationError::Cancelled),
        res = fut => res,
    }
}

/// Ask the server to drop the statement a cancelled bookkeeping call left running.
pub(crate) async fn settle<C, T>(conn: &mut C, result: MigrateResult<T>) -> MigrateResult<T>
where
    C: Connection + ?Sized,
{
    if matches!(result, Err(MigrationError::Cancelled)) {
        if let Err(e) = conn.cancel_query().await {
            warn!(error = %e, "Failed to cancel running statement");
        }
    }
    result
}

/// Executes pending migrations in order, stopping at the first failure.
#[derive(Debug, Clone, Default)]
pub struct Applier {
    history: HistoryStore,
    cancel: CancellationToken,
}

impl Applier {
    /// Create an applier writing to `history`.
    pub fn new(history: HistoryStore) -> Self {
        Self {
            history,
            cancel: CancellationToken::new(),
        }
    }

    /// Honor `token` between and during migrations.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Apply `pending` in the given order.
    ///
    /// Migrations committed before a failure stay applied. The failing
    /// migration leaves no trace in the history table when it ran
    /// transactionally.
    pub async fn apply<C>(
        &self,
        conn: &mut C,
        pending: &[MigrationFile],
    ) -> MigrateResult<Vec<AppliedMigration>>
    where
        C: Connection + ?Sized,
    {
        let mut applied = Vec::with_capacity(pending.len());
        if pending.is_empty() {
            return Ok(applied);
        }
        if self.cancel.is_cancelled() {
            return Err(MigrationError::Cancelled);
        }

        for file in pending {
            debug!(version = %file.version, name = %file.name, state = %MigrationState::Pending, "Queued migration");
        }

        let created = until_cancelled(&self.cancel, self.history.ensure_table(conn)).await;
        settle(conn, created).await?;

        for file in pending {
            if self.cancel.is_cancelled() {
                return Err(MigrationError::Cancelled);
            }

            let mode = file.execution_mode();
            debug!(version = %file.version, name = %file.name, state = %MigrationState::Executing, "Applying migration");
            let start = Instant::now();

            let outcome = match mode {
                ExecutionMode::Transactional => self.apply_transactional(conn, file).await,
                ExecutionMode::NonTransactional => self.apply_statements(conn, file).await,
            };

            if let Err(interrupt) = outcome {
                warn!(version = %file.version, name = %file.name, state = %MigrationState::Failed, "Migration failed");
                return Err(match interrupt {
                    Interrupt::Cancelled => MigrationError::Cancelled,
                    Interrupt::Db(source) => MigrationError::Apply {
                        version: file.version.clone(),
                        name: file.name.clone(),
                        source,
                    },
                });
            }

            let duration_ms = start.elapsed().as_millis() as u64;
            info!(
                version = %file.version,
                name = %file.name,
                duration_ms,
                state = %MigrationState::Committed,
                "Applied migration"
            );
            applied.push(AppliedMigration {
                version: file.version.clone(),
                name: file.name.clone(),
                duration_ms,
                mode,
            });
        }

        Ok(applied)
    }

    async fn apply_transactional<C>(&self, conn: &mut C, file: &MigrationFile) -> Result<(), Interrupt>
    where
        C: Connection + ?Sized,
    {
        let outcome = self.run_in_transaction(conn, file).await;
        if let Err(interrupt) = &outcome {
            abort(conn, interrupt).await;
        }
        outcome
    }

    async fn run_in_transaction<C>(&self, conn: &mut C, file: &MigrationFile) -> Result<(), Interrupt>
    where
        C: Connection + ?Sized,
    {
        cancellable(&self.cancel, conn.begin()).await?;
        cancellable(&self.cancel, conn.simple_query(&file.sql)).await?;
        cancellable(
            &self.cancel,
            self.history.record(conn, &file.version, &file.name),
        )
        .await?;
        // Once COMMIT is sent the outcome belongs to the server.
        conn.commit().await?;
        Ok(())
    }

    async fn apply_statements<C>(&self, conn: &mut C, file: &MigrationFile) -> Result<(), Interrupt>
    where
        C: Connection + ?Sized,
    {
        warn!(
            version = %file.version,
            name = %file.name,
            "Migration cannot run inside a transaction; executing statements individually"
        );

        let outcome = self.run_statements(conn, file).await;
        if let Err(Interrupt::Cancelled) = &outcome {
            if let Err(e) = conn.cancel_query().await {
                warn!(error = %e, "Failed to cancel running statement");
            }
        }
        outcome
    }

    async fn run_statements<C>(&self, conn: &mut C, file: &MigrationFile) -> Result<(), Interrupt>
    where
        C: Connection + ?Sized,
    {
        for statement in split_statements(&file.sql) {
            cancellable(&self.cancel, conn.simple_query(&statement)).await?;
        }
        cancellable(
            &self.cancel,
            self.history.record(conn, &file.version, &file.name),
        )
        .await
    }
}
