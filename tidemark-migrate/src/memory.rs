//! In-memory [`Connection`] for tests.
//!
//! Recognizes the engine's own bookkeeping statements and records every other
//! statement as "executed". `BEGIN` snapshots the state and `ROLLBACK`
//! restores it, so tests can observe what a real server would have kept.

use async_trait::async_trait;

use crate::connection::{Connection, TextRow};
use crate::error::{DbError, UNDEFINED_TABLE};
use crate::history::HistoryStore;
use crate::seed::SeedStore;

const UNIQUE_VIOLATION: &str = "23505";
const IN_FAILED_TRANSACTION: &str = "25P02";
const ACTIVE_TRANSACTION: &str = "25001";
const RAISE_EXCEPTION: &str = "P0001";

#[derive(Debug, Clone, Default)]
struct State {
    /// `None` while the history table does not exist.
    history: Option<Vec<(String, String)>>,
    seeds: Option<Vec<(String, String)>>,
    executed: Vec<String>,
}

/// A scripted, in-memory database session.
#[derive(Debug, Default)]
pub struct MemoryConnection {
    state: State,
    snapshot: Option<State>,
    aborted: bool,
    history: HistoryStore,
    seeds: SeedStore,
    malformed_history: bool,
    unreachable: bool,
    failures: Vec<String>,
    hang: Option<String>,
    log: Vec<String>,
    cancel_requests: usize,
}

impl MemoryConnection {
    /// An empty database with no bookkeeping tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use custom bookkeeping table locations.
    pub fn with_stores(mut self, history: HistoryStore, seeds: SeedStore) -> Self {
        self.history = history;
        self.seeds = seeds;
        self
    }

    /// Pre-populate the history table with `(version, name)` rows.
    pub fn with_history(mut self, rows: &[(&str, &str)]) -> Self {
        self.state.history = Some(
            rows.iter()
                .map(|(v, n)| (v.to_string(), n.to_string()))
                .collect(),
        );
        self
    }

    /// Pre-populate the seed table with `(fingerprint, path)` rows.
    pub fn with_seeds(mut self, rows: &[(&str, &str)]) -> Self {
        self.state.seeds = Some(
            rows.iter()
                .map(|(h, p)| (h.to_string(), p.to_string()))
                .collect(),
        );
        self
    }

    /// Make the history table return single-column rows.
    pub fn with_malformed_history(mut self) -> Self {
        self.malformed_history = true;
        self.state.history.get_or_insert_with(Vec::new);
        self
    }

    /// Fail every call as if the server could not be reached.
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// Fail any statement containing `marker`.
    pub fn fail_on(mut self, marker: impl Into<String>) -> Self {
        self.failures.push(marker.into());
        self
    }

    /// Never complete any statement containing `marker`.
    pub fn hang_on(mut self, marker: impl Into<String>) -> Self {
        self.hang = Some(marker.into());
        self
    }

    /// Statements that changed user data, in execution order.
    pub fn executed(&self) -> &[String] {
        &self.state.executed
    }

    /// Every statement received, including bookkeeping and transaction control.
    pub fn log(&self) -> &[String] {
        &self.log
    }

    /// Recorded history versions in insertion order.
    pub fn history_versions(&self) -> Vec<String> {
        self.state
            .history
            .iter()
            .flatten()
            .map(|(version, _)| version.clone())
            .collect()
    }

    /// Recorded seed fingerprints in insertion order.
    pub fn seed_fingerprints(&self) -> Vec<String> {
        self.state
            .seeds
            .iter()
            .flatten()
            .map(|(hash, _)| hash.clone())
            .collect()
    }

    /// Whether the history table exists.
    pub fn has_history_table(&self) -> bool {
        self.state.history.is_some()
    }

    /// Whether a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Number of cancel requests received.
    pub fn cancel_requests(&self) -> usize {
        self.cancel_requests
    }

    async fn receive(&mut self, sql: &str) -> Result<(), DbError> {
        self.log.push(sql.to_string());
        if self.unreachable {
            return Err(DbError::connection_lost("connection refused"));
        }
        if self.hang.as_deref().is_some_and(|marker| sql.contains(marker)) {
            std::future::pending::<()>().await;
        }
        if self.aborted && sql != "ROLLBACK" && sql != "COMMIT" {
            return Err(DbError::new(
                IN_FAILED_TRANSACTION,
                "current transaction is aborted, commands ignored until end of transaction block",
            ));
        }
        Ok(())
    }

    fn fail(&mut self, err: DbError) -> DbError {
        if self.snapshot.is_some() {
            self.aborted = true;
        }
        err
    }

    fn run_user_statement(&mut self, sql: &str) -> Result<(), DbError> {
        if let Some(marker) = self.failures.iter().find(|m| sql.contains(m.as_str())) {
            let err = DbError::new(RAISE_EXCEPTION, format!("forced failure at \"{marker}\""));
            return Err(self.fail(err));
        }
        self.state.executed.push(sql.to_string());
        Ok(())
    }

    fn end_transaction(&mut self, keep: bool) {
        if let Some(snapshot) = self.snapshot.take() {
            if !keep || self.aborted {
                self.state = snapshot;
            }
        }
        self.aborted = false;
    }
}

fn text_rows(rows: &[(String, String)]) -> Vec<TextRow> {
    rows.iter()
        .map(|(a, b)| vec![Some(a.clone()), Some(b.clone())])
        .collect()
}

fn missing_table(name: &str) -> DbError {
    DbError::new(UNDEFINED_TABLE, format!("relation {name} does not exist"))
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn simple_query(&mut self, sql: &str) -> Result<Vec<TextRow>, DbError> {
        self.receive(sql).await?;

        match sql {
            "BEGIN" => {
                if self.snapshot.is_some() {
                    return Err(DbError::new(
                        ACTIVE_TRANSACTION,
                        "there is already a transaction in progress",
                    ));
                }
                self.snapshot = Some(self.state.clone());
            }
            "COMMIT" => self.end_transaction(true),
            "ROLLBACK" => self.end_transaction(false),
            _ if sql == self.history.select_sql() => {
                let Some(rows) = &self.state.history else {
                    let err = missing_table(&self.history.table_name());
                    return Err(self.fail(err));
                };
                if !self.malformed_history {
                    return Ok(text_rows(rows));
                }
                let mut out: Vec<TextRow> = rows.iter().map(|(v, _)| vec![Some(v.clone())]).collect();
                if out.is_empty() {
                    out.push(vec![Some("1".to_string())]);
                }
                return Ok(out);
            }
            _ if sql == self.seeds.select_sql() => {
                let Some(rows) = &self.state.seeds else {
                    let err = missing_table(&self.seeds.table_name());
                    return Err(self.fail(err));
                };
                return Ok(text_rows(rows));
            }
            _ if sql == self.history.create_sql() => {
                self.state.history.get_or_insert_with(Vec::new);
            }
            _ if sql == self.seeds.create_sql() => {
                self.state.seeds.get_or_insert_with(Vec::new);
            }
            _ => self.run_user_statement(sql)?,
        }

        Ok(Vec::new())
    }

    async fn execute(&mut self, sql: &str, params: &[&str]) -> Result<u64, DbError> {
        self.receive(sql).await?;

        let row = match params {
            [a, b] => Some((a.to_string(), b.to_string())),
            _ => None,
        };

        if sql == self.history.insert_sql() {
            let Some((version, name)) = row else {
                return Err(DbError::message("history insert expects 2 parameters"));
            };
            let table = self.history.table_name();
            let Some(history) = self.state.history.as_mut() else {
                return Err(self.fail(missing_table(&table)));
            };
            if history.iter().any(|(v, _)| *v == version) {
                let err = DbError::new(
                    UNIQUE_VIOLATION,
                    format!("duplicate key value violates unique constraint (version)=({version})"),
                );
                return Err(self.fail(err));
            }
            history.push((version, name));
            return Ok(1);
        }

        if sql == self.seeds.upsert_sql() {
            let Some((hash, path)) = row else {
                return Err(DbError::message("seed upsert expects 2 parameters"));
            };
            let table = self.seeds.table_name();
            let Some(seeds) = self.state.seeds.as_mut() else {
                return Err(self.fail(missing_table(&table)));
            };
            match seeds.iter_mut().find(|(h, _)| *h == hash) {
                Some(existing) => existing.1 = path,
                None => seeds.push((hash, path)),
            }
            return Ok(1);
        }

        self.run_user_statement(sql)?;
        Ok(1)
    }

    async fn cancel_query(&mut self) -> Result<(), DbError> {
        self.cancel_requests += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rollback_restores_state() {
        let mut conn = MemoryConnection::new();
        conn.begin().await.unwrap();
        conn.simple_query("CREATE TABLE t (id int);").await.unwrap();
        conn.rollback().await.unwrap();

        assert!(conn.executed().is_empty());
        assert!(!conn.in_transaction());
    }

    #[tokio::test]
    async fn test_aborted_transaction_rejects_statements() {
        let mut conn = MemoryConnection::new().fail_on("oops");
        conn.begin().await.unwrap();
        conn.simple_query("SELECT 1;").await.unwrap();
        assert!(conn.simple_query("SELECT oops;").await.is_err());

        let err = conn.simple_query("SELECT 2;").await.unwrap_err();
        assert_eq!(err.code.as_deref(), Some(IN_FAILED_TRANSACTION));

        // COMMIT of an aborted transaction rolls back.
        conn.commit().await.unwrap();
        assert!(conn.executed().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable() {
        let mut conn = MemoryConnection::new().unreachable();
        let err = conn.simple_query("SELECT 1").await.unwrap_err();
        assert!(err.is_connection_lost());
    }
}
