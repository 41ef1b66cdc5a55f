//! Seed data.
//!
//! Seeds run after migrations. They are not version ordered; each file is
//! identified by the SHA-256 of its content and skipped once that
//! fingerprint has been recorded.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::apply::{Interrupt, abort, cancellable, settle, until_cancelled};
use crate::connection::Connection;
use crate::error::{MigrateResult, MigrationError};
use crate::history::{DEFAULT_SCHEMA, TableLoad, qualified, quote_ident, read_table};

/// Table recording applied seed fingerprints.
pub const DEFAULT_SEED_TABLE: &str = "seed_files";

/// A seed file and its fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeedFile {
    /// Path the seed was read from.
    pub path: PathBuf,
    /// Lowercase hex SHA-256 of the content.
    pub fingerprint: String,
    /// Raw SQL content.
    #[serde(skip)]
    pub sql: String,
}

impl SeedFile {
    /// Create a seed from in-memory content.
    pub fn new(path: impl Into<PathBuf>, sql: impl Into<String>) -> Self {
        let sql = sql.into();
        Self {
            path: path.into(),
            fingerprint: fingerprint(sql.as_bytes()),
            sql,
        }
    }

    /// Read a seed from disk.
    pub fn read(path: impl AsRef<Path>) -> MigrateResult<Self> {
        let path = path.as_ref();
        let sql = fs::read_to_string(path)?;
        Ok(Self::new(path, sql))
    }
}

/// Compute the SHA-256 fingerprint of seed content.
pub fn fingerprint(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Resolve configured seed paths into seed files.
///
/// Directories contribute their `*.sql` files (not recursively). Missing
/// paths are skipped with a warning. The result is ordered by the full
/// path string, byte for byte, with duplicates removed.
pub fn collect_seed_files(paths: &[PathBuf]) -> MigrateResult<Vec<SeedFile>> {
    let mut found = Vec::new();

    for path in paths {
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Seed path does not exist, skipping");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        if metadata.is_dir() {
            for entry in fs::read_dir(path)? {
                let entry = entry?;
                let entry_path = entry.path();
                if entry.file_type()?.is_file()
                    && entry_path.extension().is_some_and(|ext| ext == "sql")
                {
                    found.push(entry_path);
                }
            }
        } else {
            found.push(path.clone());
        }
    }

    found.sort_by(|a, b| a.to_string_lossy().cmp(&b.to_string_lossy()));
    found.dedup();

    found.iter().map(SeedFile::read).collect()
}

/// What happened to each seed in a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    /// Seeds executed (or that would be, in a dry run).
    pub applied: Vec<PathBuf>,
    /// Seeds whose fingerprint was already recorded.
    pub skipped: Vec<PathBuf>,
}

/// Reads and writes the seed fingerprint table.
#[derive(Debug, Clone)]
pub struct SeedStore {
    schema: String,
    table: String,
}

impl Default for SeedStore {
    fn default() -> Self {
        Self::new(DEFAULT_SCHEMA, DEFAULT_SEED_TABLE)
    }
}

impl SeedStore {
    /// Create a store for `schema.table`.
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Fully qualified, quoted table name.
    pub fn table_name(&self) -> String {
        qualified(&self.schema, &self.table)
    }

    /// Query listing recorded fingerprints.
    pub fn select_sql(&self) -> String {
        format!("SELECT hash, path FROM {}", self.table_name())
    }

    /// Statements creating the schema and table.
    pub fn create_sql(&self) -> String {
        format!(
            "CREATE SCHEMA IF NOT EXISTS {};\n\
             CREATE TABLE IF NOT EXISTS {} (\n    \
                 hash text NOT NULL PRIMARY KEY,\n    \
                 path text NOT NULL,\n    \
                 applied_at timestamptz NOT NULL DEFAULT now()\n\
             );",
            quote_ident(&self.schema),
            self.table_name()
        )
    }

    /// Statement recording one fingerprint.
    pub fn upsert_sql(&self) -> String {
        format!(
            "INSERT INTO {} (hash, path) VALUES ($1, $2) \
             ON CONFLICT (hash) DO UPDATE SET path = EXCLUDED.path",
            self.table_name()
        )
    }

    /// Create the schema and table if they do not exist.
    pub async fn ensure_table<C>(&self, conn: &mut C) -> MigrateResult<()>
    where
        C: Connection + ?Sized,
    {
        conn.simple_query(&self.create_sql())
            .await
            .map_err(MigrationError::from_db)?;
        Ok(())
    }

    /// Fingerprints already applied; empty when the table does not exist.
    pub async fn load_fingerprints<C>(&self, conn: &mut C) -> MigrateResult<HashSet<String>>
    where
        C: Connection + ?Sized,
    {
        match read_table(conn, &self.select_sql(), 2)
            .await
            .map_err(MigrationError::from_db)?
        {
            TableLoad::NotFound => Ok(HashSet::new()),
            TableLoad::Malformed(detail) => Err(MigrationError::schema(format!(
                "{}: {}",
                self.table_name(),
                detail
            ))),
            TableLoad::Rows(rows) => Ok(rows
                .into_iter()
                .filter_map(|row| row.into_iter().next())
                .collect()),
        }
    }
}

/// Applies seed files that have not been applied before.
#[derive(Debug, Clone)]
pub struct SeedRunner {
    store: SeedStore,
    enabled: bool,
    dry_run: bool,
    cancel: CancellationToken,
}

impl SeedRunner {
    /// Create a runner. A disabled runner does nothing.
    pub fn new(store: SeedStore, enabled: bool) -> Self {
        Self {
            store,
            enabled,
            dry_run: false,
            cancel: CancellationToken::new(),
        }
    }

    /// Report pending seeds without executing them.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Honor `token` between and during seed executions.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Apply every seed whose fingerprint is not yet recorded, in the given order.
    pub async fn apply_seeds<C>(&self, conn: &mut C, seeds: &[SeedFile]) -> MigrateResult<SeedReport>
    where
        C: Connection + ?Sized,
    {
        let mut report = SeedReport::default();
        if !self.enabled {
            debug!("Seeding disabled");
            return Ok(report);
        }

        let loaded = until_cancelled(&self.cancel, self.store.load_fingerprints(conn)).await;
        let mut seen = settle(conn, loaded).await?;
        let mut pending = Vec::new();
        for seed in seeds {
            if seen.insert(seed.fingerprint.clone()) {
                pending.push(seed);
            } else {
                debug!(path = %seed.path.display(), "Seed already applied");
                report.skipped.push(seed.path.clone());
            }
        }

        if self.dry_run {
            report.applied = pending.iter().map(|s| s.path.clone()).collect();
            return Ok(report);
        }

        if !pending.is_empty() {
            let created = until_cancelled(&self.cancel, self.store.ensure_table(conn)).await;
            settle(conn, created).await?;
        }

        for seed in pending {
            if self.cancel.is_cancelled() {
                return Err(MigrationError::Cancelled);
            }

            info!(path = %seed.path.display(), "Seeding data");
            let outcome = self.run_seed(conn, seed).await;
            if let Err(interrupt) = outcome {
                abort(conn, &interrupt).await;
                return Err(match interrupt {
                    Interrupt::Cancelled => MigrationError::Cancelled,
                    Interrupt::Db(source) => MigrationError::Seed {
                        path: seed.path.clone(),
                        source,
                    },
                });
            }
            report.applied.push(seed.path.clone());
        }

        Ok(report)
    }

    async fn run_seed<C>(&self, conn: &mut C, seed: &SeedFile) -> Result<(), Interrupt>
    where
        C: Connection + ?Sized,
    {
        cancellable(&self.cancel, conn.begin()).await?;
        cancellable(&self.cancel, conn.simple_query(&seed.sql)).await?;

        let path = seed.path.to_string_lossy();
        cancellable(
            &self.cancel,
            conn.execute(&self.store.upsert_sql(), &[&seed.fingerprint, &path]),
        )
        .await?;

        conn.commit().await.map_err(Interrupt::Db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryConnection;
    use tempfile::TempDir;

    #[test]
    fn test_fingerprint_is_sha256_hex() {
        assert_eq!(
            fingerprint(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(fingerprint(b"a"), fingerprint(b"a"));
        assert_ne!(fingerprint(b"a"), fingerprint(b"b"));
    }

    #[test]
    fn test_collect_sorted_and_deduplicated() {
        let dir = TempDir::new().unwrap();
        let seeds = dir.path().join("seeds");
        fs::create_dir(&seeds).unwrap();
        fs::write(seeds.join("b.sql"), "SELECT 'b';").unwrap();
        fs::write(seeds.join("a.sql"), "SELECT 'a';").unwrap();
        fs::write(seeds.join("notes.txt"), "ignored").unwrap();
        fs::create_dir(seeds.join("nested.sql")).unwrap();

        let files = collect_seed_files(&[
            seeds.join("b.sql"),
            seeds.clone(),
            dir.path().join("missing.sql"),
        ])
        .unwrap();

        let names: Vec<_> = files
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.sql", "b.sql"]);
        assert_eq!(files[0].sql, "SELECT 'a';");
    }

    #[test]
    fn test_collect_orders_by_path_string() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("seed")).unwrap();
        fs::create_dir(dir.path().join("seed-x")).unwrap();
        fs::write(dir.path().join("seed/2.sql"), "SELECT 2;").unwrap();
        fs::write(dir.path().join("seed-x/1.sql"), "SELECT 1;").unwrap();

        let files = collect_seed_files(&[
            dir.path().join("seed/2.sql"),
            dir.path().join("seed-x/1.sql"),
        ])
        .unwrap();

        // '-' sorts before '/'
        let sql: Vec<_> = files.iter().map(|f| f.sql.as_str()).collect();
        assert_eq!(sql, vec!["SELECT 1;", "SELECT 2;"]);
    }

    #[tokio::test]
    async fn test_apply_records_and_skips() {
        let mut conn = MemoryConnection::new();
        let runner = SeedRunner::new(SeedStore::default(), true);
        let seeds = vec![SeedFile::new("seed.sql", "INSERT INTO t VALUES (1);")];

        let first = runner.apply_seeds(&mut conn, &seeds).await.unwrap();
        assert_eq!(first.applied, vec![PathBuf::from("seed.sql")]);

        let second = runner.apply_seeds(&mut conn, &seeds).await.unwrap();
        assert!(second.applied.is_empty());
        assert_eq!(second.skipped, vec![PathBuf::from("seed.sql")]);

        assert_eq!(conn.executed(), ["INSERT INTO t VALUES (1);"]);
        assert_eq!(conn.seed_fingerprints().len(), 1);
    }

    #[tokio::test]
    async fn test_identical_content_applies_once() {
        let mut conn = MemoryConnection::new();
        let runner = SeedRunner::new(SeedStore::default(), true);
        let seeds = vec![
            SeedFile::new("a.sql", "INSERT INTO t VALUES (1);"),
            SeedFile::new("b.sql", "INSERT INTO t VALUES (1);"),
        ];

        let report = runner.apply_seeds(&mut conn, &seeds).await.unwrap();
        assert_eq!(report.applied, vec![PathBuf::from("a.sql")]);
        assert_eq!(report.skipped, vec![PathBuf::from("b.sql")]);
        assert_eq!(conn.executed().len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_runner_does_nothing() {
        let mut conn = MemoryConnection::new();
        let runner = SeedRunner::new(SeedStore::default(), false);
        let seeds = vec![SeedFile::new("seed.sql", "INSERT INTO t VALUES (1);")];

        let report = runner.apply_seeds(&mut conn, &seeds).await.unwrap();
        assert_eq!(report, SeedReport::default());
        assert!(conn.log().is_empty());
    }

    #[tokio::test]
    async fn test_failed_seed_rolls_back() {
        let mut conn = MemoryConnection::new().fail_on("boom");
        let runner = SeedRunner::new(SeedStore::default(), true);
        let seeds = vec![
            SeedFile::new("a.sql", "INSERT INTO t VALUES (1);"),
            SeedFile::new("b.sql", "SELECT boom;"),
        ];

        let err = runner.apply_seeds(&mut conn, &seeds).await.unwrap_err();
        match err {
            MigrationError::Seed { path, .. } => assert_eq!(path, PathBuf::from("b.sql")),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(conn.seed_fingerprints().len(), 1);
        assert!(!conn.in_transaction());
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let mut conn = MemoryConnection::new();
        let runner = SeedRunner::new(SeedStore::default(), true).dry_run(true);
        let seeds = vec![SeedFile::new("seed.sql", "INSERT INTO t VALUES (1);")];

        let report = runner.apply_seeds(&mut conn, &seeds).await.unwrap();
        assert_eq!(report.applied, vec![PathBuf::from("seed.sql")]);
        assert!(conn.executed().is_empty());
        assert!(conn.seed_fingerprints().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_while_reading_fingerprints() {
        let mut conn = MemoryConnection::new().hang_on("SELECT hash, path");
        let token = CancellationToken::new();
        let runner = SeedRunner::new(SeedStore::default(), true).with_cancellation(token.clone());
        let seeds = vec![SeedFile::new("seed.sql", "INSERT INTO t VALUES (1);")];

        let cancel = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            token.cancel();
        });

        let err = runner.apply_seeds(&mut conn, &seeds).await.unwrap_err();
        cancel.await.unwrap();

        assert!(matches!(err, MigrationError::Cancelled));
        assert_eq!(conn.cancel_requests(), 1);
        assert!(conn.executed().is_empty());
    }
}
