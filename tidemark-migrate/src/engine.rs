//! Migration engine implementation.

use std::path::PathBuf;
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::apply::{AppliedMigration, Applier, settle, until_cancelled};
use crate::connection::Connection;
use crate::error::MigrateResult;
use crate::file::{MigrationFile, MigrationSource};
use crate::history::{DEFAULT_HISTORY_TABLE, DEFAULT_SCHEMA, HistoryStore};
use crate::reconcile::{ReconciliationResult, Reconciler};
use crate::seed::{DEFAULT_SEED_TABLE, SeedReport, SeedRunner, SeedStore, collect_seed_files};
use crate::version::VersionId;

/// Configuration for the migration engine.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Path to the migrations directory.
    pub migrations_dir: PathBuf,
    /// Seed files or directories of seed files.
    pub seed_paths: Vec<PathBuf>,
    /// Whether migrations run at all.
    pub migrations_enabled: bool,
    /// Whether seeds run at all.
    pub seed_enabled: bool,
    /// Apply nothing above this version.
    pub target_version: Option<VersionId>,
    /// Report what would happen without writing anything.
    pub dry_run: bool,
    /// Schema holding the bookkeeping tables.
    pub history_schema: String,
    /// Name of the migration history table.
    pub history_table: String,
    /// Name of the seed fingerprint table.
    pub seed_table: String,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            migrations_dir: PathBuf::from("./migrations"),
            seed_paths: Vec::new(),
            migrations_enabled: true,
            seed_enabled: true,
            target_version: None,
            dry_run: false,
            history_schema: DEFAULT_SCHEMA.to_string(),
            history_table: DEFAULT_HISTORY_TABLE.to_string(),
            seed_table: DEFAULT_SEED_TABLE.to_string(),
        }
    }
}

impl MigrationConfig {
    /// Create a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the migrations directory.
    pub fn migrations_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.migrations_dir = dir.into();
        self
    }

    /// Set the seed paths.
    pub fn seed_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.seed_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Enable or disable migrations.
    pub fn migrations_enabled(mut self, enabled: bool) -> Self {
        self.migrations_enabled = enabled;
        self
    }

    /// Enable or disable seeding.
    pub fn seed_enabled(mut self, enabled: bool) -> Self {
        self.seed_enabled = enabled;
        self
    }

    /// Stop at this version.
    pub fn target_version(mut self, version: Option<VersionId>) -> Self {
        self.target_version = version;
        self
    }

    /// Enable dry-run mode.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Set the bookkeeping schema.
    pub fn history_schema(mut self, schema: impl Into<String>) -> Self {
        self.history_schema = schema.into();
        self
    }

    /// Set the history table name.
    pub fn history_table(mut self, table: impl Into<String>) -> Self {
        self.history_table = table.into();
        self
    }

    /// Set the seed table name.
    pub fn seed_table(mut self, table: impl Into<String>) -> Self {
        self.seed_table = table.into();
        self
    }
}

/// Result of a migration run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationResult {
    /// Migrations applied, in order. In a dry run, those that would be.
    pub applied: Vec<AppliedMigration>,
    /// Remote versions without a local file.
    pub missing_local: Vec<VersionId>,
    /// Seed outcome.
    pub seeds: SeedReport,
    /// Total duration in milliseconds.
    pub duration_ms: u64,
    /// Whether nothing was written.
    pub dry_run: bool,
}

impl MigrationResult {
    /// Versions applied, in order.
    pub fn applied_versions(&self) -> Vec<&VersionId> {
        self.applied.iter().map(|a| &a.version).collect()
    }

    /// Check if any migration or seed was applied.
    pub fn has_changes(&self) -> bool {
        !self.applied.is_empty() || !self.seeds.applied.is_empty()
    }

    /// Get a summary of the result.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        let verb = if self.dry_run { "to apply" } else { "applied" };

        if !self.applied.is_empty() {
            parts.push(format!("{} migrations {}", self.applied.len(), verb));
        }

        if !self.seeds.applied.is_empty() {
            parts.push(format!("{} seeds {}", self.seeds.applied.len(), verb));
        }

        if !self.seeds.skipped.is_empty() {
            parts.push(format!("{} seeds skipped", self.seeds.skipped.len()));
        }

        if !self.missing_local.is_empty() {
            parts.push(format!("{} remote versions missing locally", self.missing_local.len()));
        }

        if parts.is_empty() {
            "Database is up to date".to_string()
        } else {
            format!("{} in {}ms", parts.join(", "), self.duration_ms)
        }
    }
}

/// Result of a migration plan.
#[derive(Debug, Clone, Default)]
pub struct MigrationPlan {
    /// How local and remote versions line up.
    pub reconciliation: ReconciliationResult,
    /// Pending migration files, ascending.
    pub pending: Vec<MigrationFile>,
}

impl MigrationPlan {
    /// Check if there's anything to migrate.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Get a summary of the plan.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();

        if !self.pending.is_empty() {
            parts.push(format!("{} pending", self.pending.len()));
        }

        if !self.reconciliation.in_sync.is_empty() {
            parts.push(format!("{} applied", self.reconciliation.in_sync.len()));
        }

        if !self.reconciliation.missing_local.is_empty() {
            parts.push(format!(
                "{} missing locally",
                self.reconciliation.missing_local.len()
            ));
        }

        if !self.reconciliation.above_ceiling.is_empty() {
            parts.push(format!(
                "{} above target",
                self.reconciliation.above_ceiling.len()
            ));
        }

        if parts.is_empty() {
            "No migrations".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Drives a run: scan, reconcile, apply, seed.
pub struct MigrationEngine {
    config: MigrationConfig,
    source: MigrationSource,
    history: HistoryStore,
    seeds: SeedStore,
    cancel: CancellationToken,
}

impl MigrationEngine {
    /// Create a new migration engine.
    pub fn new(config: MigrationConfig) -> Self {
        let source = MigrationSource::new(&config.migrations_dir);
        let history = HistoryStore::new(&config.history_schema, &config.history_table);
        let seeds = SeedStore::new(&config.history_schema, &config.seed_table);
        Self {
            config,
            source,
            history,
            seeds,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop the run when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// Get the local migration source.
    pub fn source(&self) -> &MigrationSource {
        &self.source
    }

    /// Get the history store.
    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Scan local files and diff them against the history table, honoring the
    /// target version.
    ///
    /// The directory is scanned before the database is touched, so duplicate
    /// versions fail without any database interaction.
    pub async fn plan<C>(&self, conn: &mut C) -> MigrateResult<MigrationPlan>
    where
        C: Connection + ?Sized,
    {
        let local = self.source.scan()?;
        let remote = self.load_applied(conn).await?;
        let reconciler = Reconciler::new().with_ceiling(self.config.target_version.clone());

        let (reconciliation, pending) = reconciler.plan(&local, &remote);
        for version in &reconciliation.missing_local {
            warn!(version = %version, "Remote migration version not found in local migrations directory");
        }
        if !reconciliation.above_ceiling.is_empty() {
            debug!(
                count = reconciliation.above_ceiling.len(),
                "Skipping migrations above the target version"
            );
        }

        Ok(MigrationPlan {
            reconciliation,
            pending,
        })
    }

    /// Full view of local and remote versions, ignoring the target version.
    pub async fn status<C>(&self, conn: &mut C) -> MigrateResult<ReconciliationResult>
    where
        C: Connection + ?Sized,
    {
        let local: Vec<VersionId> = self.source.scan()?.into_iter().map(|f| f.version).collect();
        let remote = self.load_applied(conn).await?;
        Ok(Reconciler::new().diff(&local, &remote))
    }

    async fn load_applied<C>(&self, conn: &mut C) -> MigrateResult<Vec<VersionId>>
    where
        C: Connection + ?Sized,
    {
        let remote = until_cancelled(&self.cancel, self.history.load_applied(conn)).await;
        settle(conn, remote).await
    }

    /// Apply pending migrations.
    pub async fn migrate<C>(&self, conn: &mut C) -> MigrateResult<MigrationResult>
    where
        C: Connection + ?Sized,
    {
        let start = Instant::now();
        let mut result = MigrationResult {
            dry_run: self.config.dry_run,
            ..Default::default()
        };

        if !self.config.migrations_enabled {
            info!("Migrations disabled, skipping");
            return Ok(result);
        }

        let plan = self.plan(conn).await?;
        result.missing_local = plan.reconciliation.missing_local.clone();

        if plan.is_empty() {
            info!("No pending migrations");
        } else if self.config.dry_run {
            for file in &plan.pending {
                info!(version = %file.version, name = %file.name, "Would apply migration");
                result.applied.push(AppliedMigration {
                    version: file.version.clone(),
                    name: file.name.clone(),
                    duration_ms: 0,
                    mode: file.execution_mode(),
                });
            }
        } else {
            let applier = Applier::new(self.history.clone()).with_cancellation(self.cancel.clone());
            result.applied = applier.apply(conn, &plan.pending).await?;
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        Ok(result)
    }

    /// Apply seed files that have not been applied yet.
    pub async fn seed<C>(&self, conn: &mut C) -> MigrateResult<SeedReport>
    where
        C: Connection + ?Sized,
    {
        if !self.config.seed_enabled {
            info!("Seeding disabled, skipping");
            return Ok(SeedReport::default());
        }

        let files = collect_seed_files(&self.config.seed_paths)?;
        if files.is_empty() {
            debug!("No seed files found");
            return Ok(SeedReport::default());
        }

        SeedRunner::new(self.seeds.clone(), self.config.seed_enabled)
            .dry_run(self.config.dry_run)
            .with_cancellation(self.cancel.clone())
            .apply_seeds(conn, &files)
            .await
    }

    /// Apply pending migrations, then seeds.
    pub async fn migrate_and_seed<C>(&self, conn: &mut C) -> MigrateResult<MigrationResult>
    where
        C: Connection + ?Sized,
    {
        let start = Instant::now();
        let mut result = self.migrate(conn).await?;
        result.seeds = self.seed(conn).await?;
        result.duration_ms = start.elapsed().as_millis() as u64;
        Ok(result)
    }

    /// Create an empty migration file stamped with the current UTC time.
    pub fn create_migration(&self, name: &str) -> MigrateResult<PathBuf> {
        self.source.create(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MigrationError;
    use crate::memory::MemoryConnection;
    use std::fs;
    use tempfile::TempDir;

    fn project(files: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        let migrations = dir.path().join("migrations");
        fs::create_dir(&migrations).unwrap();
        for (name, sql) in files {
            fs::write(migrations.join(name), sql).unwrap();
        }
        dir
    }

    fn engine(dir: &TempDir) -> MigrationEngine {
        MigrationEngine::new(MigrationConfig::new().migrations_dir(dir.path().join("migrations")))
    }

    #[test]
    fn test_config_builder() {
        let config = MigrationConfig::new()
            .migrations_dir("db/migrations")
            .seed_paths(["db/seed.sql"])
            .seed_enabled(false)
            .target_version(VersionId::parse("5").ok())
            .dry_run(true)
            .history_schema("ops");

        assert_eq!(config.migrations_dir, PathBuf::from("db/migrations"));
        assert_eq!(config.seed_paths, vec![PathBuf::from("db/seed.sql")]);
        assert!(config.migrations_enabled);
        assert!(!config.seed_enabled);
        assert_eq!(config.target_version.unwrap().as_str(), "5");
        assert!(config.dry_run);
        assert_eq!(config.history_schema, "ops");
        assert_eq!(config.history_table, DEFAULT_HISTORY_TABLE);
    }

    #[tokio::test]
    async fn test_migrate_then_rerun_is_noop() {
        let dir = project(&[
            ("1_users.sql", "CREATE TABLE users (id int);"),
            ("2_posts.sql", "CREATE TABLE posts (id int);"),
        ]);
        let engine = engine(&dir);
        let mut conn = MemoryConnection::new();

        let first = engine.migrate(&mut conn).await.unwrap();
        assert_eq!(first.applied.len(), 2);

        let log_len = conn.log().len();
        let second = engine.migrate(&mut conn).await.unwrap();
        assert!(second.applied.is_empty());
        assert_eq!(second.summary(), "Database is up to date");
        // Only the history read happened.
        assert_eq!(conn.log().len(), log_len + 1);
        assert_eq!(conn.history_versions(), vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_duplicate_version_fails_before_database() {
        let dir = project(&[("1_a.sql", "SELECT 1;"), ("01_b.sql", "SELECT 2;")]);
        let mut conn = MemoryConnection::new();

        let err = engine(&dir).migrate(&mut conn).await.unwrap_err();

        assert!(matches!(err, MigrationError::DuplicateVersion { .. }));
        assert!(conn.log().is_empty());
    }

    #[tokio::test]
    async fn test_target_version() {
        let dir = project(&[
            ("1_a.sql", "SELECT 'a';"),
            ("2_b.sql", "SELECT 'b';"),
            ("3_c.sql", "SELECT 'c';"),
        ]);
        let engine = MigrationEngine::new(
            MigrationConfig::new()
                .migrations_dir(dir.path().join("migrations"))
                .target_version(VersionId::parse("2").ok()),
        );
        let mut conn = MemoryConnection::new();

        let result = engine.migrate(&mut conn).await.unwrap();

        assert_eq!(conn.history_versions(), vec!["1", "2"]);
        assert!(result.missing_local.is_empty());

        let plan = engine.plan(&mut conn).await.unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.reconciliation.above_ceiling.len(), 1);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let dir = project(&[("1_a.sql", "CREATE TABLE a (id int);")]);
        let engine = MigrationEngine::new(
            MigrationConfig::new()
                .migrations_dir(dir.path().join("migrations"))
                .dry_run(true),
        );
        let mut conn = MemoryConnection::new();

        let result = engine.migrate(&mut conn).await.unwrap();

        assert!(result.dry_run);
        assert_eq!(result.applied.len(), 1);
        assert!(result.summary().starts_with("1 migrations to apply"));
        assert!(!conn.has_history_table());
        assert!(conn.executed().is_empty());
    }

    #[tokio::test]
    async fn test_migrations_disabled() {
        let dir = project(&[("1_a.sql", "CREATE TABLE a (id int);")]);
        let engine = MigrationEngine::new(
            MigrationConfig::new()
                .migrations_dir(dir.path().join("migrations"))
                .migrations_enabled(false),
        );
        let mut conn = MemoryConnection::new();

        let result = engine.migrate(&mut conn).await.unwrap();

        assert!(!result.has_changes());
        assert!(conn.log().is_empty());
    }

    #[tokio::test]
    async fn test_drift_is_reported_not_fatal() {
        let dir = project(&[("1_a.sql", "SELECT 1;"), ("3_c.sql", "SELECT 3;")]);
        let mut conn = MemoryConnection::new().with_history(&[("1", "a"), ("2", "b")]);

        let result = engine(&dir).migrate(&mut conn).await.unwrap();

        assert_eq!(result.applied_versions(), vec![&VersionId::parse("3").unwrap()]);
        assert_eq!(result.missing_local, vec![VersionId::parse("2").unwrap()]);
        assert!(result.summary().contains("1 remote versions missing locally"));
    }

    #[tokio::test]
    async fn test_migrate_and_seed() {
        let dir = project(&[("1_a.sql", "CREATE TABLE a (id int);")]);
        let seed = dir.path().join("seed.sql");
        fs::write(&seed, "INSERT INTO a VALUES (1);").unwrap();
        let engine = MigrationEngine::new(
            MigrationConfig::new()
                .migrations_dir(dir.path().join("migrations"))
                .seed_paths([seed.clone()]),
        );
        let mut conn = MemoryConnection::new();

        let result = engine.migrate_and_seed(&mut conn).await.unwrap();

        assert_eq!(result.seeds.applied, vec![seed]);
        assert_eq!(
            conn.executed(),
            ["CREATE TABLE a (id int);", "INSERT INTO a VALUES (1);"]
        );

        let again = engine.migrate_and_seed(&mut conn).await.unwrap();
        assert!(!again.has_changes());
        assert_eq!(again.seeds.skipped.len(), 1);
    }

    #[tokio::test]
    async fn test_status_ignores_target() {
        let dir = project(&[("1_a.sql", "SELECT 1;"), ("2_b.sql", "SELECT 2;")]);
        let engine = MigrationEngine::new(
            MigrationConfig::new()
                .migrations_dir(dir.path().join("migrations"))
                .target_version(VersionId::parse("1").ok()),
        );
        let mut conn = MemoryConnection::new().with_history(&[("1", "a")]);

        let status = engine.status(&mut conn).await.unwrap();

        assert_eq!(status.pending_local, vec![VersionId::parse("2").unwrap()]);
        assert!(status.above_ceiling.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_while_reading_history() {
        let dir = project(&[("1_a.sql", "SELECT 1;")]);
        let token = CancellationToken::new();
        let engine = engine(&dir).with_cancellation(token.clone());
        let mut conn = MemoryConnection::new().hang_on("SELECT version, name");

        let cancel = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            token.cancel();
        });

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            engine.migrate(&mut conn),
        )
        .await
        .expect("history read was not interrupted");
        cancel.await.unwrap();

        assert!(matches!(result, Err(MigrationError::Cancelled)));
        assert_eq!(conn.cancel_requests(), 1);
        assert!(!conn.has_history_table());
    }

    #[tokio::test]
    async fn test_status_honors_cancellation() {
        let dir = project(&[("1_a.sql", "SELECT 1;")]);
        let token = CancellationToken::new();
        token.cancel();
        let engine = engine(&dir).with_cancellation(token);
        let mut conn = MemoryConnection::new().hang_on("SELECT version, name");

        let err = engine.status(&mut conn).await.unwrap_err();

        assert!(matches!(err, MigrationError::Cancelled));
    }
}
