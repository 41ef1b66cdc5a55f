//! # tidemark-migrate
//!
//! Migration engine for Tidemark.
//!
//! This crate provides functionality for:
//! - Discovering versioned `.sql` migration files on disk
//! - Reading and writing the migration history table in the database
//! - Reconciling local files against the recorded history
//! - Applying pending migrations one transaction per file, in version order
//! - Applying seed files once per distinct content
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌────────────────┐
//! │ MigrationSource  │────▶│                │     ┌─────────────┐     ┌────────────┐
//! └──────────────────┘     │   Reconciler   │────▶│   Applier   │────▶│ SeedRunner │
//! ┌──────────────────┐     │                │     └─────────────┘     └────────────┘
//! │  HistoryStore    │────▶│                │            │
//! └──────────────────┘     └────────────────┘            ▼
//!                                                 ┌─────────────┐
//!                                                 │ History Tbl │
//!                                                 └─────────────┘
//! ```
//!
//! The engine talks to the database only through the [`Connection`] trait.
//! `tidemark-postgres` provides the PostgreSQL implementation.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tidemark_migrate::{MigrationConfig, MigrationEngine};
//!
//! async fn run(conn: &mut impl tidemark_migrate::Connection) -> tidemark_migrate::MigrateResult<()> {
//!     let config = MigrationConfig::new()
//!         .migrations_dir("./migrations")
//!         .seed_paths(["./seed.sql"]);
//!
//!     let engine = MigrationEngine::new(config);
//!
//!     let plan = engine.plan(conn).await?;
//!     println!("Plan: {}", plan.summary());
//!
//!     let result = engine.migrate_and_seed(conn).await?;
//!     println!("{}", result.summary());
//!     Ok(())
//! }
//! ```
//!
//! ## Migration Files
//!
//! Migrations are flat files named `<version>_<name>.sql`, where the version is
//! numeric (normally a `YYYYMMDDHHMMSS` UTC timestamp):
//!
//! ```text
//! migrations/
//! ├── 20231215120000_create_users.sql
//! ├── 20231216090000_add_posts.sql
//! └── 20231217080000_index_posts.notx.sql   # runs outside a transaction
//! ```
//!
//! Files that do not match the pattern are ignored.

pub mod apply;
pub mod connection;
pub mod engine;
pub mod error;
pub mod file;
pub mod history;
pub mod reconcile;
pub mod seed;
pub mod sql;
pub mod version;

#[cfg(any(test, feature = "testing"))]
pub mod memory;

// Re-exports
pub use apply::{AppliedMigration, Applier, MigrationState};
pub use connection::{Connection, TextRow};
pub use engine::{MigrationConfig, MigrationEngine, MigrationPlan, MigrationResult};
pub use error::{DbError, MigrateResult, MigrationError};
pub use file::{ExecutionMode, MigrationFile, MigrationSource};
pub use history::{HistoryLoad, HistoryRecord, HistoryStore, TableLoad};
pub use reconcile::{ReconciliationResult, Reconciler, VersionRow, VersionStatus};
pub use seed::{SeedFile, SeedReport, SeedRunner, SeedStore, collect_seed_files};
pub use version::{ParseVersionError, VersionId};

#[cfg(any(test, feature = "testing"))]
pub use memory::MemoryConnection;

pub use tokio_util::sync::CancellationToken;
