//! # Tidemark
//!
//! Versioned SQL migrations and seed data for PostgreSQL.
//!
//! Tidemark provides:
//! - Timestamp-versioned migration files read from a directory
//! - Reconciliation of local files against the database's history table
//! - Transactional apply with rollback and cancellation
//! - Content-fingerprinted seed files that run exactly once
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tidemark::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut conn = PgConnection::connect_url("postgresql://localhost/mydb").await?;
//!
//!     let config = MigrationConfig::new()
//!         .migrations_dir("./migrations")
//!         .seed_paths(["./seed.sql"]);
//!     let result = MigrationEngine::new(config).migrate_and_seed(&mut conn).await?;
//!
//!     println!("{}", result.summary());
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// Migration engine: versions, reconciliation, apply and seeding.
pub mod migrate {
    pub use tidemark_migrate::*;
}

/// PostgreSQL driver.
#[cfg(feature = "postgres")]
#[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
pub mod postgres {
    pub use tidemark_postgres::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::migrate::{
        CancellationToken, Connection, MigrationConfig, MigrationEngine, MigrationError,
        MigrationResult, VersionId,
    };
    #[cfg(feature = "postgres")]
    pub use crate::postgres::{PgConfig, PgConnection};
}

// Re-export key types at the crate root
pub use migrate::{MigrateResult, MigrationError};
