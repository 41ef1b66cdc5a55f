//! Migration history tracking.

use serde::Serialize;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::error::{DbError, MigrateResult, MigrationError};
use crate::version::VersionId;

/// Schema holding the engine's bookkeeping tables.
pub const DEFAULT_SCHEMA: &str = "tidemark_migrations";

/// Table recording applied migrations.
pub const DEFAULT_HISTORY_TABLE: &str = "schema_migrations";

/// Outcome of reading a bookkeeping table that may not exist yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableLoad<T> {
    /// The table (or its schema) does not exist.
    NotFound,
    /// The table was read successfully.
    Rows(T),
    /// The table exists but does not have the expected shape.
    Malformed(String),
}

/// A record of an applied migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryRecord {
    /// Applied version.
    pub version: VersionId,
    /// Name recorded with it.
    pub name: String,
}

/// Result of reading the history table.
pub type HistoryLoad = TableLoad<Vec<HistoryRecord>>;

/// Reads and writes the history table.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    schema: String,
    table: String,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_SCHEMA, DEFAULT_HISTORY_TABLE)
    }
}

impl HistoryStore {
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

    /// Query listing applied migrations.
    pub fn select_sql(&self) -> String {
        format!("SELECT version, name FROM {}", self.table_name())
    }

    /// Statements creating the schema and table.
    pub fn create_sql(&self) -> String {
        format!(
            "CREATE SCHEMA IF NOT EXISTS {};\n\
             CREATE TABLE IF NOT EXISTS {} (\n    \
                 version text NOT NULL PRIMARY KEY,\n    \
                 name text NOT NULL,\n    \
                 applied_at timestamptz NOT NULL DEFAULT now()\n\
             );",
            quote_ident(&self.schema),
            self.table_name()
        )
    }

    /// Statement inserting one history row.
    pub fn insert_sql(&self) -> String {
        format!(
            "INSERT INTO {} (version, name) VALUES ($1, $2)",
            self.table_name()
        )
    }

    /// Read the history table without interpreting its absence.
    pub async fn load<C>(&self, conn: &mut C) -> Result<HistoryLoad, DbError>
    where
        C: Connection + ?Sized,
    {
        let rows = match read_table(conn, &self.select_sql(), 2).await? {
            TableLoad::Rows(rows) => rows,
            TableLoad::NotFound => return Ok(TableLoad::NotFound),
            TableLoad::Malformed(detail) => return Ok(TableLoad::Malformed(detail)),
        };

        let mut records = Vec::with_capacity(rows.len());
        for mut row in rows {
            let name = row.pop().unwrap_or_default();
            let raw = row.pop().unwrap_or_default();
            match VersionId::parse(&raw) {
                Ok(version) => records.push(HistoryRecord { version, name }),
                Err(e) => warn!(version = %raw, error = %e, "Ignoring non-numeric history entry"),
            }
        }
        Ok(TableLoad::Rows(records))
    }

    /// Applied migrations in ascending version order.
    ///
    /// A missing table reads as an empty history; a malformed one is fatal.
    pub async fn load_records<C>(&self, conn: &mut C) -> MigrateResult<Vec<HistoryRecord>>
    where
        C: Connection + ?Sized,
    {
        match self.load(conn).await.map_err(MigrationError::from_db)? {
            TableLoad::NotFound => {
                debug!(table = %self.table_name(), "History table does not exist yet");
                Ok(Vec::new())
            }
            TableLoad::Malformed(detail) => Err(MigrationError::schema(format!(
                "{}: {}",
                self.table_name(),
                detail
            ))),
            TableLoad::Rows(mut records) => {
                records.sort_by(|a, b| a.version.cmp(&b.version));
                records.dedup_by(|b, a| {
                    let duplicate = a.version == b.version;
                    if duplicate {
                        warn!(first = %a.version, second = %b.version, "History contains equal versions");
                    }
                    duplicate
                });
                Ok(records)
            }
        }
    }

    /// Applied versions in ascending order.
    pub async fn load_applied<C>(&self, conn: &mut C) -> MigrateResult<Vec<VersionId>>
    where
        C: Connection + ?Sized,
    {
        Ok(self
            .load_records(conn)
            .await?
            .into_iter()
            .map(|r| r.version)
            .collect())
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

    /// Insert one history row.
    ///
    /// Runs on whatever transaction the caller has open and never commits.
    pub async fn record<C>(&self, conn: &mut C, version: &VersionId, name: &str) -> Result<(), DbError>
    where
        C: Connection + ?Sized,
    {
        conn.execute(&self.insert_sql(), &[version.as_str(), name])
            .await?;
        Ok(())
    }
}

/// Run `sql` and check every row has `columns` non-NULL values.
pub(crate) async fn read_table<C>(
    conn: &mut C,
    sql: &str,
    columns: usize,
) -> Result<TableLoad<Vec<Vec<String>>>, DbError>
where
    C: Connection + ?Sized,
{
    let rows = match conn.simple_query(sql).await {
        Ok(rows) => rows,
        Err(e) if e.is_undefined_table() => return Ok(TableLoad::NotFound),
        Err(e) if e.is_undefined_column() => return Ok(TableLoad::Malformed(e.message)),
        Err(e) => return Err(e),
    };

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        if row.len() != columns {
            return Ok(TableLoad::Malformed(format!(
                "expected {} columns, got {}",
                columns,
                row.len()
            )));
        }
        let mut values = Vec::with_capacity(columns);
        for (i, value) in row.into_iter().enumerate() {
            match value {
                Some(value) => values.push(value),
                None => return Ok(TableLoad::Malformed(format!("NULL in column {}", i + 1))),
            }
        }
        out.push(values);
    }
    Ok(TableLoad::Rows(out))
}

/// Quote a PostgreSQL identifier.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub(crate) fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}
