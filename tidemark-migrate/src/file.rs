//! Local migration discovery.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{MigrateResult, MigrationError};
use crate::sql::requires_no_transaction;
use crate::version::VersionId;

/// File-name markers that force non-transactional execution.
const NO_TRANSACTION_MARKERS: &[&str] = &["notx", "no_transaction"];

/// How a migration's SQL is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// The whole file and its history row commit atomically.
    Transactional,
    /// Statements run one by one outside a transaction block.
    NonTransactional,
}

/// A migration file on disk.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationFile {
    /// Version parsed from the file name.
    pub version: VersionId,
    /// Human readable name (the slug after the version).
    pub name: String,
    /// Path to the file.
    pub path: PathBuf,
    /// Marker between the slug and `.sql`, e.g. `notx`.
    pub marker: Option<String>,
    /// Raw SQL content.
    #[serde(skip)]
    pub sql: String,
}

impl MigrationFile {
    /// Create a migration from its parts.
    pub fn new(version: VersionId, name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            version,
            name: name.into(),
            path: PathBuf::new(),
            marker: None,
            sql: sql.into(),
        }
    }

    /// Set the path for this migration file.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// Set the file-name marker.
    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = Some(marker.into());
        self
    }

    /// File name as it appears in the directory.
    pub fn file_name(&self) -> String {
        match &self.marker {
            Some(marker) => format!("{}_{}.{}.sql", self.version, self.name, marker),
            None => format!("{}_{}.sql", self.version, self.name),
        }
    }

    /// Decide whether this file can run inside a transaction.
    pub fn execution_mode(&self) -> ExecutionMode {
        let marked = self
            .marker
            .as_deref()
            .is_some_and(|m| NO_TRANSACTION_MARKERS.contains(&m));

        if marked || requires_no_transaction(&self.sql) {
            ExecutionMode::NonTransactional
        } else {
            ExecutionMode::Transactional
        }
    }
}

/// Parsed pieces of `<version>_<slug>[.<marker>].sql`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFileName {
    /// Version prefix.
    pub version: VersionId,
    /// Slug.
    pub name: String,
    /// Optional marker.
    pub marker: Option<String>,
}

/// Parse a migration file name, returning `None` for anything that is not one.
pub fn parse_file_name(file_name: &str) -> Option<MigrationFileName> {
    let stem = file_name.strip_suffix(".sql")?;
    let (version, rest) = stem.split_once('_')?;
    let version = VersionId::parse(version).ok()?;

    let (name, marker) = match rest.rsplit_once('.') {
        Some((name, marker)) if !marker.is_empty() => (name, Some(marker.to_string())),
        Some(_) => return None,
        None => (rest, None),
    };

    if name.is_empty() {
        return None;
    }

    Some(MigrationFileName {
        version,
        name: name.to_string(),
        marker,
    })
}

/// Reads migrations from a directory.
#[derive(Debug, Clone)]
pub struct MigrationSource {
    migrations_dir: PathBuf,
}

impl MigrationSource {
    /// Create a source rooted at `migrations_dir`.
    pub fn new(migrations_dir: impl Into<PathBuf>) -> Self {
        Self {
            migrations_dir: migrations_dir.into(),
        }
    }

    /// Get the migrations directory.
    pub fn migrations_dir(&self) -> &Path {
        &self.migrations_dir
    }

    /// List every migration, ascending by version.
    ///
    /// A missing directory yields no migrations. Files whose names do not
    /// parse are skipped. Two files with the same version abort the scan.
    pub fn scan(&self) -> MigrateResult<Vec<MigrationFile>> {
        let entries = match fs::read_dir(&self.migrations_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(dir = %self.migrations_dir.display(), "Migrations directory does not exist");
                return Ok(Vec::new());
            }
            Err(e) => return Err(self.invalid_directory(e)),
        };

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| self.invalid_directory(e))?;
            let file_type = entry.file_type().map_err(|e| self.invalid_directory(e))?;
            if file_type.is_dir() {
                continue;
            }

            let Some(file_name) = entry.file_name().to_str().map(String::from) else {
                continue;
            };

            match parse_file_name(&file_name) {
                Some(parsed) => found.push((parsed, file_name, entry.path())),
                None if file_name.ends_with(".sql") => {
                    warn!(
                        file = %file_name,
                        "Skipping migration (file name must match <version>_<name>.sql)"
                    );
                }
                None => debug!(file = %file_name, "Ignoring non-migration file"),
            }
        }

        found.sort_by(|a, b| a.0.version.cmp(&b.0.version).then_with(|| a.1.cmp(&b.1)));

        for pair in found.windows(2) {
            if pair[0].0.version == pair[1].0.version {
                return Err(MigrationError::DuplicateVersion {
                    version: pair[1].0.version.clone(),
                    first: pair[0].1.clone(),
                    second: pair[1].1.clone(),
                });
            }
        }

        let mut migrations = Vec::with_capacity(found.len());
        for (parsed, _, path) in found {
            let sql = fs::read_to_string(&path)?;
            migrations.push(MigrationFile {
                version: parsed.version,
                name: parsed.name,
                path,
                marker: parsed.marker,
                sql,
            });
        }

        debug!(count = migrations.len(), "Loaded local migrations");
        Ok(migrations)
    }

    /// Write an empty migration stamped with the current UTC time.
    pub fn create(&self, name: &str) -> MigrateResult<PathBuf> {
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(MigrationError::config(format!(
                "invalid migration name '{}': use letters, digits, '_' or '-'",
                name
            )));
        }

        fs::create_dir_all(&self.migrations_dir)?;

        let path = self
            .migrations_dir
            .join(format!("{}_{}.sql", VersionId::now(), name));
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;

        debug!(path = %path.display(), "Created migration");
        Ok(path)
    }

    fn invalid_directory(&self, source: io::Error) -> MigrationError {
        MigrationError::InvalidDirectory {
            path: self.migrations_dir.clone(),
            source,
        }
    }
}
