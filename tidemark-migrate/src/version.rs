//! Migration version identifiers.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Width of a timestamp version (`YYYYMMDDHHMMSS`).
pub const TIMESTAMP_WIDTH: usize = 14;

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Ordering key of a migration.
///
/// Versions are ASCII digit strings of at most 14 characters. Ordering is
/// numeric: both sides are compared as if left-padded to the same width, so
/// `"9"` sorts before `"10"` and legacy short versions sort before timestamps.
/// Versions with the same numeric value are equal (`"01" == "1"`).
#[derive(Clone, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct VersionId(String);

/// Why a string is not a valid version.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseVersionError {
    /// The string was empty.
    #[error("version is empty")]
    Empty,
    /// The string contained something other than ASCII digits.
    #[error("version '{0}' contains non-digit characters")]
    NotNumeric(String),
    /// The string is longer than a timestamp.
    #[error("version '{0}' is longer than {TIMESTAMP_WIDTH} digits")]
    TooLong(String),
}

impl VersionId {
    /// Parse a version string.
    pub fn parse(raw: &str) -> Result<Self, ParseVersionError> {
        if raw.is_empty() {
            return Err(ParseVersionError::Empty);
        }
        if !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseVersionError::NotNumeric(raw.to_string()));
        }
        if raw.len() > TIMESTAMP_WIDTH {
            return Err(ParseVersionError::TooLong(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    /// A timestamp version for the current UTC time.
    pub fn now() -> Self {
        Self(Utc::now().format(TIMESTAMP_FORMAT).to_string())
    }

    /// The version exactly as written.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Interpret a 14-digit version as a UTC timestamp.
    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        if self.0.len() != TIMESTAMP_WIDTH {
            return None;
        }
        NaiveDateTime::parse_from_str(&self.0, TIMESTAMP_FORMAT).ok()
    }

    /// Digits without leading zeros; `"0"` for an all-zero version.
    fn significant(&self) -> &str {
        let trimmed = self.0.trim_start_matches('0');
        if trimmed.is_empty() { "0" } else { trimmed }
    }
}

impl PartialEq for VersionId {
    fn eq(&self, other: &Self) -> bool {
        self.significant() == other.significant()
    }
}

impl Eq for VersionId {}

impl Ord for VersionId {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = (self.significant(), other.significant());
        a.len().cmp(&b.len()).then_with(|| a.cmp(b))
    }
}

impl PartialOrd for VersionId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for VersionId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.significant().hash(state);
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VersionId({})", self.0)
    }
}

impl FromStr for VersionId {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VersionId {
    type Error = ParseVersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<VersionId> for String {
    fn from(version: VersionId) -> Self {
        version.0
    }
}
