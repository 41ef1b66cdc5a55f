//! Reconciling local migration files with the remote history.

use serde::Serialize;

use crate::file::MigrationFile;
use crate::version::VersionId;

/// The partition of local and remote versions.
///
/// Every version in either input appears in exactly one list, and each list
/// is ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationResult {
    /// Present locally and recorded remotely.
    pub in_sync: Vec<VersionId>,
    /// Present locally and not yet recorded remotely.
    pub pending_local: Vec<VersionId>,
    /// Recorded remotely without a local file.
    pub missing_local: Vec<VersionId>,
    /// Pending locally, but beyond the requested target version.
    pub above_ceiling: Vec<VersionId>,
}

impl ReconciliationResult {
    /// Check if nothing needs to be applied.
    pub fn is_up_to_date(&self) -> bool {
        self.pending_local.is_empty()
    }

    /// Check if the remote history has versions unknown locally.
    pub fn has_drift(&self) -> bool {
        !self.missing_local.is_empty()
    }

    /// One row per version across all lists, ascending.
    pub fn rows(&self) -> Vec<VersionRow> {
        let mut rows: Vec<VersionRow> = self
            .in_sync
            .iter()
            .map(|v| VersionRow::new(v, VersionStatus::InSync))
            .chain(
                self.pending_local
                    .iter()
                    .map(|v| VersionRow::new(v, VersionStatus::PendingLocal)),
            )
            .chain(
                self.missing_local
                    .iter()
                    .map(|v| VersionRow::new(v, VersionStatus::MissingLocal)),
            )
            .chain(
                self.above_ceiling
                    .iter()
                    .map(|v| VersionRow::new(v, VersionStatus::AboveCeiling)),
            )
            .collect();
        rows.sort_by(|a, b| a.version.cmp(&b.version));
        rows
    }
}

/// Where a version stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    /// Applied and present locally.
    InSync,
    /// Local only, will be applied.
    PendingLocal,
    /// Remote only.
    MissingLocal,
    /// Local only, beyond the target version.
    AboveCeiling,
}

/// A single version with its status, as rendered by `migrate list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionRow {
    /// The version.
    pub version: VersionId,
    /// Its status.
    pub status: VersionStatus,
}

impl VersionRow {
    fn new(version: &VersionId, status: VersionStatus) -> Self {
        Self {
            version: version.clone(),
            status,
        }
    }

    /// Check if a local file exists for this version.
    pub fn is_local(&self) -> bool {
        self.status != VersionStatus::MissingLocal
    }

    /// Check if the version is recorded remotely.
    pub fn is_remote(&self) -> bool {
        matches!(self.status, VersionStatus::InSync | VersionStatus::MissingLocal)
    }
}

/// Computes which local migrations still need to run.
///
/// Pure: it never touches the database or the file system.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    ceiling: Option<VersionId>,
}

impl Reconciler {
    /// Create a reconciler with no target version.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only treat versions up to and including `ceiling` as pending.
    pub fn with_ceiling(mut self, ceiling: Option<VersionId>) -> Self {
        self.ceiling = ceiling;
        self
    }

    /// The target version, if any.
    pub fn ceiling(&self) -> Option<&VersionId> {
        self.ceiling.as_ref()
    }

    /// Merge two ascending version lists.
    pub fn diff(&self, local: &[VersionId], remote: &[VersionId]) -> ReconciliationResult {
        debug_assert!(local.is_sorted(), "local versions must be ascending");
        debug_assert!(remote.is_sorted(), "remote versions must be ascending");

        let mut result = ReconciliationResult::default();
        let (mut i, mut j) = (0, 0);

        while i < local.len() && j < remote.len() {
            match local[i].cmp(&remote[j]) {
                std::cmp::Ordering::Equal => {
                    result.in_sync.push(local[i].clone());
                    i += 1;
                    j += 1;
                }
                std::cmp::Ordering::Less => {
                    self.push_pending(&mut result, &local[i]);
                    i += 1;
                }
                std::cmp::Ordering::Greater => {
                    result.missing_local.push(remote[j].clone());
                    j += 1;
                }
            }
        }
        for version in &local[i..] {
            self.push_pending(&mut result, version);
        }
        result.missing_local.extend_from_slice(&remote[j..]);

        result
    }

    /// Diff local files against remote versions and select the pending files.
    pub fn plan(
        &self,
        local: &[MigrationFile],
        remote: &[VersionId],
    ) -> (ReconciliationResult, Vec<MigrationFile>) {
        let versions: Vec<VersionId> = local.iter().map(|f| f.version.clone()).collect();
        let result = self.diff(&versions, remote);

        let mut wanted = result.pending_local.iter().peekable();
        let pending = local
            .iter()
            .filter(|file| {
                if wanted.peek() == Some(&&file.version) {
                    wanted.next();
                    true
                } else {
                    false
                }
            })
            .cloned()
            .collect();

        (result, pending)
    }

    fn push_pending(&self, result: &mut ReconciliationResult, version: &VersionId) {
        match &self.ceiling {
            Some(ceiling) if version > ceiling => result.above_ceiling.push(version.clone()),
            _ => result.pending_local.push(version.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn vs(raw: &[&str]) -> Vec<VersionId> {
        raw.iter().map(|s| VersionId::parse(s).unwrap()).collect()
    }

    #[test]
    fn test_fresh_database() {
        let result = Reconciler::new().diff(&vs(&["1", "2", "3"]), &[]);
        assert_eq!(result.pending_local, vs(&["1", "2", "3"]));
        assert!(result.in_sync.is_empty());
        assert!(result.missing_local.is_empty());
    }

    #[test]
    fn test_up_to_date() {
        let result = Reconciler::new().diff(&vs(&["1", "2"]), &vs(&["1", "2"]));
        assert_eq!(result.in_sync, vs(&["1", "2"]));
        assert!(result.is_up_to_date());
        assert!(!result.has_drift());
    }

    #[test]
    fn test_interleaved() {
        let result = Reconciler::new().diff(&vs(&["1", "3", "5"]), &vs(&["2", "3", "4"]));
        assert_eq!(result.in_sync, vs(&["3"]));
        assert_eq!(result.pending_local, vs(&["1", "5"]));
        assert_eq!(result.missing_local, vs(&["2", "4"]));
    }

    #[test]
    fn test_remote_only() {
        let result = Reconciler::new().diff(&[], &vs(&["20220727064247"]));
        assert_eq!(result.missing_local, vs(&["20220727064247"]));
        assert!(result.has_drift());
    }

    #[test]
    fn test_numeric_ordering_across_widths() {
        let result = Reconciler::new().diff(&vs(&["9", "10", "20220727064246"]), &vs(&["10"]));
        assert_eq!(result.in_sync, vs(&["10"]));
        assert_eq!(result.pending_local, vs(&["9", "20220727064246"]));
    }

    #[test]
    fn test_ceiling() {
        let reconciler = Reconciler::new().with_ceiling(Some(VersionId::parse("3").unwrap()));
        let result = reconciler.diff(&vs(&["1", "2", "3", "4", "5"]), &vs(&["1"]));

        assert_eq!(result.in_sync, vs(&["1"]));
        assert_eq!(result.pending_local, vs(&["2", "3"]));
        assert_eq!(result.above_ceiling, vs(&["4", "5"]));
        assert!(result.missing_local.is_empty());
    }

    #[test]
    fn test_partition_covers_every_version_once() {
        let local = vs(&["1", "2", "4", "7", "8"]);
        let remote = vs(&["2", "3", "7", "9"]);
        let reconciler = Reconciler::new().with_ceiling(Some(VersionId::parse("7").unwrap()));
        let result = reconciler.diff(&local, &remote);

        let rows = result.rows();
        let listed: Vec<_> = rows.iter().map(|r| r.version.clone()).collect();
        assert_eq!(listed, vs(&["1", "2", "3", "4", "7", "8", "9"]));

        let local_rows: Vec<_> = rows.iter().filter(|r| r.is_local()).map(|r| r.version.clone()).collect();
        let remote_rows: Vec<_> = rows.iter().filter(|r| r.is_remote()).map(|r| r.version.clone()).collect();
        assert_eq!(local_rows, local);
        assert_eq!(remote_rows, remote);
    }

    #[test]
    fn test_plan_selects_pending_files() {
        let local: Vec<_> = ["1", "2", "3"]
            .iter()
            .map(|v| MigrationFile::new(VersionId::parse(v).unwrap(), format!("m{v}"), ""))
            .collect();

        let (result, pending) = Reconciler::new().plan(&local, &vs(&["2"]));

        assert_eq!(result.pending_local, vs(&["1", "3"]));
        let names: Vec<_> = pending.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["m1", "m3"]);
    }
}
