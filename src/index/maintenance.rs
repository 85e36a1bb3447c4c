//! Bulk index upkeep: cleanup, verify, repair, rebuild.
//!
//! Every mode is idempotent and tolerates a concurrent sync or index run:
//! files another process holds are counted as busy, never forced.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use tracing::info;

use super::maintainer::{IndexMaintainer, IndexReport};
use super::state;
use super::store::{self, LogOperation};
use crate::archive;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceMode {
    /// Index every archived file whose state is stale or absent.
    Cleanup,
    /// Report inconsistencies without changing anything.
    Verify,
    /// Remove orphans and re-index what verify flags.
    Repair,
    /// Drop the whole index and build it again from the archive.
    Rebuild,
}

/// Inconsistencies between the archive and the index.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VerifyReport {
    /// Entries whose archived file no longer exists.
    pub orphaned_entries: Vec<String>,
    /// State rows whose archived file no longer exists.
    pub orphaned_states: Vec<String>,
    /// Archived files the index has never seen.
    pub unindexed_files: Vec<String>,
    /// Archived files that changed or failed since their last index.
    pub stale_files: Vec<String>,
    /// Files with entries lacking a vector row.
    pub missing_vectors: Vec<String>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.orphaned_entries.is_empty()
            && self.orphaned_states.is_empty()
            && self.unindexed_files.is_empty()
            && self.stale_files.is_empty()
            && self.missing_vectors.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MaintenanceReport {
    pub mode: MaintenanceMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify: Option<VerifyReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<IndexReport>,
    pub orphans_removed: usize,
}

pub fn run_maintenance(mode: MaintenanceMode, maintainer: &IndexMaintainer<'_>) -> Result<MaintenanceReport> {
    let report = match mode {
        MaintenanceMode::Cleanup => MaintenanceReport {
            mode,
            verify: None,
            index: Some(maintainer.index_pending()?),
            orphans_removed: 0,
        },
        MaintenanceMode::Verify => MaintenanceReport {
            mode,
            verify: Some(verify(maintainer)?),
            index: None,
            orphans_removed: 0,
        },
        MaintenanceMode::Repair => repair(maintainer)?,
        MaintenanceMode::Rebuild => rebuild(maintainer)?,
    };
    info!(mode = ?mode, orphans_removed = report.orphans_removed, "maintenance complete");
    Ok(report)
}

pub fn verify(maintainer: &IndexMaintainer<'_>) -> Result<VerifyReport> {
    let conn = maintainer.conn();
    let files = archive::list_archived_files(maintainer.archive_root())?;
    let by_path: HashMap<&str, &archive::ArchivedFile> =
        files.iter().map(|f| (f.archive_path.as_str(), f)).collect();

    let mut report = VerifyReport::default();

    for path in store::indexed_paths(conn)? {
        if !by_path.contains_key(path.as_str()) {
            report.orphaned_entries.push(path);
        }
    }

    let states = state::all_states(conn)?;
    let mut seen = BTreeSet::new();
    for s in &states {
        seen.insert(s.archive_path.as_str());
        match by_path.get(s.archive_path.as_str()) {
            None => report.orphaned_states.push(s.archive_path.clone()),
            Some(file) => {
                let current = s.marker.as_deref() == Some(file.marker().as_str());
                if !current || s.last_error.is_some() {
                    report.stale_files.push(s.archive_path.clone());
                }
            }
        }
    }

    for file in &files {
        if !seen.contains(file.archive_path.as_str()) {
            report.unindexed_files.push(file.archive_path.clone());
        }
    }

    report.missing_vectors = store::paths_missing_vectors(conn)?
        .into_iter()
        .filter(|p| by_path.contains_key(p.as_str()))
        .collect();

    Ok(report)
}

fn repair(maintainer: &IndexMaintainer<'_>) -> Result<MaintenanceReport> {
    let found = verify(maintainer)?;
    let conn = maintainer.conn();

    let orphans: BTreeSet<&str> = found
        .orphaned_entries
        .iter()
        .chain(&found.orphaned_states)
        .map(String::as_str)
        .collect();
    let mut orphans_removed = 0;
    for path in &orphans {
        orphans_removed += maintainer.forget_file(path)?;
    }

    maintainer.check_embedding_model()?;
    let flagged: BTreeSet<&str> = found
        .unindexed_files
        .iter()
        .chain(&found.stale_files)
        .chain(&found.missing_vectors)
        .map(String::as_str)
        .collect();
    let mut index = IndexReport::default();
    for path in flagged {
        let Some(file) = archive::archived_file(maintainer.archive_root(), path) else {
            continue;
        };
        let result = maintainer.reindex_file(&file);
        index.record(path, result);
    }

    store::write_audit_log(
        conn,
        LogOperation::Repair,
        "*",
        Some(&serde_json::json!({
            "orphans_removed": orphans_removed,
            "reindexed": index.files_indexed + index.files_excluded,
        })),
    )?;

    Ok(MaintenanceReport {
        mode: MaintenanceMode::Repair,
        verify: Some(found),
        index: Some(index),
        orphans_removed,
    })
}

fn rebuild(maintainer: &IndexMaintainer<'_>) -> Result<MaintenanceReport> {
    maintainer.clear_index()?;
    Ok(MaintenanceReport {
        mode: MaintenanceMode::Rebuild,
        verify: None,
        index: Some(maintainer.index_pending()?),
        orphans_removed: 0,
    })
}
