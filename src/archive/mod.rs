//! The unified transcript archive.
//!
//! Layout: `<root>/<normalized project>/<session>.jsonl`. Archive paths are
//! always relative to the root and `/`-separated so they are stable across
//! machines and usable as index keys.

pub mod sync;

use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

pub use sync::{spawn_sync, SourceLayout, SyncEngine, SyncIssue, SyncReport};

/// Which transcript layout a source directory follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceProvider {
    /// `~/.claude/projects/<encoded-dir>/<session>.jsonl`
    Claude,
    /// `~/.pi/agent/sessions/--<encoded-dir>--/<session>.jsonl`
    Pi,
}

impl SourceProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceProvider::Claude => "claude",
            SourceProvider::Pi => "pi",
        }
    }
}

/// A transcript found in a source layout.
#[derive(Debug, Clone)]
pub struct ConversationFile {
    pub source_provider: SourceProvider,
    /// Raw directory name, before normalization.
    pub project_name: String,
    pub path: PathBuf,
    pub modified_at: SystemTime,
    pub size_bytes: u64,
}

impl ConversationFile {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// A transcript as it exists in the archive.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchivedFile {
    pub archive_path: String,
    pub normalized_project: String,
    pub path: PathBuf,
    pub modified_at: SystemTime,
    pub size_bytes: u64,
}

impl ArchivedFile {
    pub fn from_metadata(root: &Path, path: &Path, metadata: &Metadata) -> Option<Self> {
        let relative = path.strip_prefix(root).ok()?;
        let archive_path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        Some(Self {
            normalized_project: crate::transcript::project_from_archive_path(&archive_path),
            archive_path,
            path: path.to_path_buf(),
            modified_at: metadata.modified().unwrap_or(UNIX_EPOCH),
            size_bytes: metadata.len(),
        })
    }

    /// Modification signature stored as the index marker.
    pub fn marker(&self) -> String {
        format!("{}:{}", system_time_millis(self.modified_at), self.size_bytes)
    }
}

/// Strip the `--name--` wrapping one provider puts around directory names.
///
/// Bare names pass through untouched, so the function is idempotent. A name
/// made only of dashes normalizes to the empty string.
pub fn normalize_project_name(name: &str) -> String {
    if name.chars().all(|c| c == '-') {
        return String::new();
    }
    match name
        .strip_prefix("--")
        .and_then(|rest| rest.strip_suffix("--"))
    {
        Some(inner) => inner.to_string(),
        None => name.to_string(),
    }
}

/// Archive-relative path for a file of the given normalized project.
pub fn archive_path_for(normalized_project: &str, file_name: &str) -> String {
    if normalized_project.is_empty() {
        file_name.to_string()
    } else {
        format!("{normalized_project}/{file_name}")
    }
}

pub fn system_time_millis(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn is_transcript(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .map(|n| n.to_string_lossy().starts_with('.'))
        .unwrap_or(true);
    !hidden && path.extension().is_some_and(|ext| ext == "jsonl")
}

/// Every transcript currently in the archive, ordered by archive path.
///
/// In-flight `.partial` copies are never listed.
pub fn list_archived_files(root: &Path) -> Result<Vec<ArchivedFile>> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).max_depth(2) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable archive entry");
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_transcript(entry.path()) {
            continue;
        }
        let metadata = entry
            .metadata()
            .with_context(|| format!("failed to stat {}", entry.path().display()))?;
        if let Some(file) = ArchivedFile::from_metadata(root, entry.path(), &metadata) {
            files.push(file);
        }
    }

    files.sort_by(|a, b| a.archive_path.cmp(&b.archive_path));
    Ok(files)
}

/// Look up one archived file by its archive path.
pub fn archived_file(root: &Path, archive_path: &str) -> Option<ArchivedFile> {
    let path = root.join(archive_path);
    let metadata = std::fs::metadata(&path).ok()?;
    if !metadata.is_file() {
        return None;
    }
    ArchivedFile::from_metadata(root, &path, &metadata)
}
