//! Incremental copy of source transcripts into the archive.
//!
//! Every copy goes through a hidden `.partial` sibling claimed with
//! `create_new`, so concurrent invocations never write the same file and
//! readers never observe a half-written transcript.

use std::fs::{self, File, Metadata, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::{normalize_project_name, ConversationFile, SourceProvider};
use crate::config::{expand_tilde, EchoesConfig};
use crate::error::{ArchiveError, Result};

/// A configured source directory.
#[derive(Debug, Clone)]
pub struct SourceLayout {
    pub provider: SourceProvider,
    pub root: PathBuf,
}

/// One file that could not be synced.
#[derive(Debug, Clone, Serialize)]
pub struct SyncIssue {
    pub path: PathBuf,
    pub message: String,
}

/// Aggregate outcome of one sync run. Never an error: per-file failures land
/// in `errors`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub files_copied: usize,
    pub files_skipped: usize,
    /// Files another invocation was copying at the same moment.
    pub files_in_progress: usize,
    pub errors: Vec<SyncIssue>,
}

enum FileSync {
    Copied,
    Current,
    InProgress,
}

#[derive(Debug, Clone)]
pub struct SyncEngine {
    sources: Vec<SourceLayout>,
    archive_root: PathBuf,
    stale_partial: Duration,
}

impl SyncEngine {
    pub fn new(archive_root: impl Into<PathBuf>, sources: Vec<SourceLayout>) -> Self {
        Self {
            sources,
            archive_root: archive_root.into(),
            stale_partial: Duration::from_secs(600),
        }
    }

    pub fn from_config(config: &EchoesConfig) -> Self {
        let sources = config
            .archive
            .sources
            .iter()
            .map(|s| SourceLayout {
                provider: s.provider,
                root: expand_tilde(&s.path),
            })
            .collect();
        Self::new(config.resolved_archive_root(), sources)
            .with_stale_partial(Duration::from_secs(config.archive.stale_partial_secs))
    }

    pub fn with_stale_partial(mut self, stale_partial: Duration) -> Self {
        self.stale_partial = stale_partial;
        self
    }

    pub fn archive_root(&self) -> &Path {
        &self.archive_root
    }

    /// Enumerate every source transcript. Unreadable entries become issues.
    pub fn discover(&self) -> (Vec<ConversationFile>, Vec<SyncIssue>) {
        let mut files = Vec::new();
        let mut issues = Vec::new();

        for source in &self.sources {
            if !source.root.is_dir() {
                debug!(root = %source.root.display(), provider = source.provider.as_str(), "source directory absent");
                continue;
            }

            let walker = WalkDir::new(&source.root)
                .min_depth(2)
                .max_depth(2)
                .follow_links(true)
                .sort_by_file_name();

            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        let path = e
                            .path()
                            .map(Path::to_path_buf)
                            .unwrap_or_else(|| source.root.clone());
                        warn!(path = %path.display(), error = %e, "skipping unreadable source entry");
                        issues.push(SyncIssue {
                            path,
                            message: e.to_string(),
                        });
                        continue;
                    }
                };

                let path = entry.path();
                if !entry.file_type().is_file()
                    || path.extension().map_or(true, |ext| ext != "jsonl")
                {
                    continue;
                }

                let metadata = match entry.metadata() {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping unreadable source file");
                        issues.push(SyncIssue {
                            path: path.to_path_buf(),
                            message: e.to_string(),
                        });
                        continue;
                    }
                };

                let project_name = path
                    .parent()
                    .and_then(Path::file_name)
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();

                files.push(ConversationFile {
                    source_provider: source.provider,
                    project_name,
                    path: path.to_path_buf(),
                    modified_at: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                    size_bytes: metadata.len(),
                });
            }
        }

        (files, issues)
    }

    /// Copy every new or changed source transcript into the archive.
    pub fn sync(&self) -> SyncReport {
        let (files, issues) = self.discover();
        let mut report = SyncReport {
            errors: issues,
            ..SyncReport::default()
        };

        for file in &files {
            match self.sync_file(file) {
                Ok(FileSync::Copied) => report.files_copied += 1,
                Ok(FileSync::Current) => report.files_skipped += 1,
                Ok(FileSync::InProgress) => report.files_in_progress += 1,
                Err(e) => {
                    warn!(path = %file.path.display(), error = %e, "failed to archive transcript");
                    report.errors.push(SyncIssue {
                        path: file.path.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        info!(
            copied = report.files_copied,
            skipped = report.files_skipped,
            in_progress = report.files_in_progress,
            errors = report.errors.len(),
            "sync complete"
        );
        report
    }

    fn destination(&self, file: &ConversationFile) -> (PathBuf, String) {
        let project = normalize_project_name(&file.project_name);
        let dir = if project.is_empty() {
            self.archive_root.clone()
        } else {
            self.archive_root.join(project)
        };
        (dir, file.file_name())
    }

    fn sync_file(&self, file: &ConversationFile) -> Result<FileSync> {
        let (dir, name) = self.destination(file);
        let dest = dir.join(&name);
        if is_current(&dest, file) {
            return Ok(FileSync::Current);
        }

        fs::create_dir_all(&dir).map_err(|e| internal(e, "create archive directory", &dir))?;

        let partial_path = dir.join(format!(".{name}.partial"));
        let Some(mut partial) = self.claim_partial(&partial_path)? else {
            debug!(path = %dest.display(), "copy already in progress elsewhere");
            return Ok(FileSync::InProgress);
        };

        // Another invocation may have finished between our check and the claim.
        if is_current(&dest, file) {
            let _ = fs::remove_file(&partial_path);
            return Ok(FileSync::Current);
        }

        if let Err(e) = copy_into(file, &mut partial) {
            if still_ours(&partial, &partial_path) {
                let _ = fs::remove_file(&partial_path);
            }
            return Err(e);
        }

        if !publish(partial, &partial_path, &dest)? {
            warn!(path = %dest.display(), "partial copy was reclaimed by another sync, leaving it to finish");
            return Ok(FileSync::InProgress);
        }

        debug!(source = %file.path.display(), dest = %dest.display(), "archived transcript");
        Ok(FileSync::Copied)
    }

    /// `None` when a fresh partial shows another copy is underway.
    fn claim_partial(&self, partial_path: &Path) -> Result<Option<File>> {
        match create_new(partial_path) {
            Ok(f) => return Ok(Some(f)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(internal(e, "create partial copy", partial_path)),
        }

        let age = fs::metadata(partial_path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|t| SystemTime::now().duration_since(t).ok());
        match age {
            Some(age) if age >= self.stale_partial => {
                warn!(path = %partial_path.display(), age_secs = age.as_secs(), "removing abandoned partial copy");
                let _ = fs::remove_file(partial_path);
            }
            _ => return Ok(None),
        }

        match create_new(partial_path) {
            Ok(f) => Ok(Some(f)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(internal(e, "create partial copy", partial_path)),
        }
    }
}

/// Run a sync on the blocking pool. The host may await the handle or drop it.
pub fn spawn_sync(engine: SyncEngine) -> tokio::task::JoinHandle<SyncReport> {
    tokio::task::spawn_blocking(move || engine.sync())
}

/// Rename the partial into place, unless another invocation reclaimed it
/// as stale while we were copying. Returns `false` in that case and leaves
/// their partial alone. The check and the rename are two steps, so a
/// reclaim landing between them can still lose one copy; the next sync
/// detects the size mismatch and copies again.
fn publish(partial: File, partial_path: &Path, dest: &Path) -> Result<bool> {
    if !still_ours(&partial, partial_path) {
        return Ok(false);
    }
    drop(partial);
    if let Err(e) = fs::rename(partial_path, dest) {
        let _ = fs::remove_file(partial_path);
        return Err(internal(e, "rename into place", dest));
    }
    Ok(true)
}

/// `true` while `path` still names the file behind `handle`.
fn still_ours(handle: &File, path: &Path) -> bool {
    match (handle.metadata(), fs::metadata(path)) {
        (Ok(ours), Ok(on_disk)) => same_file(&ours, &on_disk),
        _ => false,
    }
}

#[cfg(unix)]
fn same_file(a: &Metadata, b: &Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

#[cfg(not(unix))]
fn same_file(a: &Metadata, b: &Metadata) -> bool {
    a.len() == b.len() && a.modified().ok() == b.modified().ok()
}

fn create_new(path: &Path) -> io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

/// Same size and stamped no earlier than the source.
fn is_current(dest: &Path, file: &ConversationFile) -> bool {
    match fs::metadata(dest) {
        Ok(meta) => {
            meta.len() == file.size_bytes
                && meta.modified().map_or(false, |m| m >= file.modified_at)
        }
        Err(_) => false,
    }
}

fn copy_into(file: &ConversationFile, partial: &mut File) -> Result<()> {
    let mut source = File::open(&file.path).map_err(|e| ArchiveError::SourceRead {
        path: file.path.clone(),
        source: e,
    })?;
    io::copy(&mut source, partial).map_err(|e| ArchiveError::SourceRead {
        path: file.path.clone(),
        source: e,
    })?;
    partial
        .sync_all()
        .map_err(|e| internal(e, "flush partial copy", &file.path))?;
    partial
        .set_modified(file.modified_at)
        .map_err(|e| internal(e, "stamp partial copy", &file.path))?;
    Ok(())
}

fn internal(e: io::Error, action: &str, path: &Path) -> ArchiveError {
    ArchiveError::Internal(anyhow::Error::new(e).context(format!(
        "failed to {action} at {}",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_source(dir: &Path, project: &str, name: &str, body: &str) -> PathBuf {
        let project_dir = dir.join(project);
        fs::create_dir_all(&project_dir).unwrap();
        let path = project_dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    fn engine(source: &Path, archive: &Path, provider: SourceProvider) -> SyncEngine {
        SyncEngine::new(
            archive,
            vec![SourceLayout {
                provider,
                root: source.to_path_buf(),
            }],
        )
    }

    #[test]
    fn second_run_copies_nothing() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        write_source(src.path(), "-Users-a-proj", "s1.jsonl", "{}\n");
        write_source(src.path(), "-Users-a-proj", "s2.jsonl", "{}\n{}\n");

        let engine = engine(src.path(), dst.path(), SourceProvider::Claude);
        let first = engine.sync();
        assert_eq!(first.files_copied, 2);
        assert!(first.errors.is_empty());

        let second = engine.sync();
        assert_eq!(second.files_copied, 0);
        assert_eq!(second.files_skipped, 2);
        assert!(dst.path().join("-Users-a-proj/s1.jsonl").exists());
    }

    #[test]
    fn pi_layout_is_normalized() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        write_source(src.path(), "--Users-a-proj--", "s.jsonl", "{}\n");

        let report = engine(src.path(), dst.path(), SourceProvider::Pi).sync();
        assert_eq!(report.files_copied, 1);
        assert!(dst.path().join("Users-a-proj/s.jsonl").exists());
    }

    #[test]
    fn growth_is_recopied() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let path = write_source(src.path(), "p", "s.jsonl", "{}\n");
        let engine = engine(src.path(), dst.path(), SourceProvider::Claude);
        assert_eq!(engine.sync().files_copied, 1);

        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"{\"more\":1}\n").unwrap();
        f.set_modified(SystemTime::now() + Duration::from_secs(5))
            .unwrap();
        drop(f);

        assert_eq!(engine.sync().files_copied, 1);
        let archived = fs::read_to_string(dst.path().join("p/s.jsonl")).unwrap();
        assert!(archived.contains("more"));
    }

    #[test]
    fn copy_preserves_source_mtime() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let path = write_source(src.path(), "p", "s.jsonl", "{}\n");
        let stamp = SystemTime::UNIX_EPOCH + Duration::from_secs(1_757_930_400);
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(stamp)
            .unwrap();

        engine(src.path(), dst.path(), SourceProvider::Claude).sync();
        let archived = fs::metadata(dst.path().join("p/s.jsonl")).unwrap();
        assert_eq!(archived.modified().unwrap(), stamp);
    }

    #[test]
    fn fresh_partial_means_in_progress() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        write_source(src.path(), "p", "s.jsonl", "{}\n");
        fs::create_dir_all(dst.path().join("p")).unwrap();
        fs::write(dst.path().join("p/.s.jsonl.partial"), "").unwrap();

        let report = engine(src.path(), dst.path(), SourceProvider::Claude).sync();
        assert_eq!(report.files_in_progress, 1);
        assert_eq!(report.files_copied, 0);
        assert!(!dst.path().join("p/s.jsonl").exists());
    }

    #[test]
    fn stale_partial_is_reclaimed() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        write_source(src.path(), "p", "s.jsonl", "{}\n");
        fs::create_dir_all(dst.path().join("p")).unwrap();
        let partial = dst.path().join("p/.s.jsonl.partial");
        fs::write(&partial, "half").unwrap();
        File::options()
            .write(true)
            .open(&partial)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(3600))
            .unwrap();

        let report = engine(src.path(), dst.path(), SourceProvider::Claude).sync();
        assert_eq!(report.files_copied, 1);
        assert!(!partial.exists());
        assert_eq!(
            fs::read_to_string(dst.path().join("p/s.jsonl")).unwrap(),
            "{}\n"
        );
    }

    #[cfg(unix)]
    #[test]
    fn reclaimed_partial_is_not_published() {
        let dst = tempfile::tempdir().unwrap();
        let partial_path = dst.path().join(".s.jsonl.partial");
        let dest = dst.path().join("s.jsonl");

        let mut ours = create_new(&partial_path).unwrap();
        io::Write::write_all(&mut ours, b"our finished copy\n").unwrap();

        // A second sync decided our partial was abandoned and started over
        fs::remove_file(&partial_path).unwrap();
        fs::write(&partial_path, "their half").unwrap();

        assert!(!publish(ours, &partial_path, &dest).unwrap());
        assert!(!dest.exists());
        assert_eq!(fs::read_to_string(&partial_path).unwrap(), "their half");
    }

    #[test]
    fn own_partial_is_published() {
        let dst = tempfile::tempdir().unwrap();
        let partial_path = dst.path().join(".s.jsonl.partial");
        let dest = dst.path().join("s.jsonl");

        let mut ours = create_new(&partial_path).unwrap();
        io::Write::write_all(&mut ours, b"{}\n").unwrap();

        assert!(publish(ours, &partial_path, &dest).unwrap());
        assert!(!partial_path.exists());
        assert_eq!(fs::read_to_string(&dest).unwrap(), "{}\n");
    }

    #[cfg(unix)]
    #[test]
    fn broken_file_does_not_abort_run() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        write_source(src.path(), "p", "good.jsonl", "{}\n");
        std::os::unix::fs::symlink(
            src.path().join("p/missing-target.jsonl"),
            src.path().join("p/broken.jsonl"),
        )
        .unwrap();

        let report = engine(src.path(), dst.path(), SourceProvider::Claude).sync();
        assert_eq!(report.files_copied, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(dst.path().join("p/good.jsonl").exists());
    }

    #[test]
    fn absent_source_is_not_an_error() {
        let dst = tempfile::tempdir().unwrap();
        let report = engine(Path::new("/nonexistent/source"), dst.path(), SourceProvider::Pi).sync();
        assert_eq!(report.files_copied, 0);
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn spawned_sync_reports_back() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        write_source(src.path(), "p", "s.jsonl", "{}\n");

        let handle = spawn_sync(engine(src.path(), dst.path(), SourceProvider::Claude));
        let report = handle.await.unwrap();
        assert_eq!(report.files_copied, 1);
    }
}
