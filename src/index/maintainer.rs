//! Index one archived file at a time.
//!
//! Per file: claim → read → parse → exclusion check → embed → one write
//! transaction that replaces the file's entries and stores the new marker.
//! Embedding happens before the transaction so the write lock is never held
//! across model inference.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::state;
use super::store::{self, LogOperation};
use crate::archive::{self, ArchivedFile};
use crate::config::IndexingConfig;
use crate::db::migrations;
use crate::embedding::{EmbeddingProvider, EMBEDDING_DIM};
use crate::error::{ArchiveError, Result};
use crate::transcript::{self, Exclusion, ExclusionRules, TranscriptSource};

/// What happened to one file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FileOutcome {
    Indexed { exchanges: usize, removed: usize },
    Excluded { reason: Exclusion, removed: usize },
    Unchanged,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexIssue {
    pub archive_path: String,
    pub message: String,
}

/// Aggregate of an indexing run. Per-file failures never abort the run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexReport {
    pub files_indexed: usize,
    pub files_excluded: usize,
    pub files_unchanged: usize,
    /// Claimed by another process; picked up on a later run.
    pub files_busy: usize,
    pub exchanges_indexed: usize,
    pub entries_removed: usize,
    pub errors: Vec<IndexIssue>,
}

impl IndexReport {
    pub fn record(&mut self, archive_path: &str, result: Result<FileOutcome>) {
        match result {
            Ok(FileOutcome::Indexed { exchanges, removed }) => {
                self.files_indexed += 1;
                self.exchanges_indexed += exchanges;
                self.entries_removed += removed;
            }
            Ok(FileOutcome::Excluded { removed, .. }) => {
                self.files_excluded += 1;
                self.entries_removed += removed;
            }
            Ok(FileOutcome::Unchanged) => self.files_unchanged += 1,
            Err(ArchiveError::ConcurrentWriteConflict { .. }) => self.files_busy += 1,
            Err(e) => {
                warn!(archive_path, error = %e, "failed to index transcript");
                self.errors.push(IndexIssue {
                    archive_path: archive_path.to_string(),
                    message: e.to_string(),
                });
            }
        }
    }
}

pub struct IndexMaintainer<'a> {
    conn: &'a Connection,
    embedder: &'a dyn EmbeddingProvider,
    archive_root: PathBuf,
    rules: ExclusionRules,
    claim_ttl: Duration,
    batch_size: usize,
    owner: String,
}

impl<'a> IndexMaintainer<'a> {
    pub fn new(
        conn: &'a Connection,
        embedder: &'a dyn EmbeddingProvider,
        archive_root: impl Into<PathBuf>,
        config: &IndexingConfig,
    ) -> Self {
        Self {
            conn,
            embedder,
            archive_root: archive_root.into(),
            rules: ExclusionRules::from_config(config),
            claim_ttl: Duration::seconds(config.claim_ttl_secs as i64),
            batch_size: config.batch_size.max(1),
            owner: uuid::Uuid::now_v7().to_string(),
        }
    }

    pub fn conn(&self) -> &Connection {
        self.conn
    }

    pub fn archive_root(&self) -> &Path {
        &self.archive_root
    }

    /// Refuse to mix vectors from different embedding spaces.
    pub fn check_embedding_model(&self) -> Result<()> {
        match migrations::get_embedding_model(self.conn)? {
            Some(stored) if stored != self.embedder.model_id() => {
                Err(ArchiveError::EmbeddingCapability(format!(
                    "index was built with {stored} but the provider is {}; run `echoes index rebuild`",
                    self.embedder.model_id()
                )))
            }
            _ => Ok(()),
        }
    }

    /// `true` when the file has no state, changed since it was indexed, or
    /// its last attempt failed.
    pub fn is_stale(&self, file: &ArchivedFile) -> Result<bool> {
        Ok(match state::get_state(self.conn, &file.archive_path)? {
            Some(s) => s.marker.as_deref() != Some(file.marker().as_str()) || s.last_error.is_some(),
            None => true,
        })
    }

    /// Index every archived file whose state is stale or absent.
    pub fn index_pending(&self) -> Result<IndexReport> {
        self.check_embedding_model()?;
        let files = archive::list_archived_files(&self.archive_root)?;

        let mut report = IndexReport::default();
        for file in &files {
            let result = self.index_file(file);
            report.record(&file.archive_path, result);
        }

        info!(
            indexed = report.files_indexed,
            excluded = report.files_excluded,
            unchanged = report.files_unchanged,
            busy = report.files_busy,
            exchanges = report.exchanges_indexed,
            errors = report.errors.len(),
            "index run complete"
        );
        Ok(report)
    }

    /// Index one file unless its marker is current.
    pub fn index_file(&self, file: &ArchivedFile) -> Result<FileOutcome> {
        if !self.is_stale(file)? {
            return Ok(FileOutcome::Unchanged);
        }
        self.reindex_file(file)
    }

    /// Index one file regardless of its marker.
    pub fn reindex_file(&self, file: &ArchivedFile) -> Result<FileOutcome> {
        self.check_embedding_model()?;

        let path = &file.archive_path;
        if !state::try_claim(self.conn, path, &self.owner, self.claim_ttl, Utc::now())? {
            debug!(archive_path = %path, "file claimed by another indexer");
            return Err(ArchiveError::ConcurrentWriteConflict {
                archive_path: path.clone(),
            });
        }

        match self.index_claimed(file) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if !matches!(e, ArchiveError::ConcurrentWriteConflict { .. }) {
                    let message = e.to_string();
                    if let Err(release) =
                        state::release_claim(self.conn, path, &self.owner, Some(&message))
                    {
                        warn!(archive_path = %path, error = %release, "failed to release index claim");
                    }
                }
                Err(e)
            }
        }
    }

    fn index_claimed(&self, file: &ArchivedFile) -> Result<FileOutcome> {
        let raw = std::fs::read(&file.path).map_err(|e| ArchiveError::SourceRead {
            path: file.path.clone(),
            source: e,
        })?;

        let source = TranscriptSource::from_archive_path(&file.archive_path);
        let parsed = transcript::parse_transcript(&raw, &source);
        if parsed.skipped_lines > 0 {
            debug!(archive_path = %file.archive_path, skipped = parsed.skipped_lines, "unparsable lines skipped");
        }

        let exclusion = transcript::detect_exclusion(&parsed.exchanges, &raw, &self.rules);
        if exclusion.is_excluded() {
            let removed = self.write(file, |tx| {
                let removed = store::delete_entries_for_path(tx, &file.archive_path)?;
                store::write_audit_log(
                    tx,
                    LogOperation::Exclude,
                    &file.archive_path,
                    Some(&serde_json::json!({ "reason": exclusion, "removed": removed })),
                )?;
                Ok((removed, exclusion, 0))
            })?;
            info!(archive_path = %file.archive_path, reason = ?exclusion, removed, "conversation excluded from index");
            return Ok(FileOutcome::Excluded {
                reason: exclusion,
                removed,
            });
        }

        let embeddings = self.embed_exchanges(&parsed.exchanges)?;
        let fallback: DateTime<Utc> = file.modified_at.into();
        let model_id = self.embedder.model_id().to_string();
        let exchanges = &parsed.exchanges;

        let removed = self.write(file, |tx| {
            let removed = store::delete_entries_for_path(tx, &file.archive_path)?;
            for (exchange, embedding) in exchanges.iter().zip(&embeddings) {
                let timestamp = exchange.timestamp.unwrap_or(fallback);
                store::insert_entry(tx, exchange, &timestamp, embedding)?;
            }
            if !exchanges.is_empty() && migrations::get_embedding_model(tx)?.is_none() {
                migrations::set_embedding_model(tx, &model_id)?;
            }
            store::write_audit_log(
                tx,
                LogOperation::Index,
                &file.archive_path,
                Some(&serde_json::json!({ "exchanges": exchanges.len(), "removed": removed })),
            )?;
            Ok((removed, Exclusion::Included, exchanges.len()))
        })?;

        debug!(archive_path = %file.archive_path, exchanges = exchanges.len(), removed, "indexed transcript");
        Ok(FileOutcome::Indexed {
            exchanges: exchanges.len(),
            removed,
        })
    }

    fn embed_exchanges(&self, exchanges: &[transcript::Exchange]) -> Result<Vec<Vec<f32>>> {
        let texts: Vec<String> = exchanges.iter().map(|e| e.indexable_text()).collect();
        let mut embeddings = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            let refs: Vec<&str> = chunk.iter().map(String::as_str).collect();
            let batch = self
                .embedder
                .embed_batch(&refs)
                .map_err(|e| ArchiveError::EmbeddingCapability(format!("{e:#}")))?;
            if batch.len() != refs.len() || batch.iter().any(|v| v.len() != EMBEDDING_DIM) {
                return Err(ArchiveError::EmbeddingCapability(format!(
                    "provider returned {} vectors for {} texts (expected {EMBEDDING_DIM} dimensions each)",
                    batch.len(),
                    refs.len()
                )));
            }
            embeddings.extend(batch);
        }
        Ok(embeddings)
    }

    /// Run `body` in an immediate transaction that only commits while we
    /// still hold the claim, then store the marker and drop the claim.
    fn write<F>(&self, file: &ArchivedFile, body: F) -> Result<usize>
    where
        F: FnOnce(&Transaction<'_>) -> rusqlite::Result<(usize, Exclusion, usize)>,
    {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        if !state::holds_claim(&tx, &file.archive_path, &self.owner)? {
            return Err(ArchiveError::ConcurrentWriteConflict {
                archive_path: file.archive_path.clone(),
            });
        }

        let (removed, exclusion, count) = body(&tx)?;
        state::complete(&tx, &file.archive_path, &self.owner, &file.marker(), exclusion, count)?;
        tx.commit()?;
        Ok(removed)
    }

    /// Empty the index in one transaction: entries, states, and the stored
    /// model id. Refused without changes while another indexer holds a live
    /// claim.
    pub fn clear_index(&self) -> Result<usize> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        if let Some(held) = state::live_claims(&tx, &self.owner, self.claim_ttl, Utc::now())?
            .into_iter()
            .next()
        {
            return Err(ArchiveError::ConcurrentWriteConflict { archive_path: held });
        }

        let mut removed = 0;
        for path in store::indexed_paths(&tx)? {
            removed += store::delete_entries_for_path(&tx, &path)?;
        }
        tx.execute("DELETE FROM index_state", [])?;
        migrations::clear_embedding_model(&tx)?;
        store::write_audit_log(
            &tx,
            LogOperation::Rebuild,
            "*",
            Some(&serde_json::json!({ "entries_removed": removed })),
        )?;
        tx.commit()?;
        info!(entries_removed = removed, "index cleared for rebuild");
        Ok(removed)
    }

    /// Drop every entry and the state of a file that left the archive.
    pub fn forget_file(&self, archive_path: &str) -> Result<usize> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let removed = store::delete_entries_for_path(&tx, archive_path)?;
        state::delete_state(&tx, archive_path)?;
        store::write_audit_log(
            &tx,
            LogOperation::Remove,
            archive_path,
            Some(&serde_json::json!({ "removed": removed })),
        )?;
        tx.commit()?;
        info!(archive_path, removed, "removed entries of missing transcript");
        Ok(removed)
    }
}
