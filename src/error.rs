//! Error taxonomy for the archive boundary operations.
//!
//! Sync and indexing aggregate their failures into reports; search and read
//! return these errors to the caller directly.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by sync, indexing, search, and read.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Malformed query, out-of-range limit, unparsable date, bad line range.
    #[error("invalid input: {0}")]
    InputValidation(String),

    /// A single transcript could not be read. Never fatal to a whole run.
    #[error("failed to read {}: {source}", path.display())]
    SourceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The embedding capability failed or is incompatible with the index.
    #[error("embedding unavailable: {0}")]
    EmbeddingCapability(String),

    /// A read request outside the archive root, or a missing file.
    #[error("path error: {0}")]
    PathResolution(String),

    /// Another process holds the per-file index claim.
    #[error("{archive_path} is being indexed by another process")]
    ConcurrentWriteConflict { archive_path: String },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ArchiveError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InputValidation(message.into())
    }

    /// `true` for errors the caller can fix by changing the request.
    pub fn is_user_error(&self) -> bool {
        matches!(self, Self::InputValidation(_) | Self::PathResolution(_))
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
