//! Normalized exchange model shared by both transcript schemas.
//!
//! [`parser::parse_transcript`] turns raw JSONL bytes into [`Exchange`]s and
//! [`exclusion::detect`] decides whether a conversation may be indexed. Both
//! are pure: no I/O, no state, nothing cached between calls.

pub mod exclusion;
pub mod parser;
pub mod record;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub use exclusion::{detect as detect_exclusion, Exclusion, ExclusionRules};
pub use parser::parse_transcript;

/// One tool invocation made by the assistant within an exchange.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCall {
    pub tool_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
}

/// One user turn plus everything the assistant did before the next user turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exchange {
    pub id: String,
    pub project: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub user_message: String,
    pub assistant_message: String,
    pub tool_calls: Vec<ToolCall>,
    pub archive_path: String,
    /// 1-indexed, inclusive raw line numbers.
    pub line_start: usize,
    pub line_end: usize,
}

impl Exchange {
    /// Text that goes into both the vector and the full-text structure.
    pub fn indexable_text(&self) -> String {
        if self.assistant_message.is_empty() {
            self.user_message.clone()
        } else {
            format!("{}\n\n{}", self.user_message, self.assistant_message)
        }
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tool_calls.iter().map(|c| c.tool_name.as_str()).collect()
    }
}

/// Where a transcript lives in the archive.
#[derive(Debug, Clone)]
pub struct TranscriptSource {
    /// Archive-relative path, `/`-separated.
    pub archive_path: String,
    pub project: String,
}

impl TranscriptSource {
    pub fn from_archive_path(archive_path: &str) -> Self {
        Self {
            archive_path: archive_path.to_string(),
            project: project_from_archive_path(archive_path),
        }
    }

    fn file_stem(&self) -> &str {
        let name = self
            .archive_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.archive_path);
        name.strip_suffix(".jsonl").unwrap_or(name)
    }
}

/// Output of one parse.
#[derive(Debug, Clone, Default)]
pub struct ParsedTranscript {
    pub exchanges: Vec<Exchange>,
    /// Non-empty lines that were not valid records.
    pub skipped_lines: usize,
    /// Reasoning segments seen (never part of any exchange text).
    pub reasoning_segments: usize,
}

/// Project label from an archive path: its directory component.
pub fn project_from_archive_path(archive_path: &str) -> String {
    let mut parts = archive_path.rsplit('/');
    let _file = parts.next();
    parts.next().unwrap_or_default().to_string()
}
