//! Wire shapes of a single transcript line.
//!
//! Both transcript schemas share the top-level `type` discriminator, so one
//! closed tagged enum resolves every line: role records (`user` /
//! `assistant`) carry the role directly, `message` envelopes nest it one
//! level down, and everything else collapses into [`TranscriptRecord::Other`].

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptRecord {
    User(RoleRecord),
    Assistant(RoleRecord),
    Message(EnvelopeRecord),
    #[serde(other)]
    Other,
}

/// A record whose role is the top-level discriminator.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleRecord {
    pub message: RoleMessage,
    #[serde(default)]
    pub timestamp: Option<String>,
    /// Injected command caveats and similar bookkeeping turns.
    #[serde(default)]
    pub is_meta: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoleMessage {
    #[serde(default)]
    pub content: MessageContent,
}

/// A `message` envelope with the role nested inside.
#[derive(Debug, Clone, Deserialize)]
pub struct EnvelopeRecord {
    pub message: EnvelopeMessage,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "role", rename_all = "camelCase")]
pub enum EnvelopeMessage {
    User {
        #[serde(default)]
        content: MessageContent,
        /// Epoch milliseconds.
        #[serde(default)]
        timestamp: Option<i64>,
    },
    Assistant {
        #[serde(default)]
        content: MessageContent,
    },
    ToolResult {
        #[serde(default)]
        content: MessageContent,
    },
    #[serde(other)]
    Other,
}

/// Message content: a bare string or an array of typed segments.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Segments(Vec<ContentSegment>),
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Segments(Vec::new())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ContentSegment {
    #[serde(rename = "text")]
    Text {
        #[serde(default)]
        text: String,
    },
    #[serde(rename = "thinking")]
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    #[serde(rename = "tool_use")]
    ToolUse {
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: Option<Value>,
    },
    #[serde(rename = "toolCall")]
    ToolCall {
        #[serde(default)]
        name: String,
        #[serde(default)]
        arguments: Option<Value>,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        #[serde(default)]
        content: Option<Value>,
    },
    #[serde(other)]
    Unknown,
}

impl MessageContent {
    /// Plain text segments in encounter order, empty ones dropped.
    pub fn texts(&self) -> Vec<&str> {
        match self {
            MessageContent::Text(text) => {
                if text.trim().is_empty() {
                    Vec::new()
                } else {
                    vec![text.as_str()]
                }
            }
            MessageContent::Segments(segments) => segments
                .iter()
                .filter_map(|segment| match segment {
                    ContentSegment::Text { text } if !text.trim().is_empty() => {
                        Some(text.as_str())
                    }
                    _ => None,
                })
                .collect(),
        }
    }

    pub fn segments(&self) -> &[ContentSegment] {
        match self {
            MessageContent::Text(_) => &[],
            MessageContent::Segments(segments) => segments,
        }
    }

    /// `true` when the content consists only of tool results.
    pub fn is_tool_result_only(&self) -> bool {
        let segments = self.segments();
        !segments.is_empty()
            && segments
                .iter()
                .all(|s| matches!(s, ContentSegment::ToolResult { .. }))
    }
}

/// Parse an RFC 3339 timestamp string.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn timestamp_from_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}
