//! JSONL transcript → ordered exchanges.
//!
//! Schema is resolved per record, not per file. A user record opens an
//! exchange; every assistant record up to the next user record folds into it,
//! including assistant turns interleaved with tool results. Tool results and
//! records outside the message envelope never contribute text.

use chrono::{DateTime, Utc};
use tracing::debug;

use super::record::{
    parse_timestamp, timestamp_from_millis, ContentSegment, EnvelopeMessage, MessageContent,
    TranscriptRecord,
};
use super::{Exchange, ParsedTranscript, ToolCall, TranscriptSource};

/// A record reduced to what exchange assembly cares about.
enum Turn {
    User {
        texts: Vec<String>,
        timestamp: Option<DateTime<Utc>>,
    },
    Assistant(MessageContent),
    ToolResult,
    Skip,
}

fn classify(record: TranscriptRecord) -> Turn {
    match record {
        TranscriptRecord::User(r) => {
            if r.is_meta {
                return Turn::Skip;
            }
            if r.message.content.is_tool_result_only() {
                return Turn::ToolResult;
            }
            user_turn(
                &r.message.content,
                r.timestamp.as_deref().and_then(parse_timestamp),
            )
        }
        TranscriptRecord::Assistant(r) => Turn::Assistant(r.message.content),
        TranscriptRecord::Message(envelope) => match envelope.message {
            EnvelopeMessage::User { content, timestamp } => {
                let ts = envelope
                    .timestamp
                    .as_deref()
                    .and_then(parse_timestamp)
                    .or_else(|| timestamp.and_then(timestamp_from_millis));
                user_turn(&content, ts)
            }
            EnvelopeMessage::Assistant { content } => Turn::Assistant(content),
            EnvelopeMessage::ToolResult { .. } => Turn::ToolResult,
            EnvelopeMessage::Other => Turn::Skip,
        },
        TranscriptRecord::Other => Turn::Skip,
    }
}

/// Every user record closes the previous exchange, even one without text
/// (an image-only turn). Such a turn is dropped at flush together with
/// whatever the assistant answered to it.
fn user_turn(content: &MessageContent, timestamp: Option<DateTime<Utc>>) -> Turn {
    let texts = content.texts().into_iter().map(str::to_string).collect();
    Turn::User { texts, timestamp }
}

struct Pending {
    user_parts: Vec<String>,
    assistant_parts: Vec<String>,
    tool_calls: Vec<ToolCall>,
    timestamp: Option<DateTime<Utc>>,
    line_start: usize,
    line_end: usize,
}

struct Assembler<'a> {
    source: &'a TranscriptSource,
    pending: Option<Pending>,
    out: ParsedTranscript,
}

impl<'a> Assembler<'a> {
    fn new(source: &'a TranscriptSource) -> Self {
        Self {
            source,
            pending: None,
            out: ParsedTranscript::default(),
        }
    }

    fn push(&mut self, turn: Turn, line: usize) {
        match turn {
            Turn::User { texts, timestamp } => {
                self.flush();
                self.pending = Some(Pending {
                    user_parts: texts,
                    assistant_parts: Vec::new(),
                    tool_calls: Vec::new(),
                    timestamp,
                    line_start: line,
                    line_end: line,
                });
            }
            Turn::Assistant(content) => {
                let reasoning = content
                    .segments()
                    .iter()
                    .filter(|s| matches!(s, ContentSegment::Thinking { .. }))
                    .count();
                self.out.reasoning_segments += reasoning;

                let Some(pending) = self.pending.as_mut() else {
                    return;
                };
                pending
                    .assistant_parts
                    .extend(content.texts().into_iter().map(str::to_string));
                for segment in content.segments() {
                    match segment {
                        ContentSegment::ToolUse { name, input } => {
                            pending.tool_calls.push(ToolCall {
                                tool_name: name.clone(),
                                input: input.clone(),
                            })
                        }
                        ContentSegment::ToolCall { name, arguments } => {
                            pending.tool_calls.push(ToolCall {
                                tool_name: name.clone(),
                                input: arguments.clone(),
                            })
                        }
                        _ => {}
                    }
                }
                pending.line_end = line;
            }
            Turn::ToolResult => {
                if let Some(pending) = self.pending.as_mut() {
                    pending.line_end = line;
                }
            }
            Turn::Skip => {}
        }
    }

    fn flush(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        let user_message = pending.user_parts.join("\n\n");
        let assistant_message = pending.assistant_parts.join("\n\n");
        if user_message.trim().is_empty()
            || (assistant_message.is_empty() && pending.tool_calls.is_empty())
        {
            return;
        }

        let ordinal = self.out.exchanges.len() + 1;
        self.out.exchanges.push(Exchange {
            id: format!("{}#{ordinal}", self.source.file_stem()),
            project: self.source.project.clone(),
            timestamp: pending.timestamp,
            user_message,
            assistant_message,
            tool_calls: pending.tool_calls,
            archive_path: self.source.archive_path.clone(),
            line_start: pending.line_start,
            line_end: pending.line_end,
        });
    }

    fn finish(mut self) -> ParsedTranscript {
        self.flush();
        self.out
    }
}

/// Parse one transcript. Never fails: unparsable lines are counted and skipped.
pub fn parse_transcript(raw: &[u8], source: &TranscriptSource) -> ParsedTranscript {
    let text = String::from_utf8_lossy(raw);
    let mut assembler = Assembler::new(source);

    for (index, line) in text.lines().enumerate() {
        let line_no = index + 1;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<TranscriptRecord>(line) {
            Ok(record) => assembler.push(classify(record), line_no),
            Err(e) => {
                debug!(
                    archive_path = %source.archive_path,
                    line = line_no,
                    error = %e,
                    "skipping unparsable transcript line"
                );
                assembler.out.skipped_lines += 1;
            }
        }
    }

    assembler.finish()
}
