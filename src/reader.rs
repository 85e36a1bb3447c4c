//! Render archived conversations, or line ranges of them, as markdown.
//!
//! Works on the archive alone: excluded conversations read like any other.

use std::fmt::Write as _;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use crate::error::{ArchiveError, Result};
use crate::transcript::{self, Exchange, TranscriptSource};

#[derive(Debug, Clone, Serialize)]
pub struct ConversationPage {
    pub archive_path: String,
    pub project: String,
    pub exchange_count: usize,
    /// Raw line span actually covered by the rendered exchanges.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_line: Option<usize>,
    pub markdown: String,
}

/// Read `path` (archive-relative, or absolute inside the archive) and render
/// the exchanges whose whole line span lies within `[start, end]`.
pub fn read_conversation(
    archive_root: &Path,
    path: &str,
    start: Option<usize>,
    end: Option<usize>,
) -> Result<ConversationPage> {
    let start_line = start.unwrap_or(1);
    if start_line == 0 {
        return Err(ArchiveError::invalid("start line must be at least 1"));
    }
    if let Some(end) = end {
        if end < start_line {
            return Err(ArchiveError::invalid(format!(
                "end line {end} is before start line {start_line}"
            )));
        }
    }

    let (file, archive_path) = resolve(archive_root, path)?;
    let raw = std::fs::read(&file).map_err(|e| ArchiveError::SourceRead {
        path: file.clone(),
        source: e,
    })?;

    let source = TranscriptSource::from_archive_path(&archive_path);
    let parsed = transcript::parse_transcript(&raw, &source);
    let selected: Vec<&Exchange> = parsed
        .exchanges
        .iter()
        .filter(|e| e.line_start >= start_line && end.map_or(true, |end| e.line_end <= end))
        .collect();

    let markdown = if selected.is_empty() {
        let end_label = end.map_or_else(|| "end".to_string(), |e| e.to_string());
        format!("_No conversation content in lines {start_line}–{end_label}._")
    } else {
        render(&source, &selected)
    };

    Ok(ConversationPage {
        archive_path,
        project: source.project,
        exchange_count: selected.len(),
        first_line: selected.first().map(|e| e.line_start),
        last_line: selected.last().map(|e| e.line_end),
        markdown,
    })
}

/// Resolve a request path to a file inside the canonical archive root.
fn resolve(archive_root: &Path, path: &str) -> Result<(PathBuf, String)> {
    let requested = Path::new(path.trim());
    if path.trim().is_empty() {
        return Err(ArchiveError::PathResolution("empty path".into()));
    }
    if requested.components().any(|c| c == Component::ParentDir) {
        return Err(ArchiveError::PathResolution(format!(
            "{path} may not contain `..`"
        )));
    }

    let root = archive_root.canonicalize().map_err(|e| {
        ArchiveError::PathResolution(format!(
            "archive root {} is not accessible: {e}",
            archive_root.display()
        ))
    })?;
    let candidate = if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        root.join(requested)
    };
    let resolved = candidate
        .canonicalize()
        .map_err(|_| ArchiveError::PathResolution(format!("no archived conversation at {path}")))?;

    let Ok(relative) = resolved.strip_prefix(&root) else {
        return Err(ArchiveError::PathResolution(format!(
            "{path} is outside the archive"
        )));
    };
    if !resolved.is_file() {
        return Err(ArchiveError::PathResolution(format!(
            "{path} is not a conversation file"
        )));
    }

    let archive_path = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    Ok((resolved, archive_path))
}

fn render(source: &TranscriptSource, exchanges: &[&Exchange]) -> String {
    let mut out = String::new();
    let title = if source.project.is_empty() {
        source.archive_path.as_str()
    } else {
        source.project.as_str()
    };
    let _ = writeln!(out, "# Conversation: {title}\n");
    let _ = writeln!(out, "`{}`\n", source.archive_path);

    for (i, exchange) in exchanges.iter().enumerate() {
        let _ = write!(
            out,
            "## Exchange {} · lines {}–{}",
            i + 1,
            exchange.line_start,
            exchange.line_end
        );
        if let Some(ts) = exchange.timestamp {
            let _ = write!(out, " · {}", ts.format("%Y-%m-%d %H:%M UTC"));
        }
        out.push_str("\n\n");

        let _ = writeln!(out, "**User:**\n\n{}\n", exchange.user_message.trim());
        if !exchange.assistant_message.is_empty() {
            let _ = writeln!(out, "**Assistant:**\n\n{}\n", exchange.assistant_message.trim());
        }
        if !exchange.tool_calls.is_empty() {
            let _ = writeln!(out, "_Tools: {}_\n", exchange.tool_names().join(", "));
        }
    }

    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn archive() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("proj")).unwrap();
        let body = [
            r#"{"type":"user","message":{"role":"user","content":"first question"},"timestamp":"2025-09-15T10:00:00Z"}"#,
            r#"{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"first answer"},{"type":"tool_use","name":"Bash","input":{}}]}}"#,
            r#"{"type":"user","message":{"role":"user","content":"second question"}}"#,
            r#"{"type":"assistant","message":{"role":"assistant","content":"second answer"}}"#,
        ]
        .join("\n");
        fs::write(dir.path().join("proj/s.jsonl"), body).unwrap();
        fs::write(dir.path().join("secret.txt"), "outside").unwrap();
        dir
    }

    #[test]
    fn renders_whole_conversation() {
        let dir = archive();
        let page = read_conversation(dir.path(), "proj/s.jsonl", None, None).unwrap();
        assert_eq!(page.exchange_count, 2);
        assert_eq!(page.project, "proj");
        assert!(page.markdown.contains("# Conversation: proj"));
        assert!(page.markdown.contains("**User:**\n\nfirst question"));
        assert!(page.markdown.contains("_Tools: Bash_"));
        assert!(page.markdown.contains("2025-09-15 10:00 UTC"));
        assert_eq!((page.first_line, page.last_line), (Some(1), Some(4)));
    }

    #[test]
    fn range_keeps_only_contained_exchanges() {
        let dir = archive();
        let page = read_conversation(dir.path(), "proj/s.jsonl", Some(2), Some(4)).unwrap();
        assert_eq!(page.exchange_count, 1);
        assert!(page.markdown.contains("second question"));
        assert!(!page.markdown.contains("first question"));
    }

    #[test]
    fn range_past_the_data_is_empty_not_an_error() {
        let dir = archive();
        let page = read_conversation(dir.path(), "proj/s.jsonl", Some(100), Some(200)).unwrap();
        assert_eq!(page.exchange_count, 0);
        assert_eq!(page.markdown, "_No conversation content in lines 100–200._");
    }

    #[test]
    fn invalid_ranges_are_rejected() {
        let dir = archive();
        assert!(matches!(
            read_conversation(dir.path(), "proj/s.jsonl", Some(0), None),
            Err(ArchiveError::InputValidation(_))
        ));
        assert!(matches!(
            read_conversation(dir.path(), "proj/s.jsonl", Some(5), Some(4)),
            Err(ArchiveError::InputValidation(_))
        ));
    }

    #[test]
    fn traversal_and_missing_files_are_path_errors() {
        let dir = archive();
        for path in ["../etc/passwd", "proj/../../x.jsonl", "proj/missing.jsonl", "/etc/hostname", "proj", ""] {
            let err = read_conversation(dir.path(), path, None, None).unwrap_err();
            assert!(matches!(err, ArchiveError::PathResolution(_)), "{path}: {err}");
        }
    }

    #[test]
    fn absolute_path_inside_archive_is_accepted() {
        let dir = archive();
        let absolute = dir.path().canonicalize().unwrap().join("proj/s.jsonl");
        let page = read_conversation(dir.path(), absolute.to_str().unwrap(), None, None).unwrap();
        assert_eq!(page.archive_path, "proj/s.jsonl");
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escaping_the_archive_is_rejected() {
        let dir = archive();
        let outside = tempfile::tempdir().unwrap();
        fs::write(outside.path().join("o.jsonl"), "{}").unwrap();
        std::os::unix::fs::symlink(outside.path().join("o.jsonl"), dir.path().join("proj/link.jsonl")).unwrap();
        assert!(matches!(
            read_conversation(dir.path(), "proj/link.jsonl", None, None),
            Err(ArchiveError::PathResolution(_))
        ));
    }
}
