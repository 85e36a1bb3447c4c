//! Row-level writes for index entries and the audit log.
//!
//! An entry is one `exchanges` row plus its `exchanges_fts` row (same rowid)
//! and its `exchanges_vec` row (same id). Callers wrap these in a
//! transaction; nothing here commits.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{embedding_to_bytes, format_timestamp};
use crate::transcript::Exchange;

/// Deterministic entry id: the same line range of the same file always maps
/// to the same id.
pub fn entry_id(archive_path: &str, line_start: usize, line_end: usize) -> String {
    let key = format!("{archive_path}:{line_start}-{line_end}");
    uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_URL, key.as_bytes()).to_string()
}

/// Insert one exchange into all three structures. Returns its id.
pub fn insert_entry(
    conn: &Connection,
    exchange: &Exchange,
    timestamp: &DateTime<Utc>,
    embedding: &[f32],
) -> rusqlite::Result<String> {
    let id = entry_id(&exchange.archive_path, exchange.line_start, exchange.line_end);
    let content = exchange.indexable_text();
    let tool_names = if exchange.tool_calls.is_empty() {
        None
    } else {
        serde_json::to_string(&exchange.tool_names()).ok()
    };

    conn.execute(
        "INSERT INTO exchanges (id, archive_path, project, line_start, line_end, timestamp, \
         user_message, assistant_message, content, tool_names, indexed_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            id,
            exchange.archive_path,
            exchange.project,
            exchange.line_start as i64,
            exchange.line_end as i64,
            format_timestamp(timestamp),
            exchange.user_message,
            exchange.assistant_message,
            content,
            tool_names,
            format_timestamp(&Utc::now()),
        ],
    )?;
    let rowid = conn.last_insert_rowid();

    conn.execute(
        "INSERT INTO exchanges_fts (rowid, content) VALUES (?1, ?2)",
        params![rowid, content],
    )?;
    conn.execute(
        "INSERT INTO exchanges_vec (id, embedding) VALUES (?1, ?2)",
        params![id, embedding_to_bytes(embedding)],
    )?;

    Ok(id)
}

/// Remove one entry from all three structures. Missing ids are a no-op.
pub fn delete_entry(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    let row: Option<(i64, String)> = conn
        .query_row(
            "SELECT rowid, content FROM exchanges WHERE id = ?1",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let Some((rowid, content)) = row else {
        return Ok(false);
    };

    // External-content FTS rows are removed by replaying the indexed content
    conn.execute(
        "INSERT INTO exchanges_fts (exchanges_fts, rowid, content) VALUES ('delete', ?1, ?2)",
        params![rowid, content],
    )?;
    conn.execute("DELETE FROM exchanges_vec WHERE id = ?1", params![id])?;
    conn.execute("DELETE FROM exchanges WHERE id = ?1", params![id])?;
    Ok(true)
}

pub fn entry_ids_for_path(conn: &Connection, archive_path: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT id FROM exchanges WHERE archive_path = ?1")?;
    let ids = stmt
        .query_map(params![archive_path], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Remove every entry of one archived file. Returns how many were removed.
pub fn delete_entries_for_path(conn: &Connection, archive_path: &str) -> rusqlite::Result<usize> {
    let mut removed = 0;
    for id in entry_ids_for_path(conn, archive_path)? {
        if delete_entry(conn, &id)? {
            removed += 1;
        }
    }
    Ok(removed)
}

/// Archive paths that currently have at least one entry.
pub fn indexed_paths(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT DISTINCT archive_path FROM exchanges ORDER BY archive_path")?;
    let paths = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(paths)
}

/// Archive paths with an entry whose vector row is missing.
pub fn paths_missing_vectors(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT e.archive_path FROM exchanges e \
         WHERE NOT EXISTS (SELECT 1 FROM exchanges_vec v WHERE v.id = e.id) \
         ORDER BY e.archive_path",
    )?;
    let paths = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(paths)
}

pub fn entry_count(conn: &Connection) -> rusqlite::Result<usize> {
    conn.query_row("SELECT COUNT(*) FROM exchanges", [], |row| {
        row.get::<_, i64>(0).map(|n| n as usize)
    })
}

/// Audit operations recorded in `index_log`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOperation {
    Index,
    Exclude,
    Remove,
    Repair,
    Rebuild,
}

impl LogOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogOperation::Index => "index",
            LogOperation::Exclude => "exclude",
            LogOperation::Remove => "remove",
            LogOperation::Repair => "repair",
            LogOperation::Rebuild => "rebuild",
        }
    }
}

pub fn write_audit_log(
    conn: &Connection,
    operation: LogOperation,
    archive_path: &str,
    details: Option<&serde_json::Value>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO index_log (operation, archive_path, details, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            operation.as_str(),
            archive_path,
            details.map(|d| d.to_string()),
            format_timestamp(&Utc::now()),
        ],
    )?;
    Ok(())
}
