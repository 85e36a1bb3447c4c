//! SQL DDL for the echoes index.
//!
//! `exchanges` holds one row per indexed exchange; `exchanges_fts` (FTS5,
//! trigram tokenizer) and `exchanges_vec` (vec0) are the two search
//! structures over the same rows. `index_state` tracks per-file progress and
//! claims, `index_log` is the audit trail. All DDL uses `IF NOT EXISTS`.

use rusqlite::Connection;

use crate::embedding::EMBEDDING_DIM;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS exchanges (
    id TEXT PRIMARY KEY,
    archive_path TEXT NOT NULL,
    project TEXT NOT NULL,
    line_start INTEGER NOT NULL,
    line_end INTEGER NOT NULL,
    timestamp TEXT NOT NULL,
    user_message TEXT NOT NULL,
    assistant_message TEXT NOT NULL,
    content TEXT NOT NULL,
    tool_names TEXT,
    indexed_at TEXT NOT NULL,
    UNIQUE(archive_path, line_start, line_end)
);

CREATE INDEX IF NOT EXISTS idx_exchanges_path ON exchanges(archive_path);
CREATE INDEX IF NOT EXISTS idx_exchanges_timestamp ON exchanges(timestamp);

-- Trigram tokenizer: phrase queries become case-insensitive substring matches
CREATE VIRTUAL TABLE IF NOT EXISTS exchanges_fts USING fts5(
    content,
    content='exchanges',
    content_rowid='rowid',
    tokenize='trigram'
);

CREATE TABLE IF NOT EXISTS index_state (
    archive_path TEXT PRIMARY KEY,
    marker TEXT,
    excluded INTEGER NOT NULL DEFAULT 0,
    exclusion TEXT,
    exchange_count INTEGER NOT NULL DEFAULT 0,
    indexed_at TEXT,
    claimed_by TEXT,
    claimed_at TEXT
);

CREATE TABLE IF NOT EXISTS index_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    operation TEXT NOT NULL CHECK(operation IN ('index','exclude','remove','repair','rebuild')),
    archive_path TEXT NOT NULL,
    details TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// vec0 virtual table must be created separately (sqlite-vec syntax).
fn vec_table_sql() -> String {
    format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS exchanges_vec USING vec0(
    id TEXT PRIMARY KEY,
    embedding FLOAT[{EMBEDDING_DIM}]
);"
    )
}

/// Initialize all schema tables. Idempotent.
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute_batch(&vec_table_sql())?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}
