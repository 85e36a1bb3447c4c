pub mod migrations;
pub mod schema;

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::Serialize;
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use std::sync::Once;
use std::time::Duration;

static SQLITE_VEC_INIT: Once = Once::new();

/// Register the sqlite-vec extension globally. Safe to call multiple times.
pub fn load_sqlite_vec() {
    SQLITE_VEC_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

fn configure(conn: &Connection) -> Result<()> {
    // Sync, index, and search may run in separate processes at once
    conn.busy_timeout(Duration::from_millis(5000))?;
    schema::init_schema(conn).context("failed to initialize schema")?;
    migrations::run_migrations(conn).context("failed to run migrations")?;
    Ok(())
}

/// Open (or create) the index database at the given path, with all
/// extensions loaded and schema initialized.
pub fn open_database(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    load_sqlite_vec();

    let conn = Connection::open(path)
        .with_context(|| format!("failed to open database at {}", path.display()))?;

    conn.pragma_update(None, "journal_mode", "WAL")?;
    configure(&conn)?;

    tracing::info!(path = %path.display(), "database initialized");
    Ok(conn)
}

/// Open a fully migrated in-memory database.
pub fn open_in_memory() -> Result<Connection> {
    load_sqlite_vec();
    let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
    configure(&conn)?;
    Ok(conn)
}

/// Output of [`check_database_health`], printed by `echoes doctor`.
#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub schema_version: u32,
    pub sqlite_vec_version: String,
    pub embedding_model: Option<String>,
    pub exchange_count: i64,
    pub vector_count: i64,
    pub indexed_files: i64,
    pub excluded_files: i64,
    pub failed_files: i64,
    pub log_count: i64,
    pub integrity_ok: bool,
    pub integrity_details: String,
}

pub fn check_database_health(conn: &Connection) -> rusqlite::Result<HealthReport> {
    let count = |sql: &str| conn.query_row(sql, [], |r| r.get::<_, i64>(0));

    let integrity_details: String =
        conn.query_row("PRAGMA integrity_check", [], |r| r.get(0))?;

    Ok(HealthReport {
        schema_version: migrations::get_schema_version(conn)?,
        sqlite_vec_version: conn.query_row("SELECT vec_version()", [], |r| r.get(0))?,
        embedding_model: migrations::get_embedding_model(conn)?,
        exchange_count: count("SELECT COUNT(*) FROM exchanges")?,
        vector_count: count("SELECT COUNT(*) FROM exchanges_vec")?,
        indexed_files: count("SELECT COUNT(*) FROM index_state WHERE excluded = 0 AND marker IS NOT NULL")?,
        excluded_files: count("SELECT COUNT(*) FROM index_state WHERE excluded = 1")?,
        failed_files: count("SELECT COUNT(*) FROM index_state WHERE last_error IS NOT NULL")?,
        log_count: count("SELECT COUNT(*) FROM index_log")?,
        integrity_ok: integrity_details == "ok",
        integrity_details,
    })
}
