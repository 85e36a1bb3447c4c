//! Per-file index state and indexing claims.
//!
//! A claim is a lease on one archive path: `claimed_by` names the owner and
//! `claimed_at` starts the lease. Acquiring is a single conditional upsert,
//! so two processes can never both believe they hold the same file.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::format_timestamp;
use crate::transcript::Exclusion;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexState {
    pub archive_path: String,
    /// Modification signature of the file when it was last indexed.
    pub marker: Option<String>,
    pub excluded: bool,
    pub exclusion: Option<String>,
    pub exchange_count: usize,
    pub indexed_at: Option<String>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<String>,
    pub last_error: Option<String>,
}

const STATE_COLUMNS: &str = "archive_path, marker, excluded, exclusion, exchange_count, \
     indexed_at, claimed_by, claimed_at, last_error";

fn state_from_row(row: &Row<'_>) -> rusqlite::Result<IndexState> {
    Ok(IndexState {
        archive_path: row.get(0)?,
        marker: row.get(1)?,
        excluded: row.get(2)?,
        exclusion: row.get(3)?,
        exchange_count: row.get::<_, i64>(4)? as usize,
        indexed_at: row.get(5)?,
        claimed_by: row.get(6)?,
        claimed_at: row.get(7)?,
        last_error: row.get(8)?,
    })
}

pub fn get_state(conn: &Connection, archive_path: &str) -> rusqlite::Result<Option<IndexState>> {
    conn.query_row(
        &format!("SELECT {STATE_COLUMNS} FROM index_state WHERE archive_path = ?1"),
        params![archive_path],
        state_from_row,
    )
    .optional()
}

pub fn all_states(conn: &Connection) -> rusqlite::Result<Vec<IndexState>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {STATE_COLUMNS} FROM index_state ORDER BY archive_path"
    ))?;
    let states = stmt
        .query_map([], state_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(states)
}

/// Try to take the claim on `archive_path`. Succeeds when the path is
/// unclaimed, the existing lease has expired, or `owner` already holds it.
pub fn try_claim(
    conn: &Connection,
    archive_path: &str,
    owner: &str,
    ttl: Duration,
    now: DateTime<Utc>,
) -> rusqlite::Result<bool> {
    let now_str = format_timestamp(&now);
    let expired_before = format_timestamp(&(now - ttl));
    let changed = conn.execute(
        "INSERT INTO index_state (archive_path, claimed_by, claimed_at) VALUES (?1, ?2, ?3) \
         ON CONFLICT(archive_path) DO UPDATE SET claimed_by = ?2, claimed_at = ?3 \
         WHERE index_state.claimed_by IS NULL \
            OR index_state.claimed_by = ?2 \
            OR index_state.claimed_at IS NULL \
            OR index_state.claimed_at < ?4",
        params![archive_path, owner, now_str, expired_before],
    )?;
    Ok(changed == 1)
}

/// Paths whose claim is held by someone other than `owner` and has not
/// expired yet.
pub fn live_claims(
    conn: &Connection,
    owner: &str,
    ttl: Duration,
    now: DateTime<Utc>,
) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT archive_path FROM index_state \
         WHERE claimed_by IS NOT NULL AND claimed_by <> ?1 \
           AND claimed_at IS NOT NULL AND claimed_at >= ?2 \
         ORDER BY archive_path",
    )?;
    let paths = stmt
        .query_map(params![owner, format_timestamp(&(now - ttl))], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(paths)
}

pub fn holds_claim(conn: &Connection, archive_path: &str, owner: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) > 0 FROM index_state WHERE archive_path = ?1 AND claimed_by = ?2",
        params![archive_path, owner],
        |row| row.get(0),
    )
}

/// Give the claim back without touching the marker, so the file stays
/// stale and is retried on the next run.
pub fn release_claim(
    conn: &Connection,
    archive_path: &str,
    owner: &str,
    error: Option<&str>,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE index_state SET claimed_by = NULL, claimed_at = NULL, last_error = ?3 \
         WHERE archive_path = ?1 AND claimed_by = ?2",
        params![archive_path, owner, error],
    )?;
    Ok(())
}

/// Record a finished indexing pass and drop the claim. Returns `false` when
/// `owner` no longer holds the claim, in which case nothing is written.
pub fn complete(
    conn: &Connection,
    archive_path: &str,
    owner: &str,
    marker: &str,
    exclusion: Exclusion,
    exchange_count: usize,
) -> rusqlite::Result<bool> {
    let exclusion_label = match exclusion {
        Exclusion::Included => None,
        Exclusion::Marker => Some("marker"),
        Exclusion::SummaryPrompt => Some("summary_prompt"),
    };
    let changed = conn.execute(
        "UPDATE index_state SET marker = ?3, excluded = ?4, exclusion = ?5, exchange_count = ?6, \
         indexed_at = ?7, claimed_by = NULL, claimed_at = NULL, last_error = NULL \
         WHERE archive_path = ?1 AND claimed_by = ?2",
        params![
            archive_path,
            owner,
            marker,
            exclusion.is_excluded(),
            exclusion_label,
            exchange_count as i64,
            format_timestamp(&Utc::now()),
        ],
    )?;
    Ok(changed == 1)
}

pub fn delete_state(conn: &Connection, archive_path: &str) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "DELETE FROM index_state WHERE archive_path = ?1",
        params![archive_path],
    )?;
    Ok(changed > 0)
}
