//! Keeps the searchable index in step with the archive.
//!
//! - [`store`]: row-level writes to `exchanges`, `exchanges_fts`, `exchanges_vec`
//! - [`state`]: per-file markers and indexing claims
//! - [`maintainer`]: parse → exclusion check → embed → replace entries
//! - [`maintenance`]: cleanup, verify, repair, rebuild

pub mod maintainer;
pub mod maintenance;
pub mod state;
pub mod store;

pub use maintainer::{FileOutcome, IndexIssue, IndexMaintainer, IndexReport};
pub use maintenance::{run_maintenance, MaintenanceMode, MaintenanceReport, VerifyReport};

/// Convert an f32 embedding slice to raw bytes for sqlite-vec.
pub fn embedding_to_bytes(embedding: &[f32]) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            embedding.as_ptr() as *const u8,
            embedding.len() * std::mem::size_of::<f32>(),
        )
    }
}

/// Timestamp format used for every stored time: fixed width, so string
/// comparison in SQL orders chronologically.
pub fn format_timestamp(ts: &chrono::DateTime<chrono::Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn embedding_bytes_are_raw_f32() {
        let bytes = embedding_to_bytes(&[1.0f32, -2.0]);
        assert_eq!(bytes.len(), 8);
        assert_eq!(f32::from_ne_bytes(bytes[4..8].try_into().unwrap()), -2.0);
    }

    #[test]
    fn timestamps_sort_as_strings() {
        let early = chrono::Utc.with_ymd_and_hms(2025, 8, 15, 9, 0, 0).unwrap();
        let late = chrono::Utc.with_ymd_and_hms(2025, 9, 15, 10, 0, 0).unwrap();
        assert_eq!(format_timestamp(&late), "2025-09-15T10:00:00.000Z");
        assert!(format_timestamp(&early) < format_timestamp(&late));
    }
}
