//! Request validation: query text, limits, date windows.

use chrono::NaiveDate;

use crate::error::{ArchiveError, Result};

pub const MIN_QUERY_CHARS: usize = 3;
pub const MAX_LIMIT: usize = 50;
pub const MIN_CONCEPTS: usize = 2;
pub const MAX_CONCEPTS: usize = 5;

/// Trimmed query text with at least [`MIN_QUERY_CHARS`] non-whitespace characters.
pub fn validate_query(raw: &str, label: &str) -> Result<String> {
    let trimmed = raw.trim();
    let significant = trimmed.chars().filter(|c| !c.is_whitespace()).count();
    if significant < MIN_QUERY_CHARS {
        return Err(ArchiveError::invalid(format!(
            "{label} must contain at least {MIN_QUERY_CHARS} non-whitespace characters"
        )));
    }
    Ok(trimmed.to_string())
}

pub fn validate_concepts(concepts: &[String]) -> Result<Vec<String>> {
    if !(MIN_CONCEPTS..=MAX_CONCEPTS).contains(&concepts.len()) {
        return Err(ArchiveError::invalid(format!(
            "multi-concept search takes {MIN_CONCEPTS} to {MAX_CONCEPTS} concepts, got {}",
            concepts.len()
        )));
    }
    concepts
        .iter()
        .enumerate()
        .map(|(i, c)| validate_query(c, &format!("concept {}", i + 1)))
        .collect()
}

/// Out-of-range limits are rejected, not clamped.
pub fn validate_limit(limit: Option<usize>, default_limit: usize) -> Result<usize> {
    let limit = limit.unwrap_or(default_limit);
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(ArchiveError::invalid(format!(
            "limit must be between 1 and {MAX_LIMIT}, got {limit}"
        )));
    }
    Ok(limit)
}

/// `after` is inclusive, `before` exclusive, both whole UTC days.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateWindow {
    pub after: Option<NaiveDate>,
    pub before: Option<NaiveDate>,
}

impl DateWindow {
    pub fn parse(after: Option<&str>, before: Option<&str>) -> Result<Self> {
        let window = Self {
            after: after.map(|s| parse_date(s, "after")).transpose()?,
            before: before.map(|s| parse_date(s, "before")).transpose()?,
        };
        if let (Some(a), Some(b)) = (window.after, window.before) {
            if a >= b {
                return Err(ArchiveError::invalid(format!(
                    "after ({a}) must be earlier than before ({b})"
                )));
            }
        }
        Ok(window)
    }

    pub fn is_open(&self) -> bool {
        self.after.is_none() && self.before.is_none()
    }

    /// Bounds in the stored timestamp format, for SQL string comparison.
    pub fn sql_bounds(&self) -> (Option<String>, Option<String>) {
        let day = |d: NaiveDate| format!("{}T00:00:00.000Z", d.format("%Y-%m-%d"));
        (self.after.map(day), self.before.map(day))
    }

    /// Check one stored timestamp against the window.
    pub fn contains(&self, stored: &str) -> bool {
        let (after, before) = self.sql_bounds();
        after.map_or(true, |a| stored >= a.as_str()) && before.map_or(true, |b| stored < b.as_str())
    }
}

fn parse_date(raw: &str, label: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        ArchiveError::invalid(format!("{label} must be a YYYY-MM-DD date, got {raw:?}"))
    })
}
