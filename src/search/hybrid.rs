//! Candidate retrieval from both structures and the normalized-sum merge.
//!
//! Vector scores are cosine similarity mapped to `[0, 1]` by `(cos + 1) / 2`.
//! Text scores are bm25 relevance `b` (negated FTS5 rank) mapped by
//! `b / (1 + b)`. In `Both` mode the normalized scores add up and an entry
//! found by both structures gets [`AGREEMENT_BONUS`], which is larger than any
//! single normalized score; a double match therefore always outranks a single
//! one.

use std::collections::HashMap;

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use super::filter::DateWindow;
use crate::index::embedding_to_bytes;

pub const AGREEMENT_BONUS: f64 = 1.0;

/// sqlite-vec caps `k` for KNN queries.
const MAX_KNN: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Vector,
    Text,
    #[default]
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchedBy {
    Vector,
    Text,
    Both,
}

/// One entry that survived retrieval and date filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct Ranked {
    pub id: String,
    pub score: f64,
    pub matched_by: MatchedBy,
}

/// Cosine similarity of unit vectors from their L2 distance.
pub fn cosine_from_l2(distance: f64) -> f64 {
    1.0 - distance * distance / 2.0
}

pub fn normalize_vector(cosine: f64) -> f64 {
    ((cosine + 1.0) / 2.0).clamp(0.0, 1.0)
}

pub fn normalize_text(relevance: f64) -> f64 {
    let b = relevance.max(0.0);
    b / (1.0 + b)
}

/// Whole query as one FTS5 phrase. With the trigram tokenizer this is a
/// case-insensitive substring match.
pub fn fts_phrase(query: &str) -> String {
    format!("\"{}\"", query.replace('"', "\"\""))
}

/// KNN neighbours at or above `min_similarity`, as `(id, cosine)`.
pub fn vector_candidates(
    conn: &Connection,
    embedding: &[f32],
    pool: usize,
    min_similarity: f64,
    window: &DateWindow,
) -> rusqlite::Result<Vec<(String, f64)>> {
    // Date filtering happens after KNN, so look further when a window is set
    let k = if window.is_open() { pool } else { pool * 4 }.clamp(1, MAX_KNN);
    let mut stmt = conn.prepare(
        "WITH knn AS ( \
             SELECT id, distance FROM exchanges_vec WHERE embedding MATCH ?1 AND k = ?2 \
         ) \
         SELECT knn.id, knn.distance, e.timestamp FROM knn \
         JOIN exchanges e ON e.id = knn.id \
         ORDER BY knn.distance",
    )?;
    let rows = stmt
        .query_map(params![embedding_to_bytes(embedding), k as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows
        .into_iter()
        .filter(|(_, _, ts)| window.contains(ts))
        .map(|(id, distance, _)| (id, cosine_from_l2(distance)))
        .filter(|(_, cosine)| *cosine >= min_similarity)
        .take(pool)
        .collect())
}

/// Substring matches ranked by bm25, as `(id, relevance)` with higher better.
pub fn text_candidates(
    conn: &Connection,
    query: &str,
    pool: usize,
    window: &DateWindow,
) -> rusqlite::Result<Vec<(String, f64)>> {
    let (after, before) = window.sql_bounds();
    let mut stmt = conn.prepare(
        "SELECT e.id, exchanges_fts.rank FROM exchanges_fts \
         JOIN exchanges e ON e.rowid = exchanges_fts.rowid \
         WHERE exchanges_fts MATCH ?1 \
           AND (?2 IS NULL OR e.timestamp >= ?2) \
           AND (?3 IS NULL OR e.timestamp < ?3) \
         ORDER BY exchanges_fts.rank LIMIT ?4",
    )?;
    let rows = stmt
        .query_map(params![fts_phrase(query), after, before, pool as i64], |row| {
            Ok((row.get::<_, String>(0)?, -row.get::<_, f64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Combine candidate lists into ranked entries. Order among equal scores is
/// settled later, once timestamps and paths are known.
pub fn merge(vector: &[(String, f64)], text: &[(String, f64)]) -> Vec<Ranked> {
    let mut by_id: HashMap<&str, (Option<f64>, Option<f64>)> = HashMap::new();
    for (id, cosine) in vector {
        by_id.entry(id.as_str()).or_default().0 = Some(*cosine);
    }
    for (id, relevance) in text {
        by_id.entry(id.as_str()).or_default().1 = Some(*relevance);
    }

    by_id
        .into_iter()
        .filter_map(|(id, scores)| {
            let (score, matched_by) = match scores {
                (Some(v), Some(t)) => (
                    normalize_vector(v) + normalize_text(t) + AGREEMENT_BONUS,
                    MatchedBy::Both,
                ),
                (Some(v), None) => (normalize_vector(v), MatchedBy::Vector),
                (None, Some(t)) => (normalize_text(t), MatchedBy::Text),
                (None, None) => return None,
            };
            Some(Ranked {
                id: id.to_string(),
                score,
                matched_by,
            })
        })
        .collect()
}

/// Retrieve and merge for one query text.
///
/// `embedding` is `None` when vector search is unavailable; the caller has
/// already downgraded the mode and warned.
pub fn rank(
    conn: &Connection,
    query: &str,
    embedding: Option<&[f32]>,
    mode: SearchMode,
    pool: usize,
    min_similarity: f64,
    window: &DateWindow,
) -> rusqlite::Result<Vec<Ranked>> {
    let vector = match (mode, embedding) {
        (SearchMode::Vector | SearchMode::Both, Some(e)) => {
            vector_candidates(conn, e, pool, min_similarity, window)?
        }
        _ => Vec::new(),
    };
    let text = match mode {
        SearchMode::Text | SearchMode::Both => text_candidates(conn, query, pool, window)?,
        SearchMode::Vector if embedding.is_none() => text_candidates(conn, query, pool, window)?,
        SearchMode::Vector => Vec::new(),
    };
    Ok(merge(&vector, &text))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(ranked: &[Ranked]) -> Vec<(&str, MatchedBy)> {
        let mut out: Vec<_> = ranked.iter().map(|r| (r.id.as_str(), r.matched_by)).collect();
        out.sort_by(|a, b| a.0.cmp(b.0));
        out
    }

    #[test]
    fn cosine_mapping() {
        assert!((cosine_from_l2(0.0) - 1.0).abs() < 1e-12);
        assert!((cosine_from_l2(2f64.sqrt())).abs() < 1e-12);
        assert!((normalize_vector(1.0) - 1.0).abs() < 1e-12);
        assert!((normalize_vector(-1.0)).abs() < 1e-12);
    }

    #[test]
    fn text_normalization_is_monotonic_and_bounded() {
        assert_eq!(normalize_text(0.0), 0.0);
        assert_eq!(normalize_text(-3.0), 0.0);
        assert!(normalize_text(2.0) > normalize_text(1.0));
        assert!(normalize_text(1e9) < 1.0);
    }

    #[test]
    fn double_match_outranks_any_single_match() {
        let vector = vec![("a".to_string(), 0.30), ("b".to_string(), 0.99)];
        let text = vec![("a".to_string(), 0.01), ("c".to_string(), 50.0)];
        let merged = merge(&vector, &text);
        assert_eq!(
            ids(&merged),
            vec![("a", MatchedBy::Both), ("b", MatchedBy::Vector), ("c", MatchedBy::Text)]
        );
        let score = |id: &str| merged.iter().find(|r| r.id == id).unwrap().score;
        assert!(score("a") > score("b"));
        assert!(score("a") > score("c"));
    }

    #[test]
    fn phrase_escapes_quotes() {
        assert_eq!(fts_phrase("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
