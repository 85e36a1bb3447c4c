//! Query the index: single-concept vector/text/hybrid search and
//! multi-concept AND search.
//!
//! Search never writes. Embedding trouble is not an error here: the query
//! falls back to the text structure and the response carries a warning.

pub mod filter;
pub mod hybrid;
pub mod multi;

use std::cmp::Ordering;
use std::collections::HashMap;

use rusqlite::{params_from_iter, Connection};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::RetrievalConfig;
use crate::db::migrations;
use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use filter::DateWindow;
pub use hybrid::{MatchedBy, SearchMode};

#[derive(Debug, Clone, PartialEq)]
pub enum SearchQuery {
    Single(String),
    /// Every concept must match somewhere in the same conversation.
    Multi(Vec<String>),
}

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub mode: SearchMode,
    /// Defaults to `retrieval.default_limit`.
    pub limit: Option<usize>,
    /// `YYYY-MM-DD`, inclusive.
    pub after: Option<String>,
    /// `YYYY-MM-DD`, exclusive.
    pub before: Option<String>,
}

/// Per-concept evidence for a multi-concept result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConceptMatch {
    pub concept: String,
    pub score: f64,
    pub line_start: usize,
    pub line_end: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub project: String,
    pub timestamp: String,
    pub archive_path: String,
    pub line_start: usize,
    pub line_end: usize,
    pub snippet: String,
    pub score: f64,
    pub matched_by: MatchedBy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concepts: Option<Vec<ConceptMatch>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub warnings: Vec<String>,
    /// Matches before the limit was applied.
    pub total_matched: usize,
}

/// Run one search request.
pub fn search(
    conn: &Connection,
    embedder: &dyn EmbeddingProvider,
    query: &SearchQuery,
    options: &SearchOptions,
    config: &RetrievalConfig,
) -> Result<SearchResponse> {
    let limit = filter::validate_limit(options.limit, config.default_limit)?;
    let window = DateWindow::parse(options.after.as_deref(), options.before.as_deref())?;

    match query {
        SearchQuery::Single(text) => {
            let text = filter::validate_query(text, "query")?;
            single(conn, embedder, &text, options.mode, limit, &window, config)
        }
        SearchQuery::Multi(concepts) => {
            let concepts = filter::validate_concepts(concepts)?;
            multi::search_concepts(conn, embedder, &concepts, limit, &window, config)
        }
    }
}

fn single(
    conn: &Connection,
    embedder: &dyn EmbeddingProvider,
    query: &str,
    mode: SearchMode,
    limit: usize,
    window: &DateWindow,
    config: &RetrievalConfig,
) -> Result<SearchResponse> {
    let mut vectors = QueryVectors::new(conn, embedder, mode != SearchMode::Text)?;
    let embedding = vectors.embed(query);
    let mode = if embedding.is_none() && mode == SearchMode::Vector {
        SearchMode::Text
    } else {
        mode
    };

    let ranked = hybrid::rank(
        conn,
        query,
        embedding.as_deref(),
        mode,
        config.candidate_pool,
        config.min_similarity,
        window,
    )?;
    let rows = fetch_rows(conn, ranked.iter().map(|r| r.id.as_str()))?;

    let mut results: Vec<SearchResult> = ranked
        .iter()
        .filter_map(|r| {
            let row = rows.get(&r.id)?;
            Some(row.to_result(query, r.score, r.matched_by, config.snippet_chars))
        })
        .collect();
    sort_results(&mut results);

    let total_matched = results.len();
    results.truncate(limit);
    debug!(query, total_matched, returned = results.len(), "search complete");

    Ok(SearchResponse {
        results,
        warnings: vectors.warnings,
        total_matched,
    })
}

/// Resolves query vectors once per request, downgrading to text search when
/// the embedding capability is missing or incompatible with the index.
pub(crate) struct QueryVectors<'a> {
    embedder: &'a dyn EmbeddingProvider,
    enabled: bool,
    pub warnings: Vec<String>,
}

impl<'a> QueryVectors<'a> {
    pub(crate) fn new(conn: &Connection, embedder: &'a dyn EmbeddingProvider, wanted: bool) -> Result<Self> {
        let mut vectors = Self {
            embedder,
            enabled: false,
            warnings: Vec::new(),
        };
        if !wanted {
            return Ok(vectors);
        }
        match migrations::get_embedding_model(conn)? {
            // Nothing has vectors yet
            None => {}
            Some(stored) if stored != embedder.model_id() => {
                vectors.degrade(format!(
                    "index was built with {stored} but the embedding provider is {}",
                    embedder.model_id()
                ));
            }
            Some(_) => vectors.enabled = true,
        }
        Ok(vectors)
    }

    pub(crate) fn embed(&mut self, text: &str) -> Option<Vec<f32>> {
        if !self.enabled {
            return None;
        }
        match self.embedder.embed(text) {
            Ok(v) => Some(v),
            Err(e) => {
                self.degrade(format!("{e:#}"));
                None
            }
        }
    }

    fn degrade(&mut self, reason: String) {
        warn!(reason = %reason, "vector search unavailable, using text search only");
        self.enabled = false;
        self.warnings.push(format!(
            "vector search unavailable ({reason}); results come from text search only"
        ));
    }
}

/// Stored columns a result is built from.
#[derive(Debug, Clone)]
pub(crate) struct EntryRow {
    pub archive_path: String,
    pub project: String,
    pub timestamp: String,
    pub line_start: usize,
    pub line_end: usize,
    pub user_message: String,
    pub content: String,
}

impl EntryRow {
    pub(crate) fn to_result(&self, query: &str, score: f64, matched_by: MatchedBy, snippet_chars: usize) -> SearchResult {
        SearchResult {
            project: self.project.clone(),
            timestamp: self.timestamp.clone(),
            archive_path: self.archive_path.clone(),
            line_start: self.line_start,
            line_end: self.line_end,
            snippet: make_snippet(&self.content, &self.user_message, query, snippet_chars),
            score,
            matched_by,
            concepts: None,
        }
    }
}

/// Batch-fetch entry rows by id.
pub(crate) fn fetch_rows<'i>(
    conn: &Connection,
    ids: impl Iterator<Item = &'i str>,
) -> Result<HashMap<String, EntryRow>> {
    let ids: Vec<&str> = ids.collect();
    let mut map = HashMap::with_capacity(ids.len());
    // SQLite's default parameter limit is far above this, but stay well clear
    for chunk in ids.chunks(500) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let sql = format!(
            "SELECT id, archive_path, project, timestamp, line_start, line_end, user_message, content \
             FROM exchanges WHERE id IN ({placeholders})"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
            Ok((
                row.get::<_, String>(0)?,
                EntryRow {
                    archive_path: row.get(1)?,
                    project: row.get(2)?,
                    timestamp: row.get(3)?,
                    line_start: row.get::<_, i64>(4)? as usize,
                    line_end: row.get::<_, i64>(5)? as usize,
                    user_message: row.get(6)?,
                    content: row.get(7)?,
                },
            ))
        })?;
        for row in rows {
            let (id, entry) = row?;
            map.insert(id, entry);
        }
    }
    Ok(map)
}

/// Score desc, then newest first, then archive path, then line.
pub(crate) fn sort_results(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.timestamp.cmp(&a.timestamp))
            .then_with(|| a.archive_path.cmp(&b.archive_path))
            .then_with(|| a.line_start.cmp(&b.line_start))
    });
}

/// A window of `content` around the first case-insensitive occurrence of
/// `query`, or the opening of the user message when the query does not
/// occur verbatim. Whitespace runs collapse to single spaces.
pub fn make_snippet(content: &str, user_message: &str, query: &str, max_chars: usize) -> String {
    let flat = collapse_whitespace(content);
    let Some(hit) = find_case_insensitive(&flat, query) else {
        return truncate_chars(&collapse_whitespace(user_message), 0, max_chars);
    };
    let hit_char = flat[..hit].chars().count();
    let start = hit_char.saturating_sub(max_chars / 4);
    truncate_chars(&flat, start, max_chars)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Byte offset of the first case-insensitive occurrence of `needle`.
fn find_case_insensitive(haystack: &str, needle: &str) -> Option<usize> {
    let needle: Vec<char> = needle.chars().flat_map(char::to_lowercase).collect();
    if needle.is_empty() {
        return None;
    }
    haystack.char_indices().map(|(i, _)| i).find(|&i| {
        let mut rest = haystack[i..].chars().flat_map(char::to_lowercase);
        needle.iter().all(|n| rest.next() == Some(*n))
    })
}

/// `max_chars` characters starting at char `start`, with ellipses marking cuts.
fn truncate_chars(text: &str, start: usize, max_chars: usize) -> String {
    let total = text.chars().count();
    let body: String = text.chars().skip(start).take(max_chars).collect();
    let mut out = String::with_capacity(body.len() + 6);
    if start > 0 {
        out.push('…');
    }
    out.push_str(&body);
    if start + max_chars < total {
        out.push('…');
    }
    out
}
