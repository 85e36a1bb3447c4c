//! Multi-concept AND search.
//!
//! Each concept is searched on its own in `Both` mode. A conversation
//! qualifies only when every concept matched at least one of its exchanges;
//! its score is the sum of the best per-concept scores.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use rusqlite::Connection;

use super::filter::DateWindow;
use super::hybrid::{self, Ranked, SearchMode};
use super::{fetch_rows, sort_results, ConceptMatch, EntryRow, QueryVectors, SearchResponse};
use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::Result;

/// Best hit of one concept within one conversation.
struct ConceptBest {
    ranked: Ranked,
    row: EntryRow,
}

/// Score desc, then newer exchange, then earlier line. Candidates arrive in
/// no particular order, so equal scores must still pick the same exchange.
fn outranks(ranked: &Ranked, row: &EntryRow, current: &ConceptBest) -> bool {
    ranked
        .score
        .partial_cmp(&current.ranked.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| row.timestamp.cmp(&current.row.timestamp))
        .then_with(|| current.row.line_start.cmp(&row.line_start))
        == Ordering::Greater
}

pub(crate) fn search_concepts(
    conn: &Connection,
    embedder: &dyn EmbeddingProvider,
    concepts: &[String],
    limit: usize,
    window: &DateWindow,
    config: &RetrievalConfig,
) -> Result<SearchResponse> {
    let mut vectors = QueryVectors::new(conn, embedder, true)?;

    // archive path -> per-concept best, in concept order
    let mut per_path: BTreeMap<String, Vec<Option<ConceptBest>>> = BTreeMap::new();

    for (index, concept) in concepts.iter().enumerate() {
        let embedding = vectors.embed(concept);
        let ranked = hybrid::rank(
            conn,
            concept,
            embedding.as_deref(),
            SearchMode::Both,
            config.concept_pool,
            config.min_similarity,
            window,
        )?;
        let rows = fetch_rows(conn, ranked.iter().map(|r| r.id.as_str()))?;

        let mut best: HashMap<String, ConceptBest> = HashMap::new();
        for r in ranked {
            let Some(row) = rows.get(&r.id) else { continue };
            let replace = best
                .get(&row.archive_path)
                .map_or(true, |current| outranks(&r, row, current));
            if replace {
                best.insert(
                    row.archive_path.clone(),
                    ConceptBest {
                        ranked: r,
                        row: row.clone(),
                    },
                );
            }
        }

        for (path, hit) in best {
            let slots = per_path
                .entry(path)
                .or_insert_with(|| (0..concepts.len()).map(|_| None).collect());
            slots[index] = Some(hit);
        }
    }

    let mut results = Vec::new();
    for (_, slots) in per_path {
        let Some(hits) = slots.into_iter().collect::<Option<Vec<ConceptBest>>>() else {
            continue;
        };

        let total: f64 = hits.iter().map(|h| h.ranked.score).sum();
        let lead = hits
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                a.ranked
                    .score
                    .partial_cmp(&b.ranked.score)
                    .unwrap_or(Ordering::Equal)
            })
            .map(|(i, _)| i)
            .unwrap_or(0);

        let mut result = hits[lead].row.to_result(
            &concepts[lead],
            total,
            hits[lead].ranked.matched_by,
            config.snippet_chars,
        );
        result.concepts = Some(
            concepts
                .iter()
                .zip(&hits)
                .map(|(concept, hit)| ConceptMatch {
                    concept: concept.clone(),
                    score: hit.ranked.score,
                    line_start: hit.row.line_start,
                    line_end: hit.row.line_end,
                })
                .collect(),
        );
        results.push(result);
    }

    sort_results(&mut results);
    let total_matched = results.len();
    results.truncate(limit);
    tracing::debug!(concepts = concepts.len(), total_matched, "multi-concept search complete");

    Ok(SearchResponse {
        results,
        warnings: vectors.warnings,
        total_matched,
    })
}
