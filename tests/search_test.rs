mod helpers;

use echoes::config::RetrievalConfig;
use echoes::error::ArchiveError;
use echoes::search::{search, MatchedBy, SearchMode, SearchOptions, SearchQuery, SearchResponse};
use helpers::{indexed_corpus, FailingEmbedder, HashingEmbedder};
use rusqlite::Connection;

fn run(conn: &Connection, query: &str, options: SearchOptions) -> SearchResponse {
    search(
        conn,
        &HashingEmbedder::new(),
        &SearchQuery::Single(query.to_string()),
        &options,
        &RetrievalConfig::default(),
    )
    .unwrap()
}

fn mode(mode: SearchMode) -> SearchOptions {
    SearchOptions {
        mode,
        ..SearchOptions::default()
    }
}

fn paths(response: &SearchResponse) -> Vec<&str> {
    response.results.iter().map(|r| r.archive_path.as_str()).collect()
}

#[test]
fn text_search_is_a_case_insensitive_substring_match() {
    let (_archive, conn) = indexed_corpus();
    let response = run(&conn, "websocket RECONNECT", mode(SearchMode::Text));

    assert_eq!(paths(&response), vec!["webapp/ws.jsonl"]);
    let hit = &response.results[0];
    assert_eq!((hit.line_start, hit.line_end), (1, 2));
    assert_eq!(hit.matched_by, MatchedBy::Text);
    assert_eq!(hit.project, "webapp");
    assert!(hit.snippet.contains("WebSocket reconnect"));
    assert!(response.warnings.is_empty());
}

#[test]
fn vector_search_ignores_word_order() {
    let (_archive, conn) = indexed_corpus();

    let text = run(&conn, "reconnect websocket", mode(SearchMode::Text));
    assert!(text.results.is_empty());

    let vector = run(&conn, "reconnect websocket", mode(SearchMode::Vector));
    assert_eq!(paths(&vector)[0], "webapp/ws.jsonl");
    assert_eq!(vector.results[0].line_start, 1);
    assert_eq!(vector.results[0].matched_by, MatchedBy::Vector);
}

#[test]
fn hybrid_hit_from_both_structures_ranks_first() {
    let (_archive, conn) = indexed_corpus();
    let response = run(&conn, "WebSocket reconnect", SearchOptions::default());

    let top = &response.results[0];
    assert_eq!(top.archive_path, "webapp/ws.jsonl");
    assert_eq!(top.matched_by, MatchedBy::Both);
    for other in &response.results[1..] {
        assert!(top.score > other.score);
    }
}

#[test]
fn hybrid_matches_both_sides_of_a_concept() {
    let (_archive, conn) = indexed_corpus();
    let response = run(&conn, "error handling", SearchOptions::default());

    let mut found = paths(&response);
    found.sort();
    assert_eq!(found, vec!["billing/errors-only.jsonl", "webapp/auth.jsonl"]);
    assert!(response.results.iter().all(|r| r.matched_by == MatchedBy::Both));
    let auth = response
        .results
        .iter()
        .find(|r| r.archive_path == "webapp/auth.jsonl")
        .unwrap();
    assert_eq!((auth.line_start, auth.line_end), (3, 4));
}

#[test]
fn ranking_is_deterministic() {
    let (_archive, conn) = indexed_corpus();
    let first = run(&conn, "authentication", SearchOptions::default());
    let second = run(&conn, "authentication", SearchOptions::default());
    assert_eq!(first.results, second.results);
    assert_eq!(first.total_matched, 2);
}

#[test]
fn excluded_conversations_never_surface() {
    let (_archive, conn) = indexed_corpus();
    for search_mode in [SearchMode::Text, SearchMode::Vector, SearchMode::Both] {
        let response = run(&conn, "zanzibar", mode(search_mode));
        assert!(response.results.is_empty(), "{search_mode:?}: {:?}", paths(&response));
    }
    let marker = run(&conn, "DO NOT INDEX", mode(SearchMode::Text));
    assert!(marker.results.is_empty());
}

#[test]
fn date_window_filters_both_structures() {
    let (_archive, conn) = indexed_corpus();

    let all = run(&conn, "deployment pipeline", mode(SearchMode::Text));
    assert_eq!(all.results.len(), 2);

    for search_mode in [SearchMode::Text, SearchMode::Vector, SearchMode::Both] {
        let response = run(
            &conn,
            "deployment pipeline",
            SearchOptions {
                mode: search_mode,
                after: Some("2025-09-01".into()),
                ..SearchOptions::default()
            },
        );
        assert_eq!(paths(&response), vec!["ops/deploy-sep.jsonl"], "{search_mode:?}");
        assert!(response.results[0].timestamp.starts_with("2025-09-15"));
    }

    let before = run(
        &conn,
        "deployment pipeline",
        SearchOptions {
            before: Some("2025-09-01".into()),
            ..SearchOptions::default()
        },
    );
    assert_eq!(paths(&before), vec!["ops/deploy-aug.jsonl"]);
}

#[test]
fn after_is_inclusive_and_before_exclusive() {
    let (_archive, conn) = indexed_corpus();
    let on_the_day = run(
        &conn,
        "deployment pipeline",
        SearchOptions {
            mode: SearchMode::Text,
            after: Some("2025-09-15".into()),
            before: Some("2025-09-16".into()),
            ..SearchOptions::default()
        },
    );
    assert_eq!(paths(&on_the_day), vec!["ops/deploy-sep.jsonl"]);

    let day_before = run(
        &conn,
        "deployment pipeline",
        SearchOptions {
            mode: SearchMode::Text,
            after: Some("2025-09-14".into()),
            before: Some("2025-09-15".into()),
            ..SearchOptions::default()
        },
    );
    assert!(day_before.results.is_empty());
}

#[test]
fn undated_exchanges_use_the_archived_file_time() {
    let (_archive, conn) = indexed_corpus();
    let inside = run(
        &conn,
        "telescope mount",
        SearchOptions {
            after: Some("2025-09-20".into()),
            ..SearchOptions::default()
        },
    );
    assert_eq!(paths(&inside), vec!["notes/undated.jsonl"]);
    assert_eq!(inside.results[0].timestamp, "2025-09-20T00:00:00.000Z");

    let outside = run(
        &conn,
        "telescope mount",
        SearchOptions {
            before: Some("2025-09-20".into()),
            ..SearchOptions::default()
        },
    );
    assert!(outside.results.is_empty());
}

#[test]
fn limit_truncates_but_total_counts_everything() {
    let (_archive, conn) = indexed_corpus();
    let response = run(
        &conn,
        "deployment pipeline",
        SearchOptions {
            mode: SearchMode::Text,
            limit: Some(1),
            ..SearchOptions::default()
        },
    );
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.total_matched, 2);
}

#[test]
fn invalid_requests_are_rejected() {
    let (_archive, conn) = indexed_corpus();
    let embedder = HashingEmbedder::new();
    let config = RetrievalConfig::default();
    let query = SearchQuery::Single("deployment".into());

    let bad_options = [
        SearchOptions {
            limit: Some(0),
            ..SearchOptions::default()
        },
        SearchOptions {
            limit: Some(51),
            ..SearchOptions::default()
        },
        SearchOptions {
            after: Some("15/09/2025".into()),
            ..SearchOptions::default()
        },
        SearchOptions {
            after: Some("2025-09-15".into()),
            before: Some("2025-09-01".into()),
            ..SearchOptions::default()
        },
    ];
    for options in &bad_options {
        let err = search(&conn, &embedder, &query, options, &config).unwrap_err();
        assert!(matches!(err, ArchiveError::InputValidation(_)), "{options:?}: {err}");
    }

    for text in ["", "  ", "ab", " a b "] {
        let err = search(
            &conn,
            &embedder,
            &SearchQuery::Single(text.into()),
            &SearchOptions::default(),
            &config,
        )
        .unwrap_err();
        assert!(matches!(err, ArchiveError::InputValidation(_)), "{text:?}");
    }
}

#[test]
fn embedding_failure_degrades_to_text_with_warning() {
    let (_archive, conn) = indexed_corpus();
    let response = search(
        &conn,
        &FailingEmbedder,
        &SearchQuery::Single("WebSocket reconnect".into()),
        &SearchOptions::default(),
        &RetrievalConfig::default(),
    )
    .unwrap();

    assert_eq!(paths(&response), vec!["webapp/ws.jsonl"]);
    assert_eq!(response.results[0].matched_by, MatchedBy::Text);
    assert_eq!(response.warnings.len(), 1);
    assert!(response.warnings[0].contains("model file missing"));
}

#[test]
fn model_mismatch_degrades_vector_mode_to_text() {
    let (_archive, conn) = indexed_corpus();
    let response = search(
        &conn,
        &HashingEmbedder::with_model("some-other-model"),
        &SearchQuery::Single("deployment pipeline".into()),
        &mode(SearchMode::Vector),
        &RetrievalConfig::default(),
    )
    .unwrap();

    assert_eq!(response.results.len(), 2);
    assert!(response.results.iter().all(|r| r.matched_by == MatchedBy::Text));
    assert!(response.warnings[0].contains("some-other-model"));
}

#[test]
fn text_mode_never_touches_the_embedder() {
    let (_archive, conn) = indexed_corpus();
    let response = search(
        &conn,
        &FailingEmbedder,
        &SearchQuery::Single("backoff".into()),
        &mode(SearchMode::Text),
        &RetrievalConfig::default(),
    )
    .unwrap();
    assert_eq!(response.results.len(), 2);
    assert!(response.warnings.is_empty());
}

#[test]
fn empty_index_returns_no_results() {
    let conn = helpers::test_db();
    let response = run(&conn, "anything at all", SearchOptions::default());
    assert!(response.results.is_empty());
    assert_eq!(response.total_matched, 0);
    assert!(response.warnings.is_empty());
}
