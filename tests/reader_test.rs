mod helpers;

use echoes::error::ArchiveError;
use echoes::reader::read_conversation;
use helpers::{claude_transcript, search_corpus, TestArchive, MARKER};

#[test]
fn excluded_conversation_reads_like_any_other() {
    let archive = search_corpus();
    let page = read_conversation(&archive.root, "private/secret.jsonl", None, None).unwrap();
    assert_eq!(page.exchange_count, 2);
    assert!(page.markdown.contains("Plan the zanzibar surprise party"));
    assert!(page.markdown.contains(MARKER));
}

#[test]
fn line_range_selects_whole_exchanges_only() {
    let archive = TestArchive::new();
    let turns: Vec<(String, String)> = (1..=60)
        .map(|i| (format!("question number {i}"), format!("answer number {i}")))
        .collect();
    let refs: Vec<(&str, &str)> = turns.iter().map(|(u, a)| (u.as_str(), a.as_str())).collect();
    archive.write("proj/long.jsonl", &claude_transcript(&refs, Some("2025-09-15T10:00:00Z")));

    // Turn k spans lines 2k-1..=2k; line 100 closes turn 50, 101 opens turn 51
    let page = read_conversation(&archive.root, "proj/long.jsonl", Some(100), Some(110)).unwrap();
    assert_eq!(page.exchange_count, 5);
    assert_eq!((page.first_line, page.last_line), (Some(101), Some(110)));
    assert!(page.markdown.contains("question number 51"));
    assert!(page.markdown.contains("question number 55"));
    assert!(!page.markdown.contains("question number 50\n"));
    assert!(!page.markdown.contains("question number 56"));

    let tail = read_conversation(&archive.root, "proj/long.jsonl", Some(115), None).unwrap();
    assert_eq!(tail.exchange_count, 3);
}

#[test]
fn range_beyond_the_file_is_empty_markdown() {
    let archive = search_corpus();
    let page = read_conversation(&archive.root, "webapp/ws.jsonl", Some(100), Some(200)).unwrap();
    assert_eq!(page.exchange_count, 0);
    assert_eq!(page.markdown, "_No conversation content in lines 100–200._");
}

#[test]
fn paths_are_confined_to_the_archive() {
    let archive = search_corpus();
    for path in [
        "../outside.jsonl",
        "webapp/../../outside.jsonl",
        "webapp/missing.jsonl",
        "/etc/passwd",
    ] {
        let err = read_conversation(&archive.root, path, None, None).unwrap_err();
        assert!(matches!(err, ArchiveError::PathResolution(_)), "{path}: {err}");
        assert!(err.is_user_error());
    }
}

#[test]
fn bad_ranges_are_input_errors() {
    let archive = search_corpus();
    for (start, end) in [(Some(0), None), (Some(10), Some(9))] {
        let err = read_conversation(&archive.root, "webapp/ws.jsonl", start, end).unwrap_err();
        assert!(matches!(err, ArchiveError::InputValidation(_)));
    }
}
