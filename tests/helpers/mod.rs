#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::NaiveDate;
use echoes::config::IndexingConfig;
use echoes::db;
use echoes::embedding::{EmbeddingProvider, EMBEDDING_DIM};
use echoes::index::{IndexMaintainer, IndexReport};
use rusqlite::Connection;
use serde_json::json;
use tempfile::TempDir;

pub const TEST_MODEL: &str = "hashing-test";

const STOPWORDS: &[&str] = &[
    "this", "that", "with", "what", "have", "from", "your", "about", "there", "when", "which",
    "should", "would", "could", "into", "does", "need", "some", "they", "them", "then", "than",
    "were", "will", "just", "like", "only", "also", "more",
];

/// Deterministic bag-of-words embedder: every ASCII word of four or more
/// letters (minus stopwords) adds weight to one FNV-1a bucket, and the result
/// is L2-normalized. Texts sharing words land close together.
pub struct HashingEmbedder {
    model: String,
}

impl HashingEmbedder {
    pub fn new() -> Self {
        Self::with_model(TEST_MODEL)
    }

    pub fn with_model(model: &str) -> Self {
        Self {
            model: model.to_string(),
        }
    }
}

fn bucket(token: &str) -> usize {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in token.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    (hash % EMBEDDING_DIM as u64) as usize
}

impl EmbeddingProvider for HashingEmbedder {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        for word in text.split(|c: char| !c.is_ascii_alphanumeric()) {
            if word.len() < 4 {
                continue;
            }
            let word = word.to_ascii_lowercase();
            if STOPWORDS.contains(&word.as_str()) {
                continue;
            }
            v[bucket(&word)] += 1.0;
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            v[EMBEDDING_DIM - 1] = 1.0;
        } else {
            for x in &mut v {
                *x /= norm;
            }
        }
        Ok(v)
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

/// Reports the test model id but cannot produce vectors.
pub struct FailingEmbedder;

impl EmbeddingProvider for FailingEmbedder {
    fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
        anyhow::bail!("model file missing")
    }

    fn model_id(&self) -> &str {
        TEST_MODEL
    }
}

/// Open a fresh in-memory database with schema and migrations applied.
pub fn test_db() -> Connection {
    db::open_in_memory().unwrap()
}

/// Role-keyed transcript: one user line and one assistant line per turn, so
/// turn `k` (1-based) spans lines `2k-1..=2k`.
pub fn claude_transcript(turns: &[(&str, &str)], timestamp: Option<&str>) -> String {
    let mut out = String::new();
    for (user, assistant) in turns {
        let mut user_line = json!({
            "type": "user",
            "message": { "role": "user", "content": user },
        });
        if let Some(ts) = timestamp {
            user_line["timestamp"] = json!(ts);
        }
        let assistant_line = json!({
            "type": "assistant",
            "message": { "role": "assistant", "content": [{ "type": "text", "text": assistant }] },
        });
        out.push_str(&format!("{user_line}\n{assistant_line}\n"));
    }
    out
}

/// Envelope transcript: a session header, then two lines per turn, so turn
/// `k` spans lines `2k..=2k+1`.
pub fn pi_transcript(turns: &[(&str, &str)], timestamp: Option<&str>) -> String {
    let mut out = format!("{}\n", json!({ "type": "session", "version": 3, "id": "s1" }));
    for (user, assistant) in turns {
        let mut user_line = json!({
            "type": "message",
            "message": { "role": "user", "content": [{ "type": "text", "text": user }] },
        });
        if let Some(ts) = timestamp {
            user_line["timestamp"] = json!(ts);
        }
        let assistant_line = json!({
            "type": "message",
            "message": { "role": "assistant", "content": [{ "type": "text", "text": assistant }] },
        });
        out.push_str(&format!("{user_line}\n{assistant_line}\n"));
    }
    out
}

/// Midnight UTC of a `YYYY-MM-DD` day.
pub fn day(date: &str) -> SystemTime {
    let secs = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc()
        .timestamp();
    UNIX_EPOCH + Duration::from_secs(secs as u64)
}

pub fn set_mtime(path: &Path, time: SystemTime) {
    fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(time)
        .unwrap();
}

/// A temporary directory standing in for the archive root.
pub struct TestArchive {
    _dir: TempDir,
    pub root: PathBuf,
}

impl TestArchive {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("archive");
        fs::create_dir_all(&root).unwrap();
        Self { _dir: dir, root }
    }

    pub fn path(&self, archive_path: &str) -> PathBuf {
        self.root.join(archive_path)
    }

    pub fn write(&self, archive_path: &str, body: &str) -> PathBuf {
        let path = self.path(archive_path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, body).unwrap();
        path
    }

    pub fn index(&self, conn: &Connection, embedder: &dyn EmbeddingProvider) -> IndexReport {
        IndexMaintainer::new(conn, embedder, &self.root, &IndexingConfig::default())
            .index_pending()
            .unwrap()
    }
}

pub const MARKER: &str = echoes::config::DEFAULT_EXCLUSION_MARKER;

/// The shared search corpus. Vocabularies are chosen so the hashing embedder
/// only relates exchanges that share query words.
pub fn search_corpus() -> TestArchive {
    let archive = TestArchive::new();
    archive.write(
        "webapp/ws.jsonl",
        &claude_transcript(
            &[
                (
                    "My WebSocket reconnect loop spins after a backend restart",
                    "Add exponential backoff between reconnect attempts",
                ),
                ("Where does the backoff state live", "Keep it inside the connection struct"),
            ],
            Some("2025-09-10T09:00:00Z"),
        ),
    );
    archive.write(
        "webapp/auth.jsonl",
        &claude_transcript(
            &[
                (
                    "Implement token authentication for the admin API",
                    "Validate signed tokens in middleware",
                ),
                (
                    "Now add proper error handling to the login flow",
                    "Map failures into typed responses",
                ),
            ],
            Some("2025-09-12T09:00:00Z"),
        ),
    );
    archive.write(
        "billing/auth-only.jsonl",
        &pi_transcript(
            &[(
                "Rotate the authentication secrets for billing",
                "Schedule rotation through the vault operator",
            )],
            Some("2025-09-13T09:00:00.000Z"),
        ),
    );
    archive.write(
        "billing/errors-only.jsonl",
        &pi_transcript(
            &[(
                "Improve error handling around invoice batches",
                "Gather partial failures and retry individually",
            )],
            Some("2025-09-14T09:00:00.000Z"),
        ),
    );
    archive.write(
        "ops/deploy-aug.jsonl",
        &claude_transcript(
            &[("Review the deployment pipeline stages", "Split build and release stages")],
            Some("2025-08-15T12:00:00Z"),
        ),
    );
    archive.write(
        "ops/deploy-sep.jsonl",
        &claude_transcript(
            &[("Speed up the deployment pipeline caching", "Cache cargo registry between runs")],
            Some("2025-09-15T10:00:00Z"),
        ),
    );
    archive.write(
        "private/secret.jsonl",
        &claude_transcript(
            &[
                ("Plan the zanzibar surprise party", "Book the venue early"),
                (MARKER, "Understood"),
            ],
            Some("2025-09-16T09:00:00Z"),
        ),
    );
    archive.write(
        "meta/summary.jsonl",
        &claude_transcript(
            &[(
                "Summarize this conversation for the echoes archive: zanzibar recap",
                "Summary written",
            )],
            Some("2025-09-17T09:00:00Z"),
        ),
    );
    let undated = archive.write(
        "notes/undated.jsonl",
        &claude_transcript(&[("Sketch the telescope mount design", "Use an equatorial wedge")], None),
    );
    set_mtime(&undated, day("2025-09-20"));
    archive
}

/// The search corpus, indexed with [`HashingEmbedder`].
pub fn indexed_corpus() -> (TestArchive, Connection) {
    let archive = search_corpus();
    let conn = test_db();
    let report = archive.index(&conn, &HashingEmbedder::new());
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    (archive, conn)
}
