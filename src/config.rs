use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::archive::SourceProvider;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct EchoesConfig {
    pub logging: LoggingConfig,
    pub archive: ArchiveConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub indexing: IndexingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ArchiveConfig {
    pub root: String,
    pub sources: Vec<SourceConfig>,
    /// A `.partial` copy older than this is considered abandoned.
    pub stale_partial_secs: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SourceConfig {
    pub provider: SourceProvider,
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub cache_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_limit: usize,
    /// Candidates fetched from each structure before filtering and merging.
    pub candidate_pool: usize,
    /// Per-concept pool for multi-concept searches.
    pub concept_pool: usize,
    /// Cosine similarity floor for vector candidates.
    pub min_similarity: f64,
    pub snippet_chars: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IndexingConfig {
    pub claim_ttl_secs: u64,
    pub batch_size: usize,
    pub exclusion_marker: String,
    pub summary_markers: Vec<String>,
}

/// Literal sentinel that keeps a conversation out of the index.
pub const DEFAULT_EXCLUSION_MARKER: &str = "<ECHOES-ARCHIVE>DO NOT INDEX THIS CHAT</ECHOES-ARCHIVE>";

/// Opening line of the prompt used when this tool asks a model to summarize
/// an archived conversation.
pub const DEFAULT_SUMMARY_MARKER: &str = "Summarize this conversation for the echoes archive";

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        let root = default_echoes_dir()
            .join("archive")
            .to_string_lossy()
            .into_owned();
        Self {
            root,
            sources: vec![
                SourceConfig {
                    provider: SourceProvider::Claude,
                    path: "~/.claude/projects".into(),
                },
                SourceConfig {
                    provider: SourceProvider::Pi,
                    path: "~/.pi/agent/sessions".into(),
                },
            ],
            stale_partial_secs: 600,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_echoes_dir()
            .join("index.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let cache_dir = default_echoes_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            provider: "local".into(),
            model: "all-MiniLM-L6-v2".into(),
            cache_dir,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            candidate_pool: 100,
            concept_pool: 50,
            min_similarity: 0.25,
            snippet_chars: 200,
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            claim_ttl_secs: 600,
            batch_size: 32,
            exclusion_marker: DEFAULT_EXCLUSION_MARKER.into(),
            summary_markers: vec![DEFAULT_SUMMARY_MARKER.into()],
        }
    }
}

/// Returns `~/.echoes/`
pub fn default_echoes_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".echoes")
}

/// Returns the default config file path: `~/.echoes/config.toml`
pub fn default_config_path() -> PathBuf {
    default_echoes_dir().join("config.toml")
}

impl EchoesConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            EchoesConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (ECHOES_DB, ECHOES_ARCHIVE_DIR, ECHOES_LOG_LEVEL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("ECHOES_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("ECHOES_ARCHIVE_DIR") {
            self.archive.root = val;
        }
        if let Ok(val) = std::env::var("ECHOES_LOG_LEVEL") {
            self.logging.log_level = val;
        }
    }

    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }

    pub fn resolved_archive_root(&self) -> PathBuf {
        expand_tilde(&self.archive.root)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
