//! Searchable archive of past AI-assistant conversations.
//!
//! echoes copies conversation transcripts from assistant tools into a local
//! archive, indexes each user/assistant exchange in SQLite, and answers
//! searches over them:
//!
//! | Stage | What happens |
//! |-------|--------------|
//! | **Sync** | New or grown transcripts are copied atomically into the archive |
//! | **Index** | Exchanges are parsed, filtered for opt-out markers, embedded, stored |
//! | **Search** | Vector, full-text, or hybrid ranking; multi-concept AND queries |
//! | **Read** | Any archived conversation, or a line range of it, as markdown |
//!
//! # Architecture
//!
//! - **Storage**: SQLite with an FTS5 trigram index for substring search and
//!   [sqlite-vec](https://github.com/asg017/sqlite-vec) for vector search
//! - **Embeddings**: Local ONNX Runtime with all-MiniLM-L6-v2 (384 dimensions),
//!   loaded lazily on first use
//! - **Search**: Normalized-sum merge; an exchange both structures agree on
//!   always outranks one found by a single structure
//!
//! # Modules
//!
//! - [`archive`]: Source discovery and incremental, atomic archive sync
//! - [`config`]: Configuration loading from TOML files and environment variables
//! - [`db`]: SQLite database initialization, schema, migrations, and health checks
//! - [`embedding`]: Text-to-vector embedding pipeline via ONNX Runtime
//! - [`error`]: Error taxonomy shared by every boundary operation
//! - [`index`]: Per-file claimed indexing and bulk maintenance
//! - [`reader`]: Markdown rendering of archived conversations
//! - [`search`]: Single- and multi-concept search with date filters
//! - [`transcript`]: Transcript parsing and exclusion detection

pub mod archive;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod index;
pub mod reader;
pub mod search;
pub mod transcript;
