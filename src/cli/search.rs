use anyhow::{Context, Result};
use clap::{Args, ValueEnum};

use echoes::config::EchoesConfig;
use echoes::db;
use echoes::embedding::LazyEmbedder;
use echoes::search::{self, MatchedBy, SearchMode, SearchOptions, SearchQuery, SearchResponse};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ModeArg {
    Vector,
    Text,
    Both,
}

impl From<ModeArg> for SearchMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Vector => SearchMode::Vector,
            ModeArg::Text => SearchMode::Text,
            ModeArg::Both => SearchMode::Both,
        }
    }
}

#[derive(Debug, Args)]
pub struct SearchArgs {
    /// Text to search for
    #[arg(required_unless_present = "concept", conflicts_with = "concept")]
    pub query: Option<String>,

    /// Concept that must appear in the same conversation (repeat 2-5 times)
    #[arg(long, short = 'c')]
    pub concept: Vec<String>,

    #[arg(long, value_enum, default_value_t = ModeArg::Both)]
    pub mode: ModeArg,

    /// Number of results, 1-50
    #[arg(long, short = 'n')]
    pub limit: Option<usize>,

    /// Only conversations on or after this day (YYYY-MM-DD)
    #[arg(long)]
    pub after: Option<String>,

    /// Only conversations before this day (YYYY-MM-DD)
    #[arg(long)]
    pub before: Option<String>,

    #[arg(long)]
    pub json: bool,
}

/// Run a search from the terminal.
pub async fn search(config: &EchoesConfig, args: SearchArgs) -> Result<()> {
    let query = match args.query {
        Some(text) => SearchQuery::Single(text),
        None => SearchQuery::Multi(args.concept),
    };
    let options = SearchOptions {
        mode: args.mode.into(),
        limit: args.limit,
        after: args.after,
        before: args.before,
    };

    let config = config.clone();
    let response = tokio::task::spawn_blocking(move || -> Result<SearchResponse> {
        let conn = db::open_database(config.resolved_db_path())?;
        let embedder = LazyEmbedder::from_config(&config.embedding);
        Ok(search::search(
            &conn,
            &*embedder,
            &query,
            &options,
            &config.retrieval,
        )?)
    })
    .await
    .context("search task failed")??;

    if args.json {
        return super::print_json(&response);
    }

    for warning in &response.warnings {
        eprintln!("warning: {warning}");
    }
    if response.results.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    println!(
        "Showing {} of {} match(es)\n",
        response.results.len(),
        response.total_matched
    );
    for (i, result) in response.results.iter().enumerate() {
        println!(
            "  {}. {} · {} (score: {:.3}, {})",
            i + 1,
            if result.project.is_empty() { "-" } else { result.project.as_str() },
            result.timestamp,
            result.score,
            matched_label(result.matched_by),
        );
        println!(
            "     {}:{}-{}",
            result.archive_path, result.line_start, result.line_end
        );
        if let Some(concepts) = &result.concepts {
            for c in concepts {
                println!(
                    "     - {} at lines {}-{} ({:.3})",
                    c.concept, c.line_start, c.line_end, c.score
                );
            }
        }
        println!("     {}", result.snippet);
        println!();
    }

    Ok(())
}

fn matched_label(matched_by: MatchedBy) -> &'static str {
    match matched_by {
        MatchedBy::Vector => "vector",
        MatchedBy::Text => "text",
        MatchedBy::Both => "vector+text",
    }
}
