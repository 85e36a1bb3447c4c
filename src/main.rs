mod cli;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use echoes::config::EchoesConfig;
use echoes::error::ArchiveError;

#[derive(Parser)]
#[command(name = "echoes", version, about = "Searchable archive of past AI assistant conversations")]
struct Cli {
    /// Config file (default: ~/.echoes/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Copy new and changed transcripts into the archive
    Sync {
        /// Index the archive afterwards
        #[arg(long)]
        index: bool,
        #[arg(long)]
        json: bool,
    },
    /// Keep the search index consistent with the archive
    Index {
        #[arg(value_enum, default_value = "cleanup")]
        action: cli::maintenance::IndexAction,
        #[arg(long)]
        json: bool,
    },
    /// Search archived conversations
    Search(cli::search::SearchArgs),
    /// Print an archived conversation as markdown
    Read {
        /// Archive-relative path, as shown in search results
        path: String,
        /// First raw line to include (1-indexed)
        #[arg(long)]
        start: Option<usize>,
        /// Last raw line to include
        #[arg(long)]
        end: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Run database diagnostics and print a health report
    Doctor,
    /// Manage the embedding model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download the embedding model to ~/.echoes/models/
    Download,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let user_error = e
                .downcast_ref::<ArchiveError>()
                .is_some_and(ArchiveError::is_user_error);
            eprintln!("error: {e:#}");
            if user_error {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => EchoesConfig::load_from(path)?,
        None => EchoesConfig::load()?,
    };

    // Log to stderr so stdout stays clean for --json output.
    let filter = EnvFilter::try_new(&config.logging.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Sync { index, json } => cli::sync::sync(&config, index, json).await?,
        Command::Index { action, json } => {
            cli::maintenance::index(&config, action.into(), json).await?
        }
        Command::Search(args) => cli::search::search(&config, args).await?,
        Command::Read {
            path,
            start,
            end,
            json,
        } => cli::read::read(&config, path, start, end, json).await?,
        Command::Doctor => cli::doctor::doctor(&config)?,
        Command::Model { action } => match action {
            ModelAction::Download => cli::model_download(&config.embedding).await?,
        },
    }

    Ok(())
}
