//! CLI `index` command: keep the search index consistent with the archive.

use anyhow::{Context, Result};
use clap::ValueEnum;

use echoes::config::EchoesConfig;
use echoes::db;
use echoes::embedding::LazyEmbedder;
use echoes::index::{
    self, IndexMaintainer, IndexReport, MaintenanceMode, MaintenanceReport, VerifyReport,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum IndexAction {
    /// Index every archived file that is new, changed, or failed last time
    Cleanup,
    /// Report inconsistencies without changing anything
    Verify,
    /// Remove orphans and re-index whatever verify flags
    Repair,
    /// Drop the whole index and rebuild it from the archive
    Rebuild,
}

impl From<IndexAction> for MaintenanceMode {
    fn from(action: IndexAction) -> Self {
        match action {
            IndexAction::Cleanup => MaintenanceMode::Cleanup,
            IndexAction::Verify => MaintenanceMode::Verify,
            IndexAction::Repair => MaintenanceMode::Repair,
            IndexAction::Rebuild => MaintenanceMode::Rebuild,
        }
    }
}

/// Run one maintenance mode on the blocking pool.
pub async fn run(config: &EchoesConfig, mode: MaintenanceMode) -> Result<MaintenanceReport> {
    let config = config.clone();
    tokio::task::spawn_blocking(move || -> Result<_> {
        let conn = db::open_database(config.resolved_db_path())?;
        let embedder = LazyEmbedder::from_config(&config.embedding);
        let maintainer = IndexMaintainer::new(
            &conn,
            &*embedder,
            config.resolved_archive_root(),
            &config.indexing,
        );
        Ok(index::run_maintenance(mode, &maintainer)?)
    })
    .await
    .context("index task failed")?
}

/// Run one maintenance mode and print its report.
pub async fn index(config: &EchoesConfig, mode: MaintenanceMode, json: bool) -> Result<()> {
    let report = run(config, mode).await?;
    if json {
        return super::print_json(&report);
    }
    print_report(&report);
    Ok(())
}

pub fn print_report(report: &MaintenanceReport) {
    if let Some(verify) = &report.verify {
        print_verify(verify);
    }
    if report.orphans_removed > 0 {
        println!("Removed {} orphaned entr(ies).", report.orphans_removed);
    }
    if let Some(index) = &report.index {
        print_index(index);
    }
}

fn print_verify(report: &VerifyReport) {
    if report.is_clean() {
        println!("Index is consistent with the archive.");
        return;
    }
    let sections = [
        ("Entries for missing files", &report.orphaned_entries),
        ("State for missing files", &report.orphaned_states),
        ("Never indexed", &report.unindexed_files),
        ("Changed since indexed", &report.stale_files),
        ("Missing vectors", &report.missing_vectors),
    ];
    for (title, paths) in sections {
        if paths.is_empty() {
            continue;
        }
        println!("{title} ({}):", paths.len());
        for path in paths {
            println!("  {path}");
        }
    }
}

fn print_index(report: &IndexReport) {
    println!(
        "Indexed {} file(s) ({} exchanges), excluded {}, unchanged {}, busy {}.",
        report.files_indexed,
        report.exchanges_indexed,
        report.files_excluded,
        report.files_unchanged,
        report.files_busy,
    );
    if report.entries_removed > 0 {
        println!("Replaced or removed {} stale entries.", report.entries_removed);
    }
    for issue in &report.errors {
        println!("  ! {}: {}", issue.archive_path, issue.message);
    }
}
