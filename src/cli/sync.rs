//! CLI `sync` command: copy new and changed transcripts into the archive.

use anyhow::{Context, Result};
use serde::Serialize;

use echoes::archive::{self, SyncEngine, SyncReport};
use echoes::config::EchoesConfig;
use echoes::index::{MaintenanceMode, MaintenanceReport};

/// Everything one `sync` invocation did, printed as a single JSON document.
#[derive(Debug, Serialize)]
struct SyncRun {
    sync: SyncReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    index: Option<MaintenanceReport>,
}

pub async fn sync(config: &EchoesConfig, then_index: bool, json: bool) -> Result<()> {
    let engine = SyncEngine::from_config(config);
    let report = archive::spawn_sync(engine)
        .await
        .context("sync task failed")?;

    let index = if then_index {
        Some(super::maintenance::run(config, MaintenanceMode::Cleanup).await?)
    } else {
        None
    };

    if json {
        return super::print_json(&SyncRun {
            sync: report,
            index,
        });
    }

    println!(
        "Synced {} file(s), {} already current, {} in progress elsewhere.",
        report.files_copied, report.files_skipped, report.files_in_progress
    );
    for issue in &report.errors {
        println!("  ! {}: {}", issue.path.display(), issue.message);
    }
    if let Some(index) = &index {
        super::maintenance::print_report(index);
    }
    Ok(())
}
