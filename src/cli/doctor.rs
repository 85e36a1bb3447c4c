//! CLI `doctor` command: run database diagnostics and print a health report.

use anyhow::{Context, Result};

use echoes::archive;
use echoes::config::EchoesConfig;
use echoes::db;

/// Run database diagnostics and print a health report.
pub fn doctor(config: &EchoesConfig) -> Result<()> {
    let db_path = config.resolved_db_path();
    let archive_root = config.resolved_archive_root();

    println!("echoes Health Report");
    println!("====================");
    println!();

    match archive::list_archived_files(&archive_root) {
        Ok(files) => println!(
            "Archive:           {} ({} conversations)",
            archive_root.display(),
            files.len()
        ),
        Err(_) => println!(
            "Archive:           not found at {} (run `echoes sync`)",
            archive_root.display()
        ),
    }

    if !db_path.exists() {
        println!("Database:          not found at {}", db_path.display());
        println!("Run `echoes sync --index` to create it.");
        return Ok(());
    }

    let file_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

    let conn = db::open_database(&db_path).context("failed to open database (may be corrupt)")?;
    let report = db::check_database_health(&conn).context("failed to run health check")?;

    println!("Database:          {}", db_path.display());
    println!("File size:         {}", format_bytes(file_size));
    println!("Schema version:    {}", report.schema_version);
    println!("sqlite-vec:        {}", report.sqlite_vec_version);
    println!();
    println!("Embedding model:");
    println!(
        "  Indexed with:    {}",
        report.embedding_model.as_deref().unwrap_or("(not set)")
    );
    println!("  Configured:      {}", config.embedding.model);
    match report.embedding_model.as_deref() {
        Some(stored) if stored != config.embedding.model => {
            println!("  WARNING: model mismatch! Searches fall back to text until `echoes index rebuild`.");
        }
        Some(_) => println!("  Status:          OK (match)"),
        None => {}
    }
    println!();
    println!("Index:");
    println!("  Exchanges:       {}", report.exchange_count);
    println!("  Vectors:         {}", report.vector_count);
    println!("  Indexed files:   {}", report.indexed_files);
    println!("  Excluded files:  {}", report.excluded_files);
    println!("  Failed files:    {}", report.failed_files);
    println!("  Audit log:       {}", report.log_count);
    println!();
    if report.integrity_ok {
        println!("Integrity check:   PASSED");
    } else {
        println!("Integrity check:   FAILED ({})", report.integrity_details);
        println!();
        println!("The archive is the source of truth. To recover:");
        println!("  rm {} && echoes index rebuild", db_path.display());
    }
    if report.exchange_count != report.vector_count || report.failed_files > 0 {
        println!();
        println!("Run `echoes index verify` for details, `echoes index repair` to fix.");
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
