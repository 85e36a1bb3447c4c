use anyhow::{Context, Result};

use echoes::config::EchoesConfig;
use echoes::reader;

/// Print an archived conversation, or part of it, as markdown.
pub async fn read(
    config: &EchoesConfig,
    path: String,
    start: Option<usize>,
    end: Option<usize>,
    json: bool,
) -> Result<()> {
    let root = config.resolved_archive_root();
    let page = tokio::task::spawn_blocking(move || reader::read_conversation(&root, &path, start, end))
        .await
        .context("read task failed")??;

    if json {
        return super::print_json(&page);
    }
    println!("{}", page.markdown);
    Ok(())
}
