//! Read-only repository views and revert: `promptsmith files|commits|revert`.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;

use promptsmith::config::Settings;
use promptsmith::source::{BpeTokenCounter, FileCollector, source_files};
use promptsmith::tracker::GitTracker;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}

pub async fn cmd_files(settings: &Settings, root: &Path) -> Result<()> {
    let collector = FileCollector::new(
        Arc::new(BpeTokenCounter::new()?),
        settings.pipeline.read_concurrency,
    );
    let mut files = source_files(&collector, root).await?;
    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    print_json(&files)
}

pub async fn cmd_commits(settings: &Settings, root: &Path, count: Option<usize>) -> Result<()> {
    let count = count.unwrap_or(settings.pipeline.recent_commits);
    let root = root.to_path_buf();
    let commits =
        tokio::task::spawn_blocking(move || GitTracker::open(&root)?.recent_commits(count)).await??;
    print_json(&commits)
}

pub async fn cmd_revert(root: &Path) -> Result<()> {
    let root = root.to_path_buf();
    let record = tokio::task::spawn_blocking(move || GitTracker::open(&root)?.revert_last()).await??;
    print_json(&record)
}
