//! Source tree discovery: ignore rules and file listing.

pub mod collector;
pub mod filter;

use std::path::Path;

pub use collector::{BpeTokenCounter, FILE_PROCESSING_CONCURRENCY, FileCollector, TokenCounter};
pub use filter::{ExcludedPathSet, IGNORE_FILE, compute_excluded_paths, relative_posix};

use crate::errors::PipelineError;
use crate::models::SourceFile;

/// Compute the excluded set for `root` and list every remaining file.
/// Nothing is cached between calls.
pub async fn source_files(
    collector: &FileCollector,
    root: &Path,
) -> Result<Vec<SourceFile>, PipelineError> {
    let excluded = {
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || compute_excluded_paths(&root)).await??
    };
    collector.collect(root, &excluded).await
}
