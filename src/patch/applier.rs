use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::codec::normalize_relative;
use crate::errors::PipelineError;
use crate::models::FileOperation;

/// Resolve `relative_path` under `root`, rejecting anything that would land
/// outside it.
pub fn resolve_within(root: &Path, relative_path: &str) -> Result<PathBuf, PipelineError> {
    let normalized = normalize_relative(relative_path)?;
    Ok(root.join(normalized))
}

/// Apply `operations` to the tree at `root`, strictly in order.
///
/// Deleting a path that does not exist is not an error. Any other failure
/// stops immediately; operations applied before it are not rolled back.
pub async fn apply(root: &Path, operations: &[FileOperation]) -> Result<(), PipelineError> {
    info!(
        root = %root.display(),
        operations = operations.len(),
        "Applying changes"
    );

    // Reject the whole batch before touching disk if any path escapes.
    let targets = operations
        .iter()
        .map(|op| resolve_within(root, &op.relative_path))
        .collect::<Result<Vec<_>, _>>()?;

    for (index, (operation, full_path)) in operations.iter().zip(targets).enumerate() {
        debug!(
            "Processing file ({}/{}): {}",
            index + 1,
            operations.len(),
            operation.relative_path
        );

        match operation.content.as_deref() {
            Some(content) if !content.trim().is_empty() => write_file(&full_path, content).await?,
            _ => delete_file(&full_path).await?,
        }
    }
    Ok(())
}

async fn write_file(full_path: &Path, content: &str) -> Result<(), PipelineError> {
    if let Some(parent) = full_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| PipelineError::file(parent, e))?;
    }
    tokio::fs::write(full_path, content)
        .await
        .map_err(|e| PipelineError::file(full_path, e))?;
    info!(path = %full_path.display(), "Updated file");
    Ok(())
}

async fn delete_file(full_path: &Path) -> Result<(), PipelineError> {
    match tokio::fs::remove_file(full_path).await {
        Ok(()) => {
            info!(path = %full_path.display(), "Deleted file");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(path = %full_path.display(), "File not found, skipping deletion");
            Ok(())
        }
        Err(e) => Err(PipelineError::file(full_path, e)),
    }
}
