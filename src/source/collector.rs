use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tiktoken_rs::CoreBPE;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::filter::{ExcludedPathSet, relative_posix};
use crate::errors::PipelineError;
use crate::models::SourceFile;

/// Default number of files read concurrently.
pub const FILE_PROCESSING_CONCURRENCY: usize = 12;

/// Measures file content in model tokens.
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// Token counter backed by the `o200k_base` encoding used by the gpt-4o family.
pub struct BpeTokenCounter {
    bpe: CoreBPE,
}

impl BpeTokenCounter {
    pub fn new() -> Result<Self, PipelineError> {
        let bpe = tiktoken_rs::o200k_base()
            .map_err(|e| PipelineError::Config(format!("Failed to load tokenizer: {}", e)))?;
        Ok(Self { bpe })
    }
}

impl TokenCounter for BpeTokenCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

/// Walks a repository and reports every file not covered by an excluded path.
pub struct FileCollector {
    counter: Arc<dyn TokenCounter>,
    concurrency: usize,
}

impl FileCollector {
    pub fn new(counter: Arc<dyn TokenCounter>, concurrency: usize) -> Self {
        Self {
            counter,
            concurrency: concurrency.max(1),
        }
    }

    /// List eligible files under `root`. A file whose tokens cannot be counted
    /// is still listed, with `token_count: None`.
    pub async fn collect(
        &self,
        root: &Path,
        excluded: &ExcludedPathSet,
    ) -> Result<Vec<SourceFile>, PipelineError> {
        let candidates = {
            let root = root.to_path_buf();
            let excluded = excluded.clone();
            tokio::task::spawn_blocking(move || list_candidates(&root, &excluded)).await??
        };
        debug!(root = %root.display(), files = candidates.len(), "Counting tokens");

        let files = stream::iter(candidates)
            .map(|(path, relative_path)| {
                let counter = Arc::clone(&self.counter);
                async move {
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    let token_count = count_tokens(counter, &path).await;
                    if token_count.is_none() {
                        warn!(path = %relative_path, "Skipping token computation");
                    }
                    SourceFile {
                        name,
                        relative_path,
                        token_count,
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        Ok(files)
    }
}

fn list_candidates(
    root: &Path,
    excluded: &ExcludedPathSet,
) -> Result<Vec<(PathBuf, String)>, PipelineError> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| !excluded.contains(&relative_posix(root, entry.path())));

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
            let io_err = e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("filesystem loop detected"));
            PipelineError::file(path, io_err)
        })?;
        if entry.file_type().is_file() {
            let relative = relative_posix(root, entry.path());
            files.push((entry.into_path(), relative));
        }
    }
    Ok(files)
}

async fn count_tokens(counter: Arc<dyn TokenCounter>, path: &Path) -> Option<usize> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Failed to read file for token count");
            return None;
        }
    };
    tokio::task::spawn_blocking(move || counter.count(&content))
        .await
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::filter::compute_excluded_paths;
    use std::fs;
    use tempfile::tempdir;

    struct CharCounter;

    impl TokenCounter for CharCounter {
        fn count(&self, text: &str) -> usize {
            text.chars().count()
        }
    }

    fn collector() -> FileCollector {
        FileCollector::new(Arc::new(CharCounter), 4)
    }

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn sorted_paths(files: &[SourceFile]) -> Vec<String> {
        let mut paths: Vec<String> = files.iter().map(|f| f.relative_path.clone()).collect();
        paths.sort();
        paths
    }

    #[tokio::test]
    async fn test_collect_skips_excluded_paths() {
        let dir = tempdir().unwrap();
        write(dir.path(), ".gitignore", b"dist/\n*.log\n");
        write(dir.path(), "src/index.ts", b"export {}");
        write(dir.path(), "src/util/math.ts", b"export const x = 1;");
        write(dir.path(), "dist/index.js", b"compiled");
        write(dir.path(), "debug.log", b"noise");
        write(dir.path(), "node_modules/lib/index.js", b"dep");

        let excluded = compute_excluded_paths(dir.path()).unwrap();
        let files = collector().collect(dir.path(), &excluded).await.unwrap();

        assert_eq!(
            sorted_paths(&files),
            vec![".gitignore", "src/index.ts", "src/util/math.ts"]
        );
        let math = files
            .iter()
            .find(|f| f.relative_path == "src/util/math.ts")
            .unwrap();
        assert_eq!(math.name, "math.ts");
        assert_eq!(math.token_count, Some(19));
    }

    #[tokio::test]
    async fn test_unreadable_token_count_is_null_not_fatal() {
        let dir = tempdir().unwrap();
        write(dir.path(), ".gitignore", b"");
        write(dir.path(), "logo.bin", &[0xff, 0xfe, 0x00, 0x81]);
        write(dir.path(), "main.ts", b"ok");

        let excluded = compute_excluded_paths(dir.path()).unwrap();
        let files = collector().collect(dir.path(), &excluded).await.unwrap();

        let binary = files.iter().find(|f| f.name == "logo.bin").unwrap();
        assert_eq!(binary.token_count, None);
        let main = files.iter().find(|f| f.name == "main.ts").unwrap();
        assert_eq!(main.token_count, Some(2));
    }

    #[tokio::test]
    async fn test_negated_file_is_collected() {
        let dir = tempdir().unwrap();
        write(dir.path(), ".gitignore", b"build/\n!build/keep.txt\n");
        write(dir.path(), "build/keep.txt", b"keep");
        write(dir.path(), "build/out.js", b"drop");
        write(dir.path(), "build/nested/more.js", b"drop");

        let excluded = compute_excluded_paths(dir.path()).unwrap();
        let files = collector().collect(dir.path(), &excluded).await.unwrap();

        assert_eq!(sorted_paths(&files), vec![".gitignore", "build/keep.txt"]);
    }

    #[test]
    fn test_bpe_counter_counts_tokens() {
        let counter = BpeTokenCounter::new().unwrap();
        assert_eq!(counter.count(""), 0);
        assert!(counter.count("fn main() { println!(\"hello\"); }") > 0);
    }
}
