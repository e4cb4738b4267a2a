//! Computes which repository paths are excluded from collection.
//!
//! Rules come from the root `.gitignore` plus a fixed list of folders and
//! files that are never sent to the model. An excluded directory is not
//! descended into, unless a negation rule (`!pattern`) could re-include
//! something beneath it; then its children inherit the exclusion one by one.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use ignore::Match;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use tracing::debug;
use walkdir::WalkDir;

use crate::errors::PipelineError;

pub const IGNORE_FILE: &str = ".gitignore";

const ALWAYS_IGNORED_FOLDERS: &[&str] = &[".git", "node_modules"];
const ALWAYS_IGNORED_FILES: &[&str] = &["LICENSE", "package-lock.json", "pnpm-lock.yaml", "yarn.lock"];

/// Repository-relative, `/`-separated paths excluded from a collection pass.
/// A directory entry stands for everything beneath it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExcludedPathSet {
    paths: BTreeSet<String>,
}

impl ExcludedPathSet {
    pub fn contains(&self, relative_path: &str) -> bool {
        self.paths.contains(relative_path)
    }

    pub fn insert(&mut self, relative_path: impl Into<String>) {
        self.paths.insert(relative_path.into());
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Parsed ignore-file rules for one repository root.
pub struct IgnoreRules {
    matcher: Gitignore,
    negations: Vec<Vec<glob::Pattern>>,
}

impl IgnoreRules {
    /// Load `.gitignore` from `root`. A missing ignore-file is a configuration
    /// error, not an empty rule set.
    pub fn load(root: &Path) -> Result<Self, PipelineError> {
        let ignore_path = root.join(IGNORE_FILE);
        let content = std::fs::read_to_string(&ignore_path).map_err(|e| {
            PipelineError::Config(format!(
                "No {} found at {}: {}",
                IGNORE_FILE,
                ignore_path.display(),
                e
            ))
        })?;
        Self::parse(root, &content)
    }

    pub fn parse(root: &Path, content: &str) -> Result<Self, PipelineError> {
        let mut builder = GitignoreBuilder::new(root);
        let mut negations = Vec::new();
        for line in content.lines() {
            builder
                .add_line(Some(root.join(IGNORE_FILE)), line)
                .map_err(|e| PipelineError::Config(format!("Invalid ignore rule '{}': {}", line, e)))?;
            if let Some(pattern) = line.trim().strip_prefix('!') {
                negations.push(negation_segments(pattern));
            }
        }
        let matcher = builder
            .build()
            .map_err(|e| PipelineError::Config(format!("Failed to build ignore matcher: {}", e)))?;
        Ok(Self { matcher, negations })
    }

    fn matched(&self, path: &Path, is_dir: bool) -> Match<()> {
        match self.matcher.matched(path, is_dir) {
            Match::Ignore(_) => Match::Ignore(()),
            Match::Whitelist(_) => Match::Whitelist(()),
            Match::None => Match::None,
        }
    }

    /// Whether some negation rule could match a path below `dir`.
    fn may_reinclude_under(&self, dir: &str) -> bool {
        let dir_segments: Vec<&str> = dir.split('/').collect();
        self.negations.iter().any(|segments| {
            if segments.len() == 1 {
                // Slash-free patterns match at any depth.
                return true;
            }
            for (i, pattern) in segments.iter().enumerate() {
                if pattern.as_str() == "**" {
                    return true;
                }
                match dir_segments.get(i) {
                    Some(segment) if pattern.matches(segment) => continue,
                    Some(_) => return false,
                    None => return true,
                }
            }
            false
        })
    }
}

fn negation_segments(pattern: &str) -> Vec<glob::Pattern> {
    pattern
        .trim()
        .trim_start_matches('/')
        .trim_end_matches('/')
        .split('/')
        .filter_map(|segment| {
            glob::Pattern::new(segment)
                .or_else(|_| glob::Pattern::new(&glob::Pattern::escape(segment)))
                .ok()
        })
        .collect()
}

fn is_always_ignored(name: &str, is_dir: bool) -> bool {
    if is_dir {
        ALWAYS_IGNORED_FOLDERS.contains(&name)
    } else {
        ALWAYS_IGNORED_FILES.contains(&name)
    }
}

/// Convert `path` under `root` to a `/`-separated relative path.
pub fn relative_posix(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Walk `root` top-down and compute the excluded path set.
pub fn compute_excluded_paths(root: &Path) -> Result<ExcludedPathSet, PipelineError> {
    let rules = IgnoreRules::load(root)?;
    compute_with_rules(root, &rules)
}

pub fn compute_with_rules(root: &Path, rules: &IgnoreRules) -> Result<ExcludedPathSet, PipelineError> {
    let mut excluded = ExcludedPathSet::default();
    // Excluded directories that are still descended because a negation may apply inside.
    let mut shadowed: HashSet<PathBuf> = HashSet::new();

    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            let is_dir = entry.file_type().is_dir();
            let name = entry.file_name().to_string_lossy();
            let relative = relative_posix(root, entry.path());
            let inherited = entry
                .path()
                .parent()
                .is_some_and(|parent| shadowed.contains(parent));

            let always = is_always_ignored(&name, is_dir);
            let ignored = always
                || match rules.matched(entry.path(), is_dir) {
                    Match::Ignore(()) => true,
                    Match::Whitelist(()) => false,
                    Match::None => inherited,
                };

            if !ignored {
                return true;
            }
            if is_dir && !always && rules.may_reinclude_under(&relative) {
                shadowed.insert(entry.path().to_path_buf());
                return true;
            }
            excluded.insert(relative);
            false
        });

    for entry in walker {
        entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
            let io_err = e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("filesystem loop detected"));
            PipelineError::file(path, io_err)
        })?;
    }

    debug!(root = %root.display(), excluded = excluded.len(), "Computed excluded paths");
    Ok(excluded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_missing_ignore_file_is_config_error() {
        let dir = tempdir().unwrap();
        let err = compute_excluded_paths(dir.path()).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
        assert!(err.to_string().contains(".gitignore"));
    }

    #[test]
    fn test_empty_rules_exclude_nothing() {
        let dir = tempdir().unwrap();
        write(dir.path(), ".gitignore", "");
        write(dir.path(), "src/index.ts", "x");

        let excluded = compute_excluded_paths(dir.path()).unwrap();
        assert!(excluded.is_empty());
        assert_eq!(excluded.len(), 0);
    }

    #[test]
    fn test_ignored_directory_short_circuits() {
        let dir = tempdir().unwrap();
        write(dir.path(), ".gitignore", "dist/\n");
        write(dir.path(), "dist/bundle.js", "x");
        write(dir.path(), "dist/nested/chunk.js", "x");
        write(dir.path(), "src/index.ts", "x");

        let excluded = compute_excluded_paths(dir.path()).unwrap();
        assert!(excluded.contains("dist"));
        assert!(!excluded.contains("dist/bundle.js"));
        assert!(!excluded.contains("dist/nested/chunk.js"));
        assert!(!excluded.contains("src/index.ts"));
    }

    #[test]
    fn test_always_ignored_entries() {
        let dir = tempdir().unwrap();
        write(dir.path(), ".gitignore", "");
        write(dir.path(), "node_modules/react/index.js", "x");
        write(dir.path(), "packages/web/node_modules/a.js", "x");
        write(dir.path(), "pnpm-lock.yaml", "x");
        write(dir.path(), "LICENSE", "x");
        fs::create_dir_all(dir.path().join(".git")).unwrap();

        let excluded = compute_excluded_paths(dir.path()).unwrap();
        assert!(excluded.contains(".git"));
        assert!(excluded.contains("node_modules"));
        assert!(excluded.contains("packages/web/node_modules"));
        assert!(excluded.contains("pnpm-lock.yaml"));
        assert!(excluded.contains("LICENSE"));
        assert!(!excluded.contains(".gitignore"));
    }

    #[test]
    fn test_negation_reincludes_file_under_ignored_directory() {
        let dir = tempdir().unwrap();
        write(dir.path(), ".gitignore", "build/\n!build/keep.txt\n");
        write(dir.path(), "build/keep.txt", "keep");
        write(dir.path(), "build/out.bin", "x");
        write(dir.path(), "build/sub/deep.txt", "x");

        let excluded = compute_excluded_paths(dir.path()).unwrap();
        assert!(!excluded.contains("build"));
        assert!(!excluded.contains("build/keep.txt"));
        assert!(excluded.contains("build/out.bin"));
        assert!(excluded.contains("build/sub"));
    }

    #[test]
    fn test_later_rules_override_earlier() {
        let dir = tempdir().unwrap();
        write(dir.path(), ".gitignore", "*.log\n!important.log\n");
        write(dir.path(), "debug.log", "x");
        write(dir.path(), "important.log", "x");

        let excluded = compute_excluded_paths(dir.path()).unwrap();
        assert!(excluded.contains("debug.log"));
        assert!(!excluded.contains("important.log"));
    }

    #[test]
    fn test_may_reinclude_under_matches_by_segment() {
        let dir = tempdir().unwrap();
        let rules = IgnoreRules::parse(dir.path(), "out/\n!out/*/keep.md\n").unwrap();
        assert!(rules.may_reinclude_under("out"));
        assert!(rules.may_reinclude_under("out/docs"));
        assert!(!rules.may_reinclude_under("target"));
    }

    #[test]
    fn test_relative_posix_uses_forward_slashes() {
        let root = Path::new("/repo");
        let path = root.join("src").join("app").join("main.ts");
        assert_eq!(relative_posix(root, &path), "src/app/main.ts");
    }
}
