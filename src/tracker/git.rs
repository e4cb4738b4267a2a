use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use git2::{Commit, DiffFormat, IndexAddOption, Repository, ResetType, Signature, Sort};
use tracing::{debug, info};

use crate::errors::PipelineError;
use crate::models::CommitRecord;

/// Checkpoint commits for one repository.
pub struct GitTracker {
    repo: Repository,
    root: PathBuf,
}

impl GitTracker {
    pub fn open(root: &Path) -> Result<Self, PipelineError> {
        let repo = Repository::open(root).map_err(|e| PipelineError::git(root, e))?;
        Ok(Self {
            repo,
            root: root.to_path_buf(),
        })
    }

    fn err(&self, e: impl std::fmt::Display) -> PipelineError {
        PipelineError::git(&self.root, e)
    }

    /// Stage every change in the working tree (including deletions) and commit
    /// it with `message`. An unchanged tree is an error.
    pub fn commit(&self, message: &str) -> Result<CommitRecord, PipelineError> {
        let mut index = self.repo.index().map_err(|e| self.err(e))?;
        index
            .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
            .map_err(|e| self.err(e))?;
        index
            .update_all(["*"].iter(), None)
            .map_err(|e| self.err(e))?;
        index.write().map_err(|e| self.err(e))?;

        let tree_id = index.write_tree().map_err(|e| self.err(e))?;
        let parent = self.get_head_commit();
        let unchanged = match &parent {
            Some(parent) => parent.tree_id() == tree_id,
            None => index.is_empty(),
        };
        if unchanged {
            return Err(self.err("nothing to commit, working tree clean"));
        }

        let tree = self.repo.find_tree(tree_id).map_err(|e| self.err(e))?;
        let sig = self.signature()?;
        let parents: Vec<&Commit<'_>> = parent.iter().collect();
        let commit_id = self
            .repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .map_err(|e| self.err(e))?;

        let commit = self.repo.find_commit(commit_id).map_err(|e| self.err(e))?;
        let record = self.record_for(&commit)?;
        debug!(hash = %record.hash, commit_message = message, "Commit created");
        Ok(record)
    }

    /// Up to `count` most recent commits reachable from HEAD, newest first.
    pub fn recent_commits(&self, count: usize) -> Result<Vec<CommitRecord>, PipelineError> {
        if self.get_head_commit().is_none() {
            return Ok(Vec::new());
        }
        let mut walk = self.repo.revwalk().map_err(|e| self.err(e))?;
        walk.set_sorting(Sort::TOPOLOGICAL).map_err(|e| self.err(e))?;
        walk.push_head().map_err(|e| self.err(e))?;

        walk.take(count)
            .map(|oid| {
                let oid = oid.map_err(|e| self.err(e))?;
                let commit = self.repo.find_commit(oid).map_err(|e| self.err(e))?;
                self.record_for(&commit)
            })
            .collect()
    }

    /// Move the branch back to HEAD's parent, discarding HEAD's changes from
    /// the working tree. Returns the record of the commit that was undone.
    pub fn revert_last(&self) -> Result<CommitRecord, PipelineError> {
        let head = self
            .get_head_commit()
            .ok_or_else(|| self.err("no commit to revert"))?;
        let parent = head
            .parent(0)
            .map_err(|_| self.err("cannot revert the initial commit"))?;
        let record = self.record_for(&head)?;

        self.repo
            .reset(parent.as_object(), ResetType::Hard, None)
            .map_err(|e| self.err(e))?;
        info!(hash = %record.hash, root = %self.root.display(), "Reverted most recent commit");
        Ok(record)
    }

    /// Get current HEAD SHA (returns None for unborn branches)
    pub fn head_sha(&self) -> Option<String> {
        self.get_head_commit().map(|c| c.id().to_string())
    }

    /// Get the HEAD commit if it exists (returns None for unborn branches)
    fn get_head_commit(&self) -> Option<Commit<'_>> {
        self.repo
            .head()
            .ok()
            .and_then(|head| head.peel_to_commit().ok())
    }

    fn signature(&self) -> Result<Signature<'static>, PipelineError> {
        match self.repo.signature() {
            Ok(sig) => Ok(sig.to_owned()),
            Err(_) => Signature::now("promptsmith", "promptsmith@localhost").map_err(|e| self.err(e)),
        }
    }

    fn record_for(&self, commit: &Commit<'_>) -> Result<CommitRecord, PipelineError> {
        let timestamp = DateTime::<Utc>::from_timestamp(commit.author().when().seconds(), 0).unwrap_or_default();
        Ok(CommitRecord {
            hash: commit.id().to_string(),
            message: commit.message().unwrap_or_default().trim().to_string(),
            diff: self.commit_diff(commit)?,
            timestamp,
        })
    }

    /// Unified diff of `commit` against its first parent (or the empty tree).
    fn commit_diff(&self, commit: &Commit<'_>) -> Result<String, PipelineError> {
        let tree = commit.tree().map_err(|e| self.err(e))?;
        let parent_tree = match commit.parent(0) {
            Ok(parent) => Some(parent.tree().map_err(|e| self.err(e))?),
            Err(_) => None,
        };
        let diff = self
            .repo
            .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)
            .map_err(|e| self.err(e))?;

        let mut buf = Vec::new();
        diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
            if matches!(line.origin(), '+' | '-' | ' ') {
                buf.push(line.origin() as u8);
            }
            buf.extend_from_slice(line.content());
            true
        })
        .map_err(|e| self.err(e))?;

        Ok(strip_commit_metadata(&String::from_utf8_lossy(&buf)).to_string())
    }
}

/// Drop everything before the first `diff --git` line.
pub fn strip_commit_metadata(patch: &str) -> &str {
    if patch.starts_with("diff --git") {
        return patch;
    }
    match patch.find("\ndiff --git") {
        Some(pos) => &patch[pos + 1..],
        None => "",
    }
}
