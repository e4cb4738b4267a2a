use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A file eligible for inclusion in a prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFile {
    pub name: String,
    /// Posix-separated path relative to the repository root.
    pub relative_path: String,
    /// `None` when the file could not be measured, not when it is empty.
    pub token_count: Option<usize>,
}

/// One decoded change: write `content` to `relative_path`, or delete it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOperation {
    pub relative_path: String,
    pub content: Option<String>,
}

impl FileOperation {
    pub fn write(relative_path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            content: Some(content.into()),
        }
    }

    pub fn delete(relative_path: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            content: None,
        }
    }

    /// Empty (after trim) content is the deletion marker.
    pub fn is_delete(&self) -> bool {
        self.content
            .as_deref()
            .is_none_or(|content| content.trim().is_empty())
    }
}

/// A checkpoint commit as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRecord {
    pub hash: String,
    pub message: String,
    /// Unified diff starting at the first `diff --git` line.
    pub diff: String,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of one prompt run. `commits` lists every checkpoint created,
/// including those made before a failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessResult {
    pub commits: Vec<CommitRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcessResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
