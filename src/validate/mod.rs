//! Build validation after a change has been committed.

use std::path::Path;

use async_trait::async_trait;
use tracing::info;

use crate::errors::ValidationError;
use crate::shell::run_command;

/// Checks whether the repository at `root` still builds.
#[async_trait]
pub trait BuildValidator: Send + Sync {
    async fn validate(&self, root: &Path) -> Result<(), ValidationError>;

    /// Human-readable name of the check, used in the auto-fix prompt.
    fn describe(&self) -> String;
}

/// Runs a configured shell command; success is a zero exit status.
pub struct CommandValidator {
    command: String,
}

impl CommandValidator {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl BuildValidator for CommandValidator {
    async fn validate(&self, root: &Path) -> Result<(), ValidationError> {
        run_command(&self.command, root).await?;
        info!(command = %self.command, root = %root.display(), "Build validation passed");
        Ok(())
    }

    fn describe(&self) -> String {
        self.command.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_passing_command() {
        let dir = tempdir().unwrap();
        let validator = CommandValidator::new("test -d .");
        validator.validate(dir.path()).await.unwrap();
        assert_eq!(validator.describe(), "test -d .");
    }

    #[tokio::test]
    async fn test_failing_command_returns_output() {
        let dir = tempdir().unwrap();
        let validator = CommandValidator::new("echo 'missing semicolon' >&2; false");
        let err = validator.validate(dir.path()).await.unwrap_err();
        assert!(err.output().contains("missing semicolon"));
    }
}
