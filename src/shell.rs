//! Running shell commands inside a repository.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::errors::ValidationError;

/// Captured output of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Run `command` through `sh -c` with `dir` as the working directory.
///
/// A non-zero exit becomes [`ValidationError::Failed`] carrying both
/// streams, since the build output is what the auto-fix prompt needs.
pub async fn run_command(command: &str, dir: &Path) -> Result<CommandOutput, ValidationError> {
    debug!(command, dir = %dir.display(), "Running command");

    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|source| ValidationError::Spawn {
            command: command.to_string(),
            source,
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if output.status.success() {
        debug!(command, dir = %dir.display(), "Command succeeded");
        return Ok(CommandOutput { stdout, stderr });
    }

    let exit_code = output.status.code();
    warn!(command, dir = %dir.display(), ?exit_code, "Command failed");
    Err(ValidationError::Failed {
        command: command.to_string(),
        exit_code,
        output: format!("STDOUT:\n{}\nSTDERR:\n{}", stdout.trim_end(), stderr.trim_end()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_captures_stdout_in_working_dir() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "here").unwrap();
        let out = run_command("cat marker.txt", dir.path()).await.unwrap();
        assert_eq!(out.stdout, "here");
        assert!(out.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_failure_carries_both_streams_and_exit_code() {
        let dir = tempdir().unwrap();
        let err = run_command("echo built; echo 'TS2304: cannot find name' >&2; exit 3", dir.path())
            .await
            .unwrap_err();
        match &err {
            ValidationError::Failed {
                exit_code, output, ..
            } => {
                assert_eq!(*exit_code, Some(3));
                assert!(output.contains("built"));
                assert!(output.contains("TS2304"));
            }
            other => panic!("Expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_directory_is_spawn_error() {
        let err = run_command("true", Path::new("/nonexistent/promptsmith/dir"))
            .await
            .unwrap_err();
        assert!(matches!(err, ValidationError::Spawn { .. }));
    }
}
