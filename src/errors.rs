//! Typed error hierarchy for promptsmith.
//!
//! `PipelineError` is what the source, patch, tracker and orchestrator
//! layers return. The collaborator seams (generation, build validation,
//! dev server) have their own enums so test doubles can produce them
//! without touching the pipeline taxonomy.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from the prompt pipeline and the components it is built from.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to process file at {path}: {source}")]
    FileProcessing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Path '{path}' resolves outside the repository root")]
    PathEscape { path: String },

    #[error("Git operation failed in repository at \"{repo}\": {message}")]
    VersionControl { repo: PathBuf, message: String },

    #[error("Code generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("No files were selected for the prompt")]
    EmptySelection,

    #[error("Build failed after {attempts} attempts: {last}")]
    BuildFailed {
        attempts: u32,
        #[source]
        last: ValidationError,
    },

    #[error("Background task failed: {0}")]
    Task(String),
}

impl PipelineError {
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::FileProcessing {
            path: path.into(),
            source,
        }
    }

    pub fn git(repo: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        PipelineError::VersionControl {
            repo: repo.into(),
            message: err.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(err: tokio::task::JoinError) -> Self {
        PipelineError::Task(err.to_string())
    }
}

/// Errors from the text-generation backend.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("OPENAI_API_KEY environment variable is not set")]
    MissingApiKey,

    #[error("Request to generation backend failed: {0}")]
    Request(String),

    #[error("Generation backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Generation backend returned an empty completion")]
    EmptyResponse,
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        GenerationError::Request(err.to_string())
    }
}

/// Errors from running a build or install command against a repository.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Failed to start command '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command '{command}' failed with {}:\n{output}", exit_label(.exit_code))]
    Failed {
        command: String,
        exit_code: Option<i32>,
        output: String,
    },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

impl ValidationError {
    /// The captured command output, or the spawn error text.
    pub fn output(&self) -> String {
        match self {
            ValidationError::Spawn { source, .. } => source.to_string(),
            ValidationError::Failed { output, .. } => output.clone(),
        }
    }
}

/// Errors from the long-running dev server handle.
#[derive(Debug, Error)]
pub enum DevServerError {
    #[error("Failed to start dev server in {dir}: {source}")]
    Spawn {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No dev server is currently running")]
    NotRunning,

    #[error("Failed to stop dev server: {0}")]
    Stop(#[source] std::io::Error),
}
