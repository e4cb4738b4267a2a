//! End-to-end prompt processing.
//!
//! [`PromptProcessor::process`] drives one request through
//! `Encoding -> Generating -> Applying -> Committing`, then, when a build
//! validator is configured, alternates `Validating` and `Resolving` until the
//! build passes or the attempt budget runs out. Every commit made along the
//! way is returned, including when the run fails.

pub mod prompts;
pub mod state;

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

pub use state::{RootGuard, RootLocks, Stage};

use crate::config::{PipelineSettings, Settings};
use crate::devserver::DevServers;
use crate::errors::PipelineError;
use crate::generate::{CodeGenerator, OpenAiGenerator};
use crate::models::{CommitRecord, FileOperation, ProcessResult};
use crate::patch::{apply, decode, encode, normalize_relative};
use crate::shell::run_command;
use crate::source::FILE_PROCESSING_CONCURRENCY;
use crate::tracker::GitTracker;
use crate::validate::{BuildValidator, CommandValidator};

/// Files whose change means the project's dependencies must be reinstalled.
pub const DEPENDENCY_MANIFESTS: &[&str] = &[
    "package.json",
    "Cargo.toml",
    "pyproject.toml",
    "requirements.txt",
    "go.mod",
];

pub fn is_dependency_manifest(relative_path: &str) -> bool {
    let name = relative_path.rsplit('/').next().unwrap_or(relative_path);
    DEPENDENCY_MANIFESTS.contains(&name)
}

#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Number of validation runs; auto-fix happens between them.
    pub max_attempts: u32,
    pub install_command: Option<String>,
    pub read_concurrency: usize,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            install_command: None,
            read_concurrency: FILE_PROCESSING_CONCURRENCY,
        }
    }
}

impl From<&PipelineSettings> for ProcessOptions {
    fn from(settings: &PipelineSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            install_command: settings.install_command.clone(),
            read_concurrency: settings.read_concurrency,
        }
    }
}

pub struct PromptProcessor {
    generator: Arc<dyn CodeGenerator>,
    validator: Option<Arc<dyn BuildValidator>>,
    dev_servers: Arc<DevServers>,
    locks: RootLocks,
    options: ProcessOptions,
}

impl PromptProcessor {
    pub fn new(generator: Arc<dyn CodeGenerator>, dev_servers: Arc<DevServers>) -> Self {
        Self {
            generator,
            validator: None,
            dev_servers,
            locks: RootLocks::new(),
            options: ProcessOptions::default(),
        }
    }

    /// Production wiring: the OpenAI-compatible generator, plus a command
    /// validator when a build command is configured.
    pub fn from_settings(settings: &Settings, dev_servers: Arc<DevServers>) -> Result<Self, PipelineError> {
        let generator = OpenAiGenerator::new(&settings.generation)?;
        let mut processor = Self::new(Arc::new(generator), dev_servers)
            .with_options(ProcessOptions::from(&settings.pipeline));
        if let Some(command) = &settings.pipeline.build_command {
            processor = processor.with_validator(Arc::new(CommandValidator::new(command.clone())));
        }
        Ok(processor)
    }

    pub fn with_validator(mut self, validator: Arc<dyn BuildValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_options(mut self, options: ProcessOptions) -> Self {
        self.options = options;
        self
    }

    /// Run `prompt` against `selected_paths` in the repository at `root`.
    ///
    /// Never returns an error directly: failures are reported in
    /// [`ProcessResult::error`] next to whatever commits were already made.
    pub async fn process(&self, prompt: &str, root: &Path, selected_paths: &[String]) -> ProcessResult {
        let _guard = self.locks.acquire(root).await;
        info!(root = %root.display(), files = selected_paths.len(), "Processing prompt");
        debug!(prompt, "Prompt text");

        let mut run = Run::new(root);
        match self.run(&mut run, prompt, selected_paths).await {
            Ok(()) => {
                run.enter(Stage::Done);
                info!(root = %root.display(), commits = run.commits.len(), "Prompt processed");
                ProcessResult {
                    commits: run.commits,
                    error: None,
                }
            }
            Err(e) => {
                let failed_during = run.stage;
                run.enter(Stage::Failed);
                error!(
                    root = %root.display(),
                    stage = %failed_during,
                    commits = run.commits.len(),
                    error = %e,
                    "Error processing prompt"
                );
                ProcessResult {
                    commits: run.commits,
                    error: Some(format!(
                        "Failed to process prompt in repository at \"{}\" while {}: {}",
                        root.display(),
                        failed_during,
                        e
                    )),
                }
            }
        }
    }

    async fn run(&self, run: &mut Run<'_>, prompt: &str, selected_paths: &[String]) -> Result<(), PipelineError> {
        run.enter(Stage::Encoding);
        if selected_paths.is_empty() {
            return Err(PipelineError::EmptySelection);
        }
        let selected = selected_paths
            .iter()
            .map(|p| normalize_relative(p))
            .collect::<Result<Vec<_>, _>>()?;
        let encoded = encode(run.root, &selected, self.options.read_concurrency).await?;
        run.working_set = selected;

        run.enter(Stage::Generating);
        let generated = self
            .generator
            .generate_code(&prompts::instruction_prompt(prompt, &encoded))
            .await?;

        run.enter(Stage::Applying);
        self.apply_generated(run, &generated).await?;

        run.enter(Stage::Committing);
        let record = commit(run.root, prompt).await?;
        run.commits.push(record);

        let Some(validator) = &self.validator else {
            return Ok(());
        };

        let max_attempts = self.options.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            run.enter(Stage::Validating);
            let failure = match validator.validate(run.root).await {
                Ok(()) => return Ok(()),
                Err(failure) => failure,
            };
            warn!(attempt, max_attempts, root = %run.root.display(), "Build validation failed");
            if attempt == max_attempts {
                return Err(PipelineError::BuildFailed {
                    attempts: attempt,
                    last: failure,
                });
            }

            run.enter(Stage::Resolving);
            let current = run.existing_working_set().await;
            let encoded = encode(run.root, &current, self.options.read_concurrency).await?;
            let generated = self
                .generator
                .generate_code(&prompts::resolution_prompt(
                    &validator.describe(),
                    &failure.output(),
                    &encoded,
                ))
                .await?;
            self.apply_generated(run, &generated).await?;

            run.enter(Stage::Committing);
            let message = format!("Auto-fix attempt {} of prompt: {}", attempt, prompt);
            let record = commit(run.root, &message).await?;
            run.commits.push(record);
        }
        Ok(())
    }

    async fn apply_generated(&self, run: &mut Run<'_>, generated: &str) -> Result<(), PipelineError> {
        let operations = decode(generated)?;
        apply(run.root, &operations).await?;
        run.track(&operations);

        let manifests: Vec<&str> = operations
            .iter()
            .map(|op| op.relative_path.as_str())
            .filter(|path| is_dependency_manifest(path))
            .collect();
        if !manifests.is_empty() {
            info!(?manifests, "Dependency manifest updates found");
            if let Some(command) = &self.options.install_command {
                self.reinstall(run.root, command).await?;
            }
        }
        Ok(())
    }

    /// Run the install command with the repository's dev server stopped,
    /// restarting it afterwards if it had been running.
    async fn reinstall(&self, root: &Path, command: &str) -> Result<(), PipelineError> {
        let running = match self.dev_servers.existing(root).await {
            Some(server) if server.is_running() => Some(server),
            _ => None,
        };
        if let Some(server) = &running {
            if let Err(e) = server.stop().await {
                warn!(root = %root.display(), error = %e, "Failed to stop dev server before install");
            }
        }

        info!(command, root = %root.display(), "Installing dependencies");
        run_command(command, root).await?;

        if let Some(server) = &running {
            if let Err(e) = server.start(root).await {
                warn!(root = %root.display(), error = %e, "Failed to restart dev server after install");
            }
        }
        Ok(())
    }

    /// Undo the most recent commit in `root`, waiting for any in-flight
    /// prompt on the same repository.
    pub async fn revert_last(&self, root: &Path) -> Result<CommitRecord, PipelineError> {
        let _guard = self.locks.acquire(root).await;
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || GitTracker::open(&root)?.revert_last()).await?
    }

    pub async fn recent_commits(&self, root: &Path, count: usize) -> Result<Vec<CommitRecord>, PipelineError> {
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || GitTracker::open(&root)?.recent_commits(count)).await?
    }
}

async fn commit(root: &Path, message: &str) -> Result<CommitRecord, PipelineError> {
    let root = root.to_path_buf();
    let message = message.to_string();
    tokio::task::spawn_blocking(move || GitTracker::open(&root)?.commit(&message)).await?
}

/// Bookkeeping for one `process` call.
struct Run<'a> {
    root: &'a Path,
    stage: Stage,
    commits: Vec<CommitRecord>,
    /// Paths the resolution prompt re-encodes: the selection plus anything
    /// generated since.
    working_set: Vec<String>,
}

impl<'a> Run<'a> {
    fn new(root: &'a Path) -> Self {
        Self {
            root,
            stage: Stage::Encoding,
            commits: Vec::new(),
            working_set: Vec::new(),
        }
    }

    fn enter(&mut self, stage: Stage) {
        debug!(root = %self.root.display(), from = %self.stage, to = %stage, "Stage transition");
        self.stage = stage;
    }

    fn track(&mut self, operations: &[FileOperation]) {
        for op in operations {
            if !op.is_delete() && !self.working_set.contains(&op.relative_path) {
                self.working_set.push(op.relative_path.clone());
            }
        }
    }

    async fn existing_working_set(&self) -> Vec<String> {
        let mut existing = Vec::with_capacity(self.working_set.len());
        for path in &self.working_set {
            let is_file = tokio::fs::metadata(self.root.join(path))
                .await
                .map(|meta| meta.is_file())
                .unwrap_or(false);
            if is_file {
                existing.push(path.clone());
            }
        }
        existing
    }
}
