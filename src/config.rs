//! Layered configuration for promptsmith.
//!
//! Settings are read from `promptsmith.toml` (an explicit `--config` path, or
//! the file in the working directory if present), then overridden by
//! environment variables (a `.env` file is loaded first by the binary), then
//! by CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 3001
//! dev = false
//!
//! [generation]
//! model = "gpt-4o-mini"
//! api_base = "https://api.openai.com/v1"
//! timeout_secs = 300
//!
//! [pipeline]
//! max_attempts = 1
//! build_command = "pnpm build"
//! install_command = "pnpm install"
//! read_concurrency = 12
//! recent_commits = 10
//!
//! [dev_server]
//! command = "pnpm dev"
//! stop_timeout_secs = 5
//!
//! [logging]
//! level = "info"
//! dir = "logs"
//! json = false
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::PipelineError;
use crate::source::FILE_PROCESSING_CONCURRENCY;

pub const DEFAULT_CONFIG_FILE: &str = "promptsmith.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Permissive CORS for a locally served UI.
    pub dev: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
            dev: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub model: String,
    pub api_base: String,
    /// Usually supplied through `OPENAI_API_KEY` rather than the file.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: None,
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Build validation runs; 1 means validate once with no auto-fix.
    pub max_attempts: u32,
    /// Validation is skipped entirely when unset.
    pub build_command: Option<String>,
    /// Run after a dependency manifest changes.
    pub install_command: Option<String>,
    pub read_concurrency: usize,
    pub recent_commits: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            build_command: None,
            install_command: None,
            read_concurrency: FILE_PROCESSING_CONCURRENCY,
            recent_commits: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DevServerSettings {
    pub command: String,
    /// Seconds to wait after SIGTERM before the process group is killed.
    pub stop_timeout_secs: u64,
}

impl Default for DevServerSettings {
    fn default() -> Self {
        Self {
            command: "pnpm dev".to_string(),
            stop_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub dir: Option<PathBuf>,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub generation: GenerationSettings,
    pub pipeline: PipelineSettings,
    pub dev_server: DevServerSettings,
    pub logging: LoggingSettings,
}

impl Settings {
    /// Load settings from `path`, or from `promptsmith.toml` in the working
    /// directory when no path is given, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, PipelineError> {
        let mut settings = match path {
            Some(path) => Self::load_file(path)?,
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::load_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };
        settings.apply_env_from(|key| std::env::var(key).ok());
        Ok(settings)
    }

    pub fn load_file(path: &Path) -> Result<Self, PipelineError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, PipelineError> {
        toml::from_str(content)
            .map_err(|e| PipelineError::Config(format!("Failed to parse {}: {}", DEFAULT_CONFIG_FILE, e)))
    }

    /// Apply overrides from an environment lookup. Unparseable numeric values
    /// are ignored.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.generation.api_key = Some(key);
        }
        if let Some(model) = lookup("PROMPTSMITH_MODEL") {
            self.generation.model = model;
        }
        if let Some(base) = lookup("PROMPTSMITH_API_BASE") {
            self.generation.api_base = base;
        }
        if let Some(port) = lookup("PROMPTSMITH_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Some(attempts) = lookup("PROMPTSMITH_MAX_ATTEMPTS").and_then(|v| v.parse().ok()) {
            self.pipeline.max_attempts = attempts;
        }
        if let Some(command) = lookup("PROMPTSMITH_BUILD_COMMAND") {
            self.pipeline.build_command = Some(command).filter(|c| !c.trim().is_empty());
        }
        if let Some(dir) = lookup("PROMPTSMITH_LOG_DIR") {
            self.logging.dir = Some(PathBuf::from(dir));
        }
    }

    /// Human-readable warnings about settings that will not behave as
    /// the user probably expects.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.pipeline.max_attempts == 0 {
            warnings.push("pipeline.max_attempts is 0; it will be treated as 1".to_string());
        }
        if self.pipeline.max_attempts > 1 && self.pipeline.build_command.is_none() {
            warnings.push(
                "pipeline.max_attempts > 1 has no effect without pipeline.build_command".to_string(),
            );
        }
        if self.pipeline.read_concurrency == 0 {
            warnings.push("pipeline.read_concurrency is 0; it will be treated as 1".to_string());
        }
        if self.generation.api_key.is_none() {
            warnings.push("OPENAI_API_KEY is not set; prompts cannot be processed".to_string());
        }
        warnings
    }
}
