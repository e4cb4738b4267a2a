//! One-shot prompt run: `promptsmith process`.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use promptsmith::config::Settings;
use promptsmith::devserver::DevServers;
use promptsmith::orchestrator::PromptProcessor;

/// Print the `ProcessResult` as JSON. Fails (non-zero exit) when the run
/// reported an error, after the partial result has been printed.
pub async fn cmd_process(
    mut settings: Settings,
    root: &Path,
    prompt: &str,
    files: &[String],
    max_attempts: Option<u32>,
) -> Result<()> {
    if let Some(max_attempts) = max_attempts {
        settings.pipeline.max_attempts = max_attempts;
    }
    let dev_servers = Arc::new(DevServers::from_settings(&settings.dev_server));
    let processor = PromptProcessor::from_settings(&settings, dev_servers)
        .context("Failed to configure the prompt pipeline")?;

    let result = processor.process(prompt, root, files).await;
    println!(
        "{}",
        serde_json::to_string_pretty(&result).context("Failed to serialize result")?
    );

    if let Some(error) = result.error {
        anyhow::bail!(error);
    }
    Ok(())
}
