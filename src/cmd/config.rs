//! Configuration view and validation commands: `promptsmith config`.

use anyhow::{Context, Result};

use promptsmith::config::Settings;

use super::super::ConfigCommands;

pub fn cmd_config(settings: &Settings, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            let rendered = toml::to_string_pretty(settings).context("Failed to render configuration")?;
            println!("{}", rendered.trim_end());
            println!(
                "# api key: {}",
                if settings.generation.api_key.is_some() { "set" } else { "not set" }
            );
        }
        Some(ConfigCommands::Validate) => {
            let warnings = settings.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in &warnings {
                    println!("  - {}", warning);
                }
            }
        }
    }
    Ok(())
}
