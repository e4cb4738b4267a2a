use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use promptsmith::config::Settings;

mod cmd;

#[derive(Parser)]
#[command(name = "promptsmith")]
#[command(version, about = "Rewrite a project's source from a natural-language prompt, one git checkpoint at a time")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to promptsmith.toml. Defaults to ./promptsmith.toml when present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP API
    Serve {
        /// Port to serve on
        #[arg(short, long)]
        port: Option<u16>,

        /// Enable dev mode (permissive CORS for a separately served UI)
        #[arg(long)]
        dev: bool,
    },
    /// List the files eligible for a prompt, with token counts
    Files {
        /// Repository root
        root: PathBuf,
    },
    /// Show the most recent commits with their diffs
    Commits {
        /// Repository root
        root: PathBuf,

        /// Number of commits to show
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },
    /// Undo the most recent commit
    Revert {
        /// Repository root
        root: PathBuf,
    },
    /// Apply a prompt to the selected files and commit the result
    Process {
        /// Repository root
        root: PathBuf,

        /// What to change, in plain language
        #[arg(long)]
        prompt: String,

        /// Repository-relative file to include (repeatable)
        #[arg(long = "file", required = true)]
        files: Vec<String>,

        /// Build validation runs before giving up
        #[arg(long)]
        max_attempts: Option<u32>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let settings = Settings::load(cli.config.as_deref())?;
    let _log_guard = promptsmith::logging::init(&settings.logging, cli.verbose)?;
    for warning in settings.validate() {
        tracing::warn!("{}", warning);
    }

    match &cli.command {
        Commands::Serve { port, dev } => cmd::cmd_serve(settings, *port, *dev).await?,
        Commands::Files { root } => cmd::cmd_files(&settings, root).await?,
        Commands::Commits { root, count } => cmd::cmd_commits(&settings, root, *count).await?,
        Commands::Revert { root } => cmd::cmd_revert(root).await?,
        Commands::Process {
            root,
            prompt,
            files,
            max_attempts,
        } => cmd::cmd_process(settings, root, prompt, files, *max_attempts).await?,
        Commands::Config { command } => cmd::cmd_config(&settings, command.clone())?,
    }

    Ok(())
}
