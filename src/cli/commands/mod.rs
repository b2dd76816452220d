//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod analyze;
mod batch;
mod helpers;
mod jobs;
mod llm;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use crate::analysis::DeviceClass;
use crate::config::{Config, Settings};

#[derive(Parser)]
#[command(name = "persona")]
#[command(about = "Chunked LLM personality analysis of social media profiles")]
#[command(version)]
pub struct Cli {
    /// Target directory or database file (overrides config file)
    #[arg(long, short = 't', global = true)]
    target: Option<PathBuf>,

    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze one profile dump
    Analyze {
        /// Profile dump (JSON with `profile` and `posts`)
        dump: PathBuf,
        /// Identity the job and rate limits are tracked under (defaults to the handle)
        #[arg(long)]
        identity: Option<String>,
        /// Device class, which picks the per-call timeout
        #[arg(long, value_enum, default_value = "desktop")]
        device: DeviceClass,
        /// Resume an existing job
        #[arg(long)]
        job: Option<String>,
        /// Don't checkpoint to the job store
        #[arg(long)]
        no_persist: bool,
        /// Fail instead of filling missing fields with defaults
        #[arg(long)]
        strict: bool,
        /// Ask a single free-form question instead of running the stages
        #[arg(long)]
        prompt: Option<String>,
        /// Write the resulting record to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Analyze several dumps through the rate-limited dispatcher
    Batch {
        /// Profile dumps to analyze
        dumps: Vec<PathBuf>,
        /// Re-queue items left over from an interrupted batch
        #[arg(long)]
        restore: bool,
        /// Device class for every item
        #[arg(long, value_enum, default_value = "desktop")]
        device: DeviceClass,
        /// Fail items instead of filling missing fields with defaults
        #[arg(long)]
        strict: bool,
    },

    /// List analysis jobs
    Jobs {
        /// Only jobs for this identity
        #[arg(long)]
        identity: Option<String>,
        /// Maximum jobs to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show a job and its stage results
    Job {
        /// Job ID
        id: String,
    },

    /// LLM backend commands
    Llm {
        #[command(subcommand)]
        command: LlmCommands,
    },
}

#[derive(Subcommand)]
enum LlmCommands {
    /// Check the configured backend is reachable and has the model
    Check,
}

/// Load config and settings, honoring `--config` and `--target`.
async fn load_settings(
    config_path: Option<&Path>,
    target: Option<&Path>,
) -> anyhow::Result<(Settings, Config)> {
    let config = match config_path {
        Some(path) => Config::load_from_path(path).await?,
        None => Config::load().await,
    };
    let mut settings = Settings::default();
    config.apply_to_settings(&mut settings);
    if let Some(target) = target {
        settings.use_data_path(target);
    }
    Ok((settings, config))
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (settings, config) = load_settings(cli.config.as_deref(), cli.target.as_deref()).await?;

    match cli.command {
        Commands::Analyze {
            dump,
            identity,
            device,
            job,
            no_persist,
            strict,
            prompt,
            output,
        } => {
            analyze::cmd_analyze(
                &settings,
                &config,
                analyze::AnalyzeArgs {
                    dump,
                    identity,
                    device,
                    job,
                    persist: !no_persist,
                    strict,
                    prompt,
                    output,
                },
            )
            .await
        }
        Commands::Batch {
            dumps,
            restore,
            device,
            strict,
        } => batch::cmd_batch(&settings, &config, &dumps, restore, device, strict).await,
        Commands::Jobs { identity, limit } => {
            jobs::cmd_jobs(&settings, identity.as_deref(), limit).await
        }
        Commands::Job { id } => jobs::cmd_job(&settings, &id).await,
        Commands::Llm { command } => match command {
            LlmCommands::Check => llm::cmd_llm_check(&config).await,
        },
    }
}
