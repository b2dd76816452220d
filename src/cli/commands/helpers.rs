//! Shared helpers for CLI commands.

use std::path::Path;
use std::sync::Arc;

use indicatif::ProgressStyle;

use crate::analysis::{AnalysisInput, PipelineOrchestrator};
use crate::config::{Config, Settings};
use crate::llm::LlmClient;
use crate::models::ProfileDump;
use crate::repository::{DieselJobStore, JobStore};

/// Truncate a string to a maximum number of characters.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

/// Open the job database, creating it and applying migrations as needed.
pub async fn open_store(settings: &Settings) -> anyhow::Result<Arc<DieselJobStore>> {
    settings.ensure_directories()?;
    let store = DieselJobStore::open(&settings.database_url()).await?;
    Ok(Arc::new(store))
}

/// Orchestrator wired to the configured LLM backend.
pub fn build_orchestrator(
    config: &Config,
    store: Option<Arc<dyn JobStore>>,
) -> anyhow::Result<PipelineOrchestrator> {
    let client = LlmClient::new(config.llm.clone())?;
    let mut orchestrator = PipelineOrchestrator::new(Arc::new(client))
        .with_config(config.pipeline.clone())
        .with_quality(config.quality.clone())
        .with_sampling(config.llm.sampling());
    if let Some(store) = store {
        orchestrator = orchestrator.with_store(store);
    }
    Ok(orchestrator)
}

/// Read a dump and turn it into pipeline input.
pub fn load_input(path: &Path) -> anyhow::Result<(String, AnalysisInput)> {
    let dump = ProfileDump::load(path)
        .map_err(|e| anyhow::anyhow!("Failed to load {}: {}", path.display(), e))?;
    let posts = dump.original_posts();
    Ok((
        dump.profile.handle.clone(),
        AnalysisInput::new(dump.profile, posts),
    ))
}

/// Progress bar style shared by analysis commands.
pub fn bar_style() -> anyhow::Result<ProgressStyle> {
    Ok(ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {wide_msg}")?
        .progress_chars("█▓░"))
}
