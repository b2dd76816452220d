//! Single-profile analysis command.

use std::path::PathBuf;
use std::sync::Arc;

use console::style;
use indicatif::ProgressBar;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::helpers::{bar_style, build_orchestrator, load_input, open_store};
use crate::analysis::{
    AnalysisError, AnalysisEvent, AnalysisOptions, AnalysisOutput, AnalysisRequest, DeviceClass,
};
use crate::config::{Config, Settings};
use crate::models::AnalysisStage;
use crate::repository::JobStore;

pub struct AnalyzeArgs {
    pub dump: PathBuf,
    pub identity: Option<String>,
    pub device: DeviceClass,
    pub job: Option<String>,
    pub persist: bool,
    pub strict: bool,
    pub prompt: Option<String>,
    pub output: Option<PathBuf>,
}

/// Analyze one profile dump.
pub async fn cmd_analyze(
    settings: &Settings,
    config: &Config,
    args: AnalyzeArgs,
) -> anyhow::Result<()> {
    let (handle, input) = load_input(&args.dump)?;
    let identity = args.identity.unwrap_or(handle);
    let free_form = args.prompt.is_some();

    let store: Option<Arc<dyn JobStore>> = if args.persist && !free_form {
        Some(open_store(settings).await?)
    } else {
        None
    };
    let orchestrator = build_orchestrator(config, store)?;

    println!(
        "{} Analyzing {} ({} posts, {} device)",
        style("→").cyan(),
        style(&identity).bold(),
        input.item_count(),
        args.device.as_str()
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    // Progress bar driven by pipeline events
    let (event_tx, mut event_rx) = mpsc::channel::<AnalysisEvent>(32);
    let progress = ProgressBar::new(AnalysisStage::COUNT as u64);
    progress.set_style(bar_style()?);
    let pb = progress.clone();
    let event_handler = tokio::spawn(async move {
        let mut job_id = None;
        while let Some(event) = event_rx.recv().await {
            match event {
                AnalysisEvent::Started {
                    job_id: id,
                    first_stage,
                } => {
                    pb.set_position(first_stage.index() as u64 - 1);
                    if let Some(ref id) = id {
                        pb.println(format!("  {} job {}", style("•").dim(), id));
                    }
                    job_id = id;
                }
                AnalysisEvent::StageStarted { stage } => {
                    pb.set_message(stage.as_str().replace('_', " "));
                }
                AnalysisEvent::Progress {
                    percent_complete, ..
                } => {
                    let done = (percent_complete / 100.0 * AnalysisStage::COUNT as f32).round();
                    pb.set_position(done as u64);
                }
                AnalysisEvent::StageTolerated { stage, error } => {
                    pb.println(format!(
                        "  {} {} skipped: {}",
                        style("!").yellow(),
                        stage,
                        error
                    ));
                }
                AnalysisEvent::StageResumed { stage, resumes } => {
                    pb.println(format!(
                        "  {} {} timed out, resuming ({})",
                        style("↻").cyan(),
                        stage,
                        resumes
                    ));
                }
                AnalysisEvent::Finished { .. } => pb.finish_and_clear(),
            }
        }
        job_id
    });

    let request = AnalysisRequest::new(&identity, input).with_options(AnalysisOptions {
        device: args.device,
        persist: args.persist,
        strict: args.strict,
        job_id: args.job.clone(),
        create_if_missing: false,
        prompt: args.prompt,
    });
    let result = orchestrator.run(request, &cancel, Some(event_tx)).await;
    let job_id = event_handler.await.ok().flatten().or(args.job);
    progress.finish_and_clear();

    match result {
        Ok(AnalysisOutput::FreeForm { response }) => {
            println!("{}", response);
            Ok(())
        }
        Ok(AnalysisOutput::Profile(analysis)) => {
            println!("{} Analysis complete", style("✓").green());
            if !analysis.tolerated.is_empty() {
                let stages: Vec<&str> = analysis.tolerated.iter().map(|s| s.as_str()).collect();
                println!(
                    "  {} stages skipped: {}",
                    style("!").yellow(),
                    stages.join(", ")
                );
            }
            if !analysis.defaulted.is_empty() {
                let fields: Vec<&str> = analysis.defaulted.iter().map(|f| f.as_str()).collect();
                println!(
                    "  {} filled with defaults: {}",
                    style("!").yellow(),
                    fields.join(", ")
                );
            }

            let json = serde_json::to_string_pretty(&analysis.record)?;
            match args.output {
                Some(path) => {
                    tokio::fs::write(&path, json).await?;
                    println!("  {} wrote {}", style("→").dim(), path.display());
                }
                None => println!("{}", json),
            }
            Ok(())
        }
        Err(AnalysisError::Aborted) => {
            println!("{} Analysis aborted", style("✗").red());
            if let Some(id) = job_id {
                println!(
                    "  {} resume with: persona analyze {} --job {}",
                    style("→").dim(),
                    args.dump.display(),
                    id
                );
            }
            anyhow::bail!("aborted")
        }
        Err(e) => {
            println!("{} Analysis failed: {}", style("✗").red(), e);
            Err(e.into())
        }
    }
}
