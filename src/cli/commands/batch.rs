//! Batch analysis through the dispatcher.

use std::path::PathBuf;
use std::sync::Arc;

use console::style;
use indicatif::ProgressBar;
use tokio::sync::mpsc;

use super::helpers::{bar_style, build_orchestrator, load_input, open_store, truncate};
use crate::analysis::DeviceClass;
use crate::config::{Config, Settings};
use crate::dispatcher::{
    AnalysisPayload, DispatchError, Dispatcher, OnComplete, OnError, PipelineHandler,
    QueueSnapshot, WorkKind,
};
use crate::rate_limit::RateLimiter;

type Completion = (String, Result<serde_json::Value, DispatchError>);

fn callbacks(label: String, tx: &mpsc::UnboundedSender<Completion>) -> (OnComplete, OnError) {
    let ok_tx = tx.clone();
    let err_tx = tx.clone();
    let ok_label = label.clone();
    (
        Box::new(move |value| {
            let _ = ok_tx.send((ok_label, Ok(value)));
        }),
        Box::new(move |err| {
            let _ = err_tx.send((label, Err(err)));
        }),
    )
}

/// Analyze several dumps concurrently under the rate limiter.
pub async fn cmd_batch(
    settings: &Settings,
    config: &Config,
    dumps: &[PathBuf],
    restore: bool,
    device: DeviceClass,
    strict: bool,
) -> anyhow::Result<()> {
    let store = open_store(settings).await?;
    let orchestrator = build_orchestrator(config, Some(store))?;
    let snapshot = QueueSnapshot::open(&settings.database_url()).await?;
    let dispatcher = Dispatcher::spawn(
        config.dispatcher.clone(),
        RateLimiter::new(config.rate_limit.clone()),
        Arc::new(PipelineHandler::new(Arc::new(orchestrator))),
        Some(snapshot.clone()),
    );

    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Completion>();
    let mut total = 0usize;

    if restore {
        let items = snapshot.restore(config.dispatcher.snapshot_ttl()).await?;
        if items.is_empty() {
            println!("{} Nothing to restore", style("→").dim());
        }
        for item in items {
            let (on_complete, on_error) = callbacks(item.identity.clone(), &done_tx);
            dispatcher.requeue(item, on_complete, on_error).await?;
            total += 1;
        }
    }

    for path in dumps {
        let (identity, input) = match load_input(path) {
            Ok(loaded) => loaded,
            Err(e) => {
                println!("{} {}", style("✗").red(), e);
                continue;
            }
        };
        let mut payload = AnalysisPayload::new(input);
        payload.device = device;
        payload.strict = strict;
        let (on_complete, on_error) = callbacks(identity.clone(), &done_tx);
        dispatcher
            .enqueue(
                WorkKind::Analysis,
                serde_json::to_value(&payload)?,
                &identity,
                on_complete,
                on_error,
            )
            .await?;
        total += 1;
    }
    drop(done_tx);

    if total == 0 {
        dispatcher.shutdown().await?;
        return Ok(());
    }

    println!(
        "{} Analyzing {} profile(s), up to {} at a time",
        style("→").cyan(),
        total,
        config.dispatcher.max_concurrent
    );
    let progress = ProgressBar::new(total as u64);
    progress.set_style(bar_style()?);

    let mut succeeded = 0usize;
    let mut failed = 0usize;
    while (succeeded + failed) < total {
        tokio::select! {
            done = done_rx.recv() => {
                let Some((identity, result)) = done else {
                    break;
                };
                match result {
                    Ok(value) => {
                        succeeded += 1;
                        let job = value["job_id"].as_str().unwrap_or("-").to_string();
                        progress.println(format!(
                            "{} {} (job {})",
                            style("✓").green(),
                            identity,
                            job
                        ));
                    }
                    Err(e) => {
                        failed += 1;
                        progress.println(format!(
                            "{} {}: {}",
                            style("✗").red(),
                            identity,
                            truncate(&e.to_string(), 80)
                        ));
                    }
                }
                progress.inc(1);
            }
            _ = tokio::signal::ctrl_c() => {
                progress.finish_and_clear();
                let saved = dispatcher.shutdown().await?;
                println!(
                    "{} Interrupted; {} unfinished item(s) saved. Rerun with --restore to continue.",
                    style("!").yellow(),
                    saved
                );
                return Ok(());
            }
        }
    }
    progress.finish_and_clear();
    dispatcher.shutdown().await?;

    println!(
        "{} Batch complete: {} succeeded, {} failed",
        style("✓").green(),
        succeeded,
        failed
    );
    Ok(())
}
