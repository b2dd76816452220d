//! Job inspection commands.

use console::style;

use super::helpers::{open_store, truncate};
use crate::config::Settings;
use crate::models::{JobStatus, StageStatus};
use crate::repository::JobStore;

fn status_label(status: JobStatus) -> console::StyledObject<&'static str> {
    match status {
        JobStatus::Pending => style(status.as_str()).dim(),
        JobStatus::Processing => style(status.as_str()).cyan(),
        JobStatus::Completed => style(status.as_str()).green(),
        JobStatus::Failed => style(status.as_str()).red(),
    }
}

/// List recent jobs.
pub async fn cmd_jobs(settings: &Settings, identity: Option<&str>, limit: usize) -> anyhow::Result<()> {
    let store = open_store(settings).await?;
    let jobs = store.list_jobs(identity, limit).await?;

    if jobs.is_empty() {
        println!("{} No jobs found", style("!").yellow());
        return Ok(());
    }

    println!(
        "\n{:<36}  {:<20}  {:<10}  {:>6}  {}",
        style("ID").bold(),
        style("Identity").bold(),
        style("Status").bold(),
        style("Stages").bold(),
        style("Updated").bold()
    );
    println!("{}", "-".repeat(100));
    for job in jobs {
        println!(
            "{:<36}  {:<20}  {:<10}  {:>6}  {}",
            job.id,
            truncate(&job.identity, 20),
            status_label(job.status),
            format!("{}/{}", job.processed_stages, job.total_stages),
            job.updated_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

/// Show one job with its stage results.
pub async fn cmd_job(settings: &Settings, id: &str) -> anyhow::Result<()> {
    let store = open_store(settings).await?;
    let Some(job) = store.get_job(id).await? else {
        anyhow::bail!("Job not found: {}", id);
    };

    println!("\n{}", style(format!("Job {}", job.id)).bold());
    println!("{}", "-".repeat(60));
    println!("{:<12} {}", "Identity:", job.identity);
    println!("{:<12} {}", "Status:", status_label(job.status));
    println!(
        "{:<12} {}/{} ({:.0}%)",
        "Stages:",
        job.processed_stages,
        job.total_stages,
        job.percent_complete()
    );
    println!("{:<12} {}", "Created:", job.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("{:<12} {}", "Updated:", job.updated_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(ref message) = job.error_message {
        println!("{:<12} {}", "Note:", message);
    }

    let results = store.stage_results(id).await?;
    if results.is_empty() {
        return Ok(());
    }
    println!("\n{}", style("Stage results").cyan());
    for result in results {
        let name = result
            .stage()
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|| format!("stage {}", result.stage_index));
        let marker = match result.status {
            StageStatus::Completed => style("✓").green(),
            StageStatus::Failed => style("✗").red(),
        };
        let detail = match (&result.payload, &result.error) {
            (Some(payload), _) => {
                let fields: Vec<&str> = payload.fields.iter().map(|f| f.as_str()).collect();
                fields.join(", ")
            }
            (None, Some(error)) => truncate(error, 60),
            (None, None) => String::new(),
        };
        println!(
            "  {} {:<16} {:>4} posts  {}",
            marker,
            name,
            result.item_count,
            style(detail).dim()
        );
    }
    Ok(())
}
