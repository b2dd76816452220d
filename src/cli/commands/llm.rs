//! LLM backend commands.

use console::style;

use crate::config::Config;
use crate::llm::LlmClient;

/// Check that the configured backend answers and serves the model.
pub async fn cmd_llm_check(config: &Config) -> anyhow::Result<()> {
    let llm = &config.llm;
    println!("\n{}", style("LLM Backend").bold());
    println!("{}", "-".repeat(50));
    println!("  {:<10} {}", "Provider:", llm.provider.as_str());
    println!("  {:<10} {}", "Endpoint:", llm.endpoint);
    println!("  {:<10} {}", "Model:", llm.model);

    if !llm.enabled {
        println!("\n{} LLM calls are disabled", style("!").yellow());
        return Ok(());
    }

    let client = LlmClient::new(llm.clone())?;
    if !client.is_available().await {
        println!(
            "\n{} Backend not reachable at {}",
            style("✗").red(),
            llm.endpoint
        );
        anyhow::bail!("LLM backend unavailable");
    }
    println!("\n{} Backend reachable", style("✓").green());

    match client.list_models().await {
        Ok(models) => {
            let has_model = models
                .iter()
                .any(|m| m == &llm.model || m.starts_with(&format!("{}:", llm.model)));
            if has_model {
                println!("{} Model {} available", style("✓").green(), llm.model);
            } else {
                println!(
                    "{} Model {} not found ({} models available)",
                    style("✗").red(),
                    llm.model,
                    models.len()
                );
                for model in models.iter().take(10) {
                    println!("    {}", style(model).dim());
                }
            }
        }
        Err(e) => println!("{} Could not list models: {}", style("!").yellow(), e),
    }
    Ok(())
}
