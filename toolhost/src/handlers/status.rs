//! `status` command handler

use anyhow::Result;

use crate::config::ProvidersConfig;

/// Print every configured provider and its settings
pub fn run_status(config: &ProvidersConfig, verbose: bool) -> Result<()> {
    println!("=== Tool Providers ===\n");

    let names = config.provider_names();
    if names.is_empty() {
        println!("No providers configured.");
        return Ok(());
    }

    for name in &names {
        let provider = &config.providers[name];
        let marker = if provider.enabled { "✓" } else { "✗" };
        println!(
            "  {} {} ({} tools, timeout {}s, {} retries)",
            marker,
            name,
            provider.tools.len(),
            provider.timeout,
            provider.retry_budget()
        );
        println!("      {} {}", provider.command, provider.args.join(" "));

        if !provider.description.is_empty() {
            println!("      {}", provider.description);
        }
        if verbose {
            for tool in &provider.tools {
                println!("      - {}", tool);
            }
        }
    }

    let enabled = names
        .iter()
        .filter(|name| config.providers[*name].enabled)
        .count();
    println!("\nTotal: {} providers ({} enabled)", names.len(), enabled);

    if let Some(tools) = &config.global.cacheable_tools {
        println!("Cached tools: {}", tools.join(", "));
    }

    Ok(())
}
