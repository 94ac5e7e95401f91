//! `check` command handler

use anyhow::{bail, Result};

use crate::config::ProvidersConfig;
use crate::mcp::ProtocolManager;

/// Start each enabled provider, report the handshake, then shut everything down
pub async fn run_check(config: ProvidersConfig, provider: Option<String>) -> Result<()> {
    let manager = ProtocolManager::new(config);

    let names = match provider {
        Some(name) => {
            manager.provider_config(&name)?;
            vec![name]
        }
        None => manager
            .configured_providers()
            .into_iter()
            .filter(|name| {
                manager
                    .provider_config(name)
                    .is_ok_and(|provider| provider.enabled)
            })
            .collect(),
    };

    if names.is_empty() {
        println!("No enabled providers to check.");
        return Ok(());
    }

    println!("=== Provider Check ===\n");

    let mut failed = 0;
    for name in &names {
        print!("  {} ", name);
        match manager.start_server(name).await {
            Ok(()) => {
                let status = manager.status().await;
                let pid = status
                    .iter()
                    .find(|s| &s.name == name)
                    .and_then(|s| s.pid)
                    .map(|pid| pid.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("✓ initialized (pid {})", pid);
            }
            Err(e) => {
                failed += 1;
                println!("✗ {}", e);
            }
        }
    }

    manager.close().await?;

    println!("\n{} of {} providers healthy", names.len() - failed, names.len());
    if failed > 0 {
        bail!("{} provider(s) failed to start", failed);
    }
    Ok(())
}
