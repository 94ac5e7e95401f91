//! `call` command handler

use anyhow::{Context, Result};
use serde_json::Value;

use crate::config::ProvidersConfig;
use crate::mcp::{ProtocolManager, ToolCallResult};

/// Longest text summary printed before truncation
const SUMMARY_CHARS: usize = 2000;

/// Start one provider, invoke a tool, print the result, and shut down
pub async fn run_call(
    config: ProvidersConfig,
    provider: &str,
    tool: &str,
    args: Option<String>,
    retry: bool,
) -> Result<()> {
    let arguments: Value = match args {
        Some(raw) => serde_json::from_str(&raw).context("Invalid JSON arguments")?,
        None => Value::Object(Default::default()),
    };

    let manager = ProtocolManager::new(config);
    manager
        .start_server(provider)
        .await
        .with_context(|| format!("Failed to start provider '{}'", provider))?;

    let outcome = if retry {
        manager.call_tool_with_retry(provider, tool, arguments).await
    } else {
        manager.call_tool(provider, tool, arguments).await
    };

    if let Err(e) = manager.close().await {
        tracing::warn!("Shutdown error: {}", e);
    }

    let result = outcome.with_context(|| format!("{}.{} failed", provider, tool))?;

    match ToolCallResult::from_value(&result).and_then(|r| r.summary_text(SUMMARY_CHARS)) {
        Some(text) => println!("{}", text),
        None => println!("{}", serde_json::to_string_pretty(&result)?),
    }

    Ok(())
}
