//! Shared fixtures for provider integration tests

use serde_json::{json, Value};
use toolhost::config::ProvidersConfig;
use toolhost::mcp::ProtocolManager;

/// Path of the stub provider built for this test run
pub fn echo_provider() -> &'static str {
    env!("CARGO_BIN_EXE_echo-provider")
}

/// An enabled stub provider entry with extra command-line flags
pub fn provider_entry(flags: &[&str]) -> Value {
    json!({
        "enabled": true,
        "command": echo_provider(),
        "args": flags,
        "timeout": 1,
        "retryAttempts": 2,
        "description": "Stub provider",
        "tools": ["echo", "search_echo", "call_count"]
    })
}

/// Full config document with the standard set of providers
pub fn config_document() -> Value {
    let mut disabled = provider_entry(&[]);
    disabled["enabled"] = json!(false);

    json!({
        "mcpServers": {
            "echo": provider_entry(&[]),
            "second": provider_entry(&[]),
            "disabled": disabled,
            "exits": provider_entry(&["--exit-on-init"]),
            "rejects": provider_entry(&["--reject-init"]),
            "missing": {"enabled": true, "command": "/nonexistent/toolhost-provider"}
        },
        "globalSettings": {
            "startupDelayMs": 0,
            "maxRetryAttempts": 3,
            "cacheableTools": ["search_echo"]
        }
    })
}

pub fn config() -> ProvidersConfig {
    ProvidersConfig::from_json_str(&config_document().to_string())
        .expect("test config should parse")
}

pub fn manager() -> ProtocolManager {
    ProtocolManager::new(config())
}

/// Manager with `echo` already started
pub async fn started() -> ProtocolManager {
    let manager = manager();
    manager
        .start_server("echo")
        .await
        .expect("echo provider should start");
    manager
}

pub async fn pid_of(manager: &ProtocolManager, name: &str) -> Option<u32> {
    manager
        .status()
        .await
        .into_iter()
        .find(|s| s.name == name)
        .and_then(|s| s.pid)
}
