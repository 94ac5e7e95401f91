//! Configuration loading

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name
pub const CONFIG_FILE: &str = "mcp_config.json";

/// Find a config file by walking up the directory tree, then checking global config.
///
/// Search order:
/// 1. Current directory and parent directories (walking up to root)
/// 2. Global config at ~/.config/toolhost/
///
/// Returns the path if found, None otherwise.
fn find_config_file(filename: &str) -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let candidate = current.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }

        // Projects commonly keep provider config under mcp/
        let nested = current.join("mcp").join(filename);
        if nested.exists() {
            return Some(nested);
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_path = config_dir.join("toolhost").join(filename);
        if global_path.exists() {
            return Some(global_path);
        }
    }

    None
}

/// Provider registry configuration (from mcp_config.json)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProvidersConfig {
    #[serde(rename = "mcpServers", default)]
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(rename = "globalSettings", default)]
    pub global: GlobalSettings,
}

/// Static description of one tool provider
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// Disabled providers refuse to start
    #[serde(default)]
    pub enabled: bool,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Per-call timeout in seconds (0 = use `globalSettings.defaultTimeout`)
    #[serde(default)]
    pub timeout: u64,
    /// Extra attempts for `call_tool_with_retry` (absent = global maximum)
    #[serde(default)]
    pub retry_attempts: Option<u32>,
    #[serde(default)]
    pub description: String,
    /// Tool names the provider advertises
    #[serde(default)]
    pub tools: BTreeSet<String>,
    /// Environment for the child; values support `$VAR` / `${VAR}` expansion
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl ProviderConfig {
    /// Enabled provider running `command` with default settings
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            enabled: true,
            command: command.into(),
            args: Vec::new(),
            timeout: 0,
            retry_attempts: None,
            description: String::new(),
            tools: BTreeSet::new(),
            env: HashMap::new(),
        }
    }

    /// Per-call deadline (the built-in default when not yet normalized)
    pub fn call_timeout(&self) -> Duration {
        match self.timeout {
            0 => Duration::from_secs(default_timeout()),
            secs => Duration::from_secs(secs),
        }
    }

    /// Number of extra attempts a retrying call may make
    pub fn retry_budget(&self) -> u32 {
        self.retry_attempts.unwrap_or(0)
    }

    /// Expanded environment for the child process
    pub fn expanded_env(&self) -> Vec<(String, String)> {
        self.env
            .iter()
            .map(|(key, value)| {
                let expanded = shellexpand::env(value).unwrap_or_else(|_| value.clone().into());
                (key.clone(), expanded.into_owned())
            })
            .collect()
    }
}

/// Manager-wide settings section
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSettings {
    #[serde(default = "default_timeout")]
    pub default_timeout: u64,
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_enable_logging")]
    pub enable_logging: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Warm-up delay between spawning a provider and the handshake
    #[serde(default = "default_startup_delay_ms")]
    pub startup_delay_ms: u64,
    /// Overrides the built-in cacheable tool allow-list when present
    #[serde(default)]
    pub cacheable_tools: Option<Vec<String>>,
}

// Default value functions
fn default_timeout() -> u64 {
    30
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_enable_logging() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_startup_delay_ms() -> u64 {
    2000
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            default_timeout: default_timeout(),
            max_retry_attempts: default_max_retry_attempts(),
            enable_logging: default_enable_logging(),
            log_level: default_log_level(),
            startup_delay_ms: default_startup_delay_ms(),
            cacheable_tools: None,
        }
    }
}

impl GlobalSettings {
    /// Warm-up delay as a duration
    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }
}

impl ProvidersConfig {
    /// Load provider config from mcp_config.json
    ///
    /// Search order:
    /// 1. Walk up directory tree from cwd looking for mcp_config.json (or mcp/mcp_config.json)
    /// 2. Check ~/.config/toolhost/mcp_config.json (global fallback)
    pub fn load() -> Result<Option<Self>> {
        if let Some(config_path) = find_config_file(CONFIG_FILE) {
            tracing::debug!("Loading provider config from: {}", config_path.display());
            return Self::load_from_path(&config_path).map(Some);
        }

        tracing::debug!("No {} found", CONFIG_FILE);
        Ok(None)
    }

    /// Load from a specific path (TOML when the extension is `.toml`, JSON otherwise)
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config: ProvidersConfig = if path.extension().is_some_and(|ext| ext == "toml") {
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        };

        Ok(config.normalized())
    }

    /// Parse a JSON config document
    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: ProvidersConfig =
            serde_json::from_str(content).context("Failed to parse provider config")?;
        Ok(config.normalized())
    }

    /// Fill per-provider values that fall back to the global settings.
    ///
    /// Idempotent; the manager applies it again on construction.
    pub fn normalized(mut self) -> Self {
        let default_timeout = if self.global.default_timeout == 0 {
            default_timeout()
        } else {
            self.global.default_timeout
        };
        let max_retries = self.global.max_retry_attempts;

        for provider in self.providers.values_mut() {
            if provider.timeout == 0 {
                provider.timeout = default_timeout;
            }
            let attempts = provider.retry_attempts.unwrap_or(max_retries);
            provider.retry_attempts = Some(attempts.min(max_retries));
        }

        self
    }

    /// Sorted names of every configured provider
    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }
}
