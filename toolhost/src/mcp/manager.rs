//! Provider registry and call routing

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::RwLock;

use super::cache::{cache_key, CachePolicy, ResultCache};
use super::connection::ProtocolConnection;
use super::types::{ProviderStatus, ServerState};
use crate::config::{ProviderConfig, ProvidersConfig};
use crate::error::{ProtocolError, ProtocolResult};

/// Fixed wait between attempts in [`ProtocolManager::call_tool_with_retry`]
pub const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Starts providers, routes calls to them, and caches idempotent results.
///
/// The registry lock is held exclusively only while starting or stopping a
/// provider. Calls take a shared lock just long enough to clone the
/// connection handle, so calls to different providers run in parallel. The
/// result cache is internally synchronized and never nests inside the
/// registry lock.
pub struct ProtocolManager {
    config: ProvidersConfig,
    registry: RwLock<HashMap<String, Arc<ProtocolConnection>>>,
    cache: ResultCache,
    cache_policy: CachePolicy,
}

impl ProtocolManager {
    pub fn new(config: ProvidersConfig) -> Self {
        let config = config.normalized();
        let cache_policy = CachePolicy::from_settings(&config.global);
        Self {
            config,
            registry: RwLock::new(HashMap::new()),
            cache: ResultCache::new(),
            cache_policy,
        }
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Sorted names of every configured provider
    pub fn configured_providers(&self) -> Vec<String> {
        self.config.provider_names()
    }

    /// Normalized config for a provider
    pub fn provider_config(&self, name: &str) -> ProtocolResult<&ProviderConfig> {
        self.config
            .providers
            .get(name)
            .ok_or_else(|| ProtocolError::UnknownProvider(name.to_string()))
    }

    /// Start a provider and register its connection.
    ///
    /// Idempotent while the registered connection is active. A connection
    /// whose process has exited is closed and replaced.
    pub async fn start_server(&self, name: &str) -> ProtocolResult<()> {
        let provider = self.provider_config(name)?;
        if !provider.enabled {
            return Err(ProtocolError::ProviderDisabled(name.to_string()));
        }

        let mut registry = self.registry.write().await;

        if let Some(existing) = registry.get(name) {
            if existing.is_active() {
                tracing::debug!("Provider '{}' already running", name);
                return Ok(());
            }
            tracing::info!("Replacing inactive connection to '{}'", name);
            if let Some(stale) = registry.remove(name) {
                if let Err(e) = stale.close().await {
                    tracing::warn!("Failed to close stale connection to '{}': {}", name, e);
                }
            }
        }

        tracing::info!("Starting provider '{}'", name);
        let connection =
            ProtocolConnection::open(name, provider.clone(), self.config.global.startup_delay())
                .await?;
        registry.insert(name.to_string(), Arc::new(connection));
        Ok(())
    }

    /// Handle to a registered connection
    async fn connection(&self, name: &str) -> ProtocolResult<Arc<ProtocolConnection>> {
        self.registry
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| ProtocolError::ProviderNotStarted(name.to_string()))
    }

    /// Invoke a tool on a started provider.
    ///
    /// Cacheable tools are answered from the cache while a fresh entry exists;
    /// only successful results are stored. Each store also purges entries
    /// that expired under other keys.
    pub async fn call_tool(
        &self,
        provider: &str,
        tool: &str,
        arguments: Value,
    ) -> ProtocolResult<Value> {
        let connection = self.connection(provider).await?;

        let Some(ttl) = self.cache_policy.ttl_for(tool) else {
            return connection.call(tool, arguments).await;
        };

        let key = cache_key(provider, tool, &arguments);
        if let Some(hit) = self.cache.get(&key) {
            tracing::info!("Cache hit for {}.{}", provider, tool);
            return Ok(hit);
        }

        let result = connection.call(tool, arguments).await?;
        let purged = self.cache.purge_expired();
        if purged > 0 {
            tracing::debug!("Purged {} expired cache entries", purged);
        }
        self.cache.set(key, result.clone(), ttl);
        Ok(result)
    }

    /// [`call_tool`](Self::call_tool) with the provider's retry budget.
    ///
    /// Timeouts and lost connections are retried after [`RETRY_BACKOFF`]. A
    /// lost connection is restarted before the next attempt. Every other
    /// error is returned immediately.
    pub async fn call_tool_with_retry(
        &self,
        provider: &str,
        tool: &str,
        arguments: Value,
    ) -> ProtocolResult<Value> {
        let budget = self.provider_config(provider)?.retry_budget();
        let mut attempt = 0;

        loop {
            let err = match self.call_tool(provider, tool, arguments.clone()).await {
                Ok(result) => return Ok(result),
                Err(e) => e,
            };

            let lost = matches!(
                err,
                ProtocolError::StreamClosed(_) | ProtocolError::NotActive(_)
            );
            if attempt >= budget || !(err.is_retryable() || lost) {
                return Err(err);
            }

            attempt += 1;
            tracing::warn!(
                "{}.{} failed ({}), retrying ({}/{})",
                provider,
                tool,
                err,
                attempt,
                budget
            );
            tokio::time::sleep(RETRY_BACKOFF).await;

            if lost {
                self.start_server(provider).await?;
            }
        }
    }

    /// Remove a provider from the registry and close its connection
    pub async fn stop_server(&self, name: &str) -> ProtocolResult<()> {
        let connection = self
            .registry
            .write()
            .await
            .remove(name)
            .ok_or_else(|| ProtocolError::UnknownProvider(name.to_string()))?;

        tracing::info!("Stopping provider '{}'", name);
        connection.close().await
    }

    /// Sorted names of registered providers whose connections are active
    pub async fn list_active(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .registry
            .read()
            .await
            .iter()
            .filter(|(_, connection)| connection.is_active())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Snapshot of every configured provider, sorted by name
    pub async fn status(&self) -> Vec<ProviderStatus> {
        let registry = self.registry.read().await;

        self.configured_providers()
            .into_iter()
            .map(|name| {
                let config = &self.config.providers[&name];
                let tool_count = config.tools.len();
                match registry.get(&name) {
                    Some(connection) => ProviderStatus {
                        state: if connection.is_active() {
                            ServerState::Running
                        } else {
                            ServerState::Failed
                        },
                        pid: connection.pid(),
                        uptime_secs: connection.uptime().as_secs(),
                        tool_count,
                        name,
                    },
                    None => ProviderStatus {
                        state: if config.enabled {
                            ServerState::Idle
                        } else {
                            ServerState::Disabled
                        },
                        pid: None,
                        uptime_secs: 0,
                        tool_count,
                        name,
                    },
                }
            })
            .collect()
    }

    /// Close every registered connection and empty the registry.
    ///
    /// Keeps going past individual failures and returns the first one.
    pub async fn close(&self) -> ProtocolResult<()> {
        let connections: Vec<(String, Arc<ProtocolConnection>)> =
            self.registry.write().await.drain().collect();

        let mut first_error = None;
        for (name, connection) in connections {
            if let Err(e) = connection.close().await {
                tracing::warn!("Failed to close provider '{}': {}", name, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    #[cfg(test)]
    async fn register(&self, name: &str, connection: ProtocolConnection) {
        self.registry
            .write()
            .await
            .insert(name.to_string(), Arc::new(connection));
    }
}
