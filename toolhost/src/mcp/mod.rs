//! Tool provider management
//!
//! Providers are external processes speaking newline-delimited JSON-RPC on
//! stdio. The [`ProtocolManager`] starts them from config, routes tool calls
//! to them, and caches results of idempotent tools.

pub mod cache;
mod connection;
mod manager;
pub mod protocol;
mod types;

pub use cache::{cache_key, CachePolicy, ResultCache};
pub use connection::{
    ProtocolConnection, DEFAULT_STARTUP_DELAY, HANDSHAKE_ATTEMPTS, HANDSHAKE_ATTEMPT_TIMEOUT,
    MAX_LINE_BYTES,
};
pub use manager::{ProtocolManager, RETRY_BACKOFF};
pub use protocol::{ToolCallResult, ToolContent};
pub use types::{ProviderStatus, ServerState};
