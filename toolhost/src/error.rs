//! Error types for provider lifecycle and tool calls
//!
//! Every failure the manager or a connection can produce is surfaced to the
//! direct caller as a [`ProtocolError`]. Nothing is swallowed inside the core.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// Errors that can occur while starting, calling, or stopping a provider
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The provider is configured with `enabled: false`
    #[error("provider '{0}' is disabled")]
    ProviderDisabled(String),

    /// No configuration (or no registered connection, for stop) under this name
    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    /// A call was routed to a provider that has not been started
    #[error("provider '{0}' is not started")]
    ProviderNotStarted(String),

    /// The initialize/initialized exchange did not complete
    #[error("handshake with provider '{provider}' failed: {reason}")]
    HandshakeFailed {
        /// Provider name
        provider: String,
        /// What went wrong
        reason: String,
    },

    /// The connection exists but is not usable (closed, or its process exited)
    #[error("connection to provider '{0}' is not active")]
    NotActive(String),

    /// No response arrived before the per-call deadline
    #[error("tool '{tool}' on provider '{provider}' timed out after {timeout:?}")]
    CallTimeout {
        /// Provider name
        provider: String,
        /// Tool name
        tool: String,
        /// The deadline that was exceeded
        timeout: Duration,
    },

    /// The provider answered with a JSON-RPC error object
    #[error("provider error {code}: {message}")]
    ProviderError {
        /// JSON-RPC error code
        code: i64,
        /// Human readable message
        message: String,
        /// Optional structured detail
        data: Option<Value>,
    },

    /// The provider process could not be launched
    #[error("failed to spawn '{command}': {source}")]
    ProcessSpawnFailed {
        /// Command that was executed
        command: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// The provider's output stream ended while a response was awaited
    #[error("output stream of provider '{0}' closed")]
    StreamClosed(String),

    /// Writing to the provider's input stream failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A request could not be serialized
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Whether a retry policy may reasonably try the call again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProtocolError::CallTimeout { .. } | ProtocolError::StreamClosed(_)
        )
    }
}

/// Result type alias for provider operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;
