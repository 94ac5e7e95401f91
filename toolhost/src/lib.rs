//! Supervisor for stdio tool providers
//!
//! Starts configured provider processes, performs the protocol handshake,
//! routes tool calls to them, and caches results of idempotent tools.

pub mod config;
pub mod error;
pub mod handlers;
pub mod mcp;
