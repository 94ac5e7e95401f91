//! Status types reported by the manager

/// Lifecycle state of a configured provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Registered and active
    Running,
    /// Registered, but its process exited or the connection was lost
    Failed,
    /// Enabled but not started
    Idle,
    /// Configured with `enabled: false`
    Disabled,
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerState::Running => write!(f, "running"),
            ServerState::Failed => write!(f, "failed"),
            ServerState::Idle => write!(f, "idle"),
            ServerState::Disabled => write!(f, "disabled"),
        }
    }
}

/// Snapshot of one provider
#[derive(Debug, Clone)]
pub struct ProviderStatus {
    pub name: String,
    pub state: ServerState,
    /// Process id while registered
    pub pid: Option<u32>,
    /// Seconds since the connection was opened (0 when not registered)
    pub uptime_secs: u64,
    /// Number of tools the config advertises
    pub tool_count: usize,
}
