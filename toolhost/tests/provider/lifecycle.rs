//! Provider start/stop behaviour

use serde_json::json;
use toolhost::error::ProtocolError;
use toolhost::mcp::ServerState;

use crate::helpers::{manager, pid_of, started};

#[tokio::test]
async fn test_disabled_provider_is_rejected() {
    let manager = manager();
    let err = manager.start_server("disabled").await.unwrap_err();
    assert!(matches!(err, ProtocolError::ProviderDisabled(name) if name == "disabled"));
    assert!(manager.list_active().await.is_empty());

    let status = manager.status().await;
    let disabled = status.iter().find(|s| s.name == "disabled").unwrap();
    assert_eq!(disabled.state, ServerState::Disabled);
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let manager = started().await;
    let pid = pid_of(&manager, "echo").await;
    assert!(pid.is_some());

    manager.start_server("echo").await.unwrap();
    assert_eq!(pid_of(&manager, "echo").await, pid, "no second spawn");
    assert_eq!(manager.list_active().await, vec!["echo"]);

    manager.close().await.unwrap();
}

#[tokio::test]
async fn test_stop_then_call_is_not_started() {
    let manager = started().await;
    manager.stop_server("echo").await.unwrap();

    let err = manager
        .call_tool("echo", "echo", json!({"x": 1}))
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::ProviderNotStarted(_)));

    let err = manager.stop_server("echo").await.unwrap_err();
    assert!(matches!(err, ProtocolError::UnknownProvider(_)));
}

#[tokio::test]
async fn test_provider_exiting_during_handshake() {
    let manager = manager();
    let err = manager.start_server("exits").await.unwrap_err();
    assert!(matches!(err, ProtocolError::HandshakeFailed { .. }), "{:?}", err);
    assert!(manager.list_active().await.is_empty());

    let err = manager
        .call_tool("exits", "echo", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::ProviderNotStarted(_)));
}

#[tokio::test]
async fn test_rejected_initialize() {
    let err = manager().start_server("rejects").await.unwrap_err();
    assert!(matches!(err, ProtocolError::HandshakeFailed { .. }));
    assert!(err.to_string().contains("unsupported client"), "{}", err);
}

#[tokio::test]
async fn test_missing_binary() {
    let err = manager().start_server("missing").await.unwrap_err();
    assert!(matches!(err, ProtocolError::ProcessSpawnFailed { .. }));
}

#[tokio::test]
async fn test_crash_is_detected_and_restart_replaces() {
    let manager = started().await;
    let first_pid = pid_of(&manager, "echo").await;

    let err = manager
        .call_tool("echo", "exit", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::StreamClosed(_)), "{:?}", err);

    let err = manager
        .call_tool("echo", "echo", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::NotActive(_)));
    assert!(manager.list_active().await.is_empty());

    let status = manager.status().await;
    let echo = status.iter().find(|s| s.name == "echo").unwrap();
    assert_eq!(echo.state, ServerState::Failed);

    manager.start_server("echo").await.unwrap();
    assert_ne!(pid_of(&manager, "echo").await, first_pid);
    let result = manager
        .call_tool("echo", "echo", json!({"back": true}))
        .await
        .unwrap();
    assert_eq!(result, json!({"back": true}));

    manager.close().await.unwrap();
}

#[tokio::test]
async fn test_close_stops_everything() {
    let manager = started().await;
    manager.start_server("second").await.unwrap();
    assert_eq!(manager.list_active().await, vec!["echo", "second"]);

    manager.close().await.unwrap();
    assert!(manager.list_active().await.is_empty());
    assert!(manager
        .status()
        .await
        .iter()
        .all(|s| s.state != ServerState::Running));

    // Closing an empty manager is fine
    manager.close().await.unwrap();
}
