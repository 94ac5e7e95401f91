//! Tool call results, errors, and timing

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use toolhost::error::ProtocolError;
use toolhost::mcp::{ToolCallResult, RETRY_BACKOFF};

use crate::helpers::{pid_of, started};

#[tokio::test]
async fn test_echo_returns_arguments() {
    let manager = started().await;
    let args = json!({"query": "crispr", "nested": {"ids": [1, 2, 3]}});
    let result = manager.call_tool("echo", "echo", args.clone()).await.unwrap();
    assert_eq!(result, args);
    manager.close().await.unwrap();
}

#[tokio::test]
async fn test_provider_error_is_returned() {
    let manager = started().await;
    match manager.call_tool("echo", "fail", json!({})).await {
        Err(ProtocolError::ProviderError {
            code,
            message,
            data,
        }) => {
            assert_eq!(code, -32000);
            assert_eq!(message, "tool failed");
            assert_eq!(data, Some(json!({"tool": "fail"})));
        }
        other => panic!("unexpected: {:?}", other),
    }

    let err = manager
        .call_tool("echo", "no_such_tool", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::ProviderError { code: -32601, .. }));

    // The connection survives tool errors
    assert_eq!(manager.list_active().await, vec!["echo"]);
    manager.close().await.unwrap();
}

#[tokio::test]
async fn test_noise_does_not_break_calls() {
    let manager = started().await;
    let result = manager.call_tool("echo", "noise", json!({})).await.unwrap();
    let parsed = ToolCallResult::from_value(&result).unwrap();
    assert!(!parsed.is_error);
    assert_eq!(parsed.summary_text(100), Some("done".to_string()));
    manager.close().await.unwrap();
}

#[tokio::test]
async fn test_timeout_boundary() {
    let manager = started().await;
    let pid = pid_of(&manager, "echo").await;

    let start = Instant::now();
    let err = manager
        .call_tool("echo", "hang", json!({}))
        .await
        .unwrap_err();
    let elapsed = start.elapsed();

    assert!(matches!(err, ProtocolError::CallTimeout { .. }), "{:?}", err);
    assert!(elapsed >= Duration::from_secs(1), "returned early: {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(1500), "returned late: {:?}", elapsed);

    // The process is left running and still answers
    assert_eq!(pid_of(&manager, "echo").await, pid);
    let result = manager
        .call_tool("echo", "echo", json!({"after": "timeout"}))
        .await
        .unwrap();
    assert_eq!(result, json!({"after": "timeout"}));
    manager.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_calls_get_their_own_results() {
    let manager = Arc::new(started().await);

    let handles: Vec<_> = (0..8)
        .map(|n| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                let result = manager
                    .call_tool("echo", "echo", json!({"n": n}))
                    .await
                    .unwrap();
                (n, result)
            })
        })
        .collect();

    for handle in handles {
        let (n, result) = handle.await.unwrap();
        assert_eq!(result, json!({"n": n}));
    }

    let count = manager
        .call_tool("echo", "call_count", json!({}))
        .await
        .unwrap();
    assert_eq!(count, json!(9));
    manager.close().await.unwrap();
}

#[tokio::test]
async fn test_calls_to_different_providers_run_in_parallel() {
    let manager = Arc::new(started().await);
    manager.start_server("second").await.unwrap();

    let start = Instant::now();
    let slow = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            manager
                .call_tool("echo", "sleep", json!({"ms": 600}))
                .await
        })
    };
    let other = manager
        .call_tool("second", "echo", json!({"fast": true}))
        .await
        .unwrap();
    assert_eq!(other, json!({"fast": true}));
    assert!(start.elapsed() < Duration::from_millis(500));

    slow.await.unwrap().unwrap();
    manager.close().await.unwrap();
}

#[tokio::test]
async fn test_retry_restarts_lost_provider() {
    let manager = started().await;
    let first_pid = pid_of(&manager, "echo").await;

    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("crashed");
    let args = json!({"marker": marker.to_str().unwrap()});

    let result = manager
        .call_tool_with_retry("echo", "exit_once", args.clone())
        .await
        .unwrap();
    assert_eq!(result, args);
    assert!(marker.exists());
    assert_ne!(pid_of(&manager, "echo").await, first_pid);
    manager.close().await.unwrap();
}

#[tokio::test]
async fn test_retry_gives_up_after_budget() {
    let manager = started().await;

    let start = Instant::now();
    let err = manager
        .call_tool_with_retry("echo", "hang", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::CallTimeout { .. }));
    // One call plus two retries, each waiting out the timeout and backoff
    assert!(start.elapsed() >= Duration::from_secs(3) + RETRY_BACKOFF * 2);
    manager.close().await.unwrap();
}

#[tokio::test]
async fn test_retry_does_not_repeat_tool_errors() {
    let manager = started().await;

    let start = Instant::now();
    let err = manager
        .call_tool_with_retry("echo", "fail", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, ProtocolError::ProviderError { .. }));
    assert!(start.elapsed() < RETRY_BACKOFF);

    let count = manager
        .call_tool("echo", "call_count", json!({}))
        .await
        .unwrap();
    assert_eq!(count, json!(2), "fail was sent exactly once");
    manager.close().await.unwrap();
}
