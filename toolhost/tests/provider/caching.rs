//! Result cache in front of real providers

use serde_json::{json, Map, Value};

use crate::helpers::started;

#[tokio::test]
async fn test_cacheable_call_is_served_from_cache() {
    let manager = started().await;

    let count = manager
        .call_tool("echo", "call_count", json!({}))
        .await
        .unwrap();
    assert_eq!(count, json!(1));

    let first = manager
        .call_tool("echo", "search_echo", json!({"query": "rust", "limit": 5}))
        .await
        .unwrap();

    // Same content, different key order
    let mut reordered = Map::new();
    reordered.insert("limit".into(), json!(5));
    reordered.insert("query".into(), json!("rust"));
    let second = manager
        .call_tool("echo", "search_echo", Value::Object(reordered))
        .await
        .unwrap();
    assert_eq!(first, second);

    let count = manager
        .call_tool("echo", "call_count", json!({}))
        .await
        .unwrap();
    assert_eq!(count, json!(3), "the second search must not reach the provider");

    manager.close().await.unwrap();
}

#[tokio::test]
async fn test_different_arguments_miss() {
    let manager = started().await;

    manager
        .call_tool("echo", "search_echo", json!({"query": "a"}))
        .await
        .unwrap();
    manager
        .call_tool("echo", "search_echo", json!({"query": "b"}))
        .await
        .unwrap();
    assert_eq!(manager.cache().len(), 2);

    let count = manager
        .call_tool("echo", "call_count", json!({}))
        .await
        .unwrap();
    assert_eq!(count, json!(3));
    manager.close().await.unwrap();
}

#[tokio::test]
async fn test_non_cacheable_tools_bypass() {
    let manager = started().await;

    for _ in 0..3 {
        manager
            .call_tool("echo", "echo", json!({"same": true}))
            .await
            .unwrap();
    }
    assert!(manager.cache().is_empty());

    let count = manager
        .call_tool("echo", "call_count", json!({}))
        .await
        .unwrap();
    assert_eq!(count, json!(4));
    manager.close().await.unwrap();
}
