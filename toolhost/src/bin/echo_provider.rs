//! Stub tool provider for integration tests
//!
//! Speaks newline-delimited JSON-RPC on stdio. Tools:
//! - `echo`, `search_echo`: return the arguments
//! - `call_count`: number of `tools/call` requests seen so far (this one included)
//! - `sleep`: answer after `{"ms": N}` milliseconds
//! - `hang`: never answer
//! - `fail`: JSON-RPC error -32000 with data
//! - `noise`: write junk and a notification before the answer
//! - `exit`: terminate without answering
//! - `exit_once`: terminate without answering unless `{"marker": PATH}` exists;
//!   creates the marker first, so the next process answers like `echo`
//!
//! Flags: `--exit-on-init` exits when `initialize` arrives, `--reject-init`
//! answers `initialize` with an error.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};

use toolhost::mcp::protocol::{Response, RpcError, PROTOCOL_VERSION};

async fn send(stdout: &mut Stdout, message: &impl serde::Serialize) -> std::io::Result<()> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    stdout.write_all(&line).await?;
    stdout.flush().await
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> std::io::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let exit_on_init = args.iter().any(|a| a == "--exit-on-init");
    let reject_init = args.iter().any(|a| a == "--reject-init");

    let mut stderr = tokio::io::stderr();
    stderr
        .write_all(format!("echo-provider {} starting\n", std::process::id()).as_bytes())
        .await?;

    let mut stdout = tokio::io::stdout();
    // Banner on stdout, as some real providers print
    stdout.write_all(b"echo-provider ready\n").await?;
    stdout.flush().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut calls: u64 = 0;

    while let Some(line) = lines.next_line().await? {
        let Ok(message) = serde_json::from_str::<Value>(&line) else {
            continue;
        };
        let method = message["method"].as_str().unwrap_or_default();
        let Some(id) = message["id"].as_u64() else {
            // Notifications need no answer
            continue;
        };

        match method {
            "initialize" => {
                if exit_on_init {
                    return Ok(());
                }
                if reject_init {
                    let error = RpcError {
                        code: -32602,
                        message: "unsupported client".to_string(),
                        data: None,
                    };
                    send(&mut stdout, &Response::failure(id, error)).await?;
                    continue;
                }
                let result = json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "echo-provider", "version": "0.1.0"}
                });
                send(&mut stdout, &Response::success(id, result)).await?;
            }
            "tools/call" => {
                calls += 1;
                let tool = message["params"]["name"].as_str().unwrap_or_default();
                let arguments = message["params"]["arguments"].clone();

                let response = match tool {
                    "echo" | "search_echo" => Response::success(id, arguments),
                    "call_count" => Response::success(id, json!(calls)),
                    "sleep" => {
                        let ms = arguments["ms"].as_u64().unwrap_or(0);
                        tokio::time::sleep(Duration::from_millis(ms)).await;
                        Response::success(id, json!({"slept_ms": ms}))
                    }
                    "hang" => continue,
                    "exit" => return Ok(()),
                    "exit_once" => {
                        let marker = arguments["marker"].as_str().unwrap_or_default();
                        if !std::path::Path::new(marker).exists() {
                            std::fs::write(marker, b"crashed")?;
                            return Ok(());
                        }
                        Response::success(id, arguments)
                    }
                    "fail" => Response::failure(
                        id,
                        RpcError {
                            code: -32000,
                            message: "tool failed".to_string(),
                            data: Some(json!({"tool": tool})),
                        },
                    ),
                    "noise" => {
                        stdout.write_all(b"not json at all\n").await?;
                        let progress = json!({
                            "jsonrpc": "2.0",
                            "method": "notifications/progress",
                            "params": {"progress": 50}
                        });
                        send(&mut stdout, &progress).await?;
                        let result = json!({
                            "content": [{"type": "text", "text": "done"}],
                            "isError": false
                        });
                        Response::success(id, result)
                    }
                    other => Response::failure(
                        id,
                        RpcError {
                            code: -32601,
                            message: format!("unknown tool: {}", other),
                            data: None,
                        },
                    ),
                };
                send(&mut stdout, &response).await?;
            }
            other => {
                let error = RpcError {
                    code: -32601,
                    message: format!("method not found: {}", other),
                    data: None,
                };
                send(&mut stdout, &Response::failure(id, error)).await?;
            }
        }
    }

    Ok(())
}
