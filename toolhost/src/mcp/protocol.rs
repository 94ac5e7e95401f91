//! Wire protocol for provider processes
//!
//! Newline-delimited JSON-RPC 2.0 over the child's stdin/stdout. Only the
//! subset the manager needs is modelled: requests, notifications, responses,
//! and the `initialize` / `tools/call` payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC protocol version
pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol version announced during `initialize`
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Method names used by the manager
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const TOOLS_CALL: &str = "tools/call";
}

/// A request (carries an `id`, expects a response)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// A notification (no `id`, no response expected)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// A response to a previously sent request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub jsonrpc: String,
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    /// Successful response (used by the stub provider)
    pub fn success(id: u64, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Error response (used by the stub provider)
    pub fn failure(id: u64, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// One decoded line from a provider's stdout
#[derive(Debug, Clone)]
pub enum Incoming {
    /// Carries a numeric id correlating it with a request we sent
    Response(Response),
    /// No usable id: notifications, provider-initiated requests, stray objects
    OutOfBand(Option<String>),
}

impl Incoming {
    /// Decode one line.
    ///
    /// Anything with a numeric `id` and no `method` is a response; anything
    /// else that is valid JSON is out-of-band. Invalid JSON is an error the
    /// reader logs and skips.
    pub fn decode(line: &str) -> Result<Self, serde_json::Error> {
        let raw: Value = serde_json::from_str(line)?;

        let method = raw.get("method").and_then(Value::as_str).map(str::to_string);
        let has_numeric_id = raw.get("id").is_some_and(Value::is_u64);

        if method.is_none() && has_numeric_id {
            let response: Response = serde_json::from_value(raw)?;
            Ok(Self::Response(response))
        } else {
            Ok(Self::OutOfBand(method))
        }
    }
}

/// `initialize` parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: Value,
    pub client_info: ClientInfo,
}

/// Caller identity sent during `initialize`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl InitializeParams {
    /// Parameters identifying this crate, requesting the tools capability
    pub fn for_client() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: serde_json::json!({ "tools": {} }),
            client_info: ClientInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}

/// `tools/call` parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    pub arguments: Value,
}

/// Typed view over a `tools/call` result payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    #[serde(default)]
    pub content: Vec<ToolContent>,
    #[serde(default)]
    pub is_error: bool,
}

/// Content from a tool call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolContent {
    #[serde(rename = "type", default)]
    pub content_type: String,
    #[serde(default)]
    pub text: Option<String>,
}

impl ToolCallResult {
    /// Interpret an opaque result; `None` if it is not content-shaped
    pub fn from_value(value: &Value) -> Option<Self> {
        value.get("content")?;
        serde_json::from_value(value.clone()).ok()
    }

    /// First text block, truncated to `max_chars` characters
    pub fn summary_text(&self, max_chars: usize) -> Option<String> {
        let text = self.content.iter().find_map(|c| c.text.as_deref())?;
        if text.chars().count() > max_chars {
            let truncated: String = text.chars().take(max_chars).collect();
            Some(format!("{}...", truncated))
        } else {
            Some(text.to_string())
        }
    }
}
