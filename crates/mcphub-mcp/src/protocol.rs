//! MCP (Model Context Protocol) JSON-RPC 2.0 message types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol revision requested during the handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC "method not found" error code.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Correlates the reply.
    pub id: u64,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// A `"2.0"` request.
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 notification (a request without an id).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Notification name.
    pub method: String,
    /// Notification parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// A `"2.0"` notification.
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// JSON-RPC error code.
    pub code: i64,
    /// Short description.
    pub message: String,
    /// Extra detail, passed through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Reply sent back to a server-initiated request.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcReply {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// The id of the request being answered, echoed verbatim.
    pub id: Value,
    /// Set on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Set on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcReply {
    /// A successful reply.
    pub fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    /// An error reply.
    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// An inbound frame, classified by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Answer to one of our requests.
    Response {
        /// Id of the request being answered.
        id: u64,
        /// `result` or `error`.
        outcome: Result<Value, JsonRpcError>,
    },
    /// Request initiated by the server.
    Request {
        /// Echoed back in our reply.
        id: Value,
        /// Requested method.
        method: String,
        /// Method parameters.
        params: Option<Value>,
    },
    /// Notification initiated by the server.
    Notification {
        /// Notification name.
        method: String,
        /// Notification parameters.
        params: Option<Value>,
    },
    /// Anything that is not a JSON-RPC 2.0 message we understand.
    Invalid(String),
}

impl Incoming {
    /// Classify a decoded JSON frame.
    pub fn classify(frame: Value) -> Self {
        let Value::Object(mut obj) = frame else {
            return Self::Invalid("frame is not a JSON object".into());
        };

        let method = obj.remove("method");
        let id = obj.remove("id").filter(|id| !id.is_null());

        match (method, id) {
            (Some(Value::String(method)), Some(id)) => Self::Request {
                id,
                method,
                params: obj.remove("params"),
            },
            (Some(Value::String(method)), None) => Self::Notification {
                method,
                params: obj.remove("params"),
            },
            (Some(_), _) => Self::Invalid("'method' is not a string".into()),
            (None, Some(id)) => {
                let Some(id) = id.as_u64() else {
                    return Self::Invalid(format!("response id {id} was not issued by the hub"));
                };
                if let Some(error) = obj.remove("error") {
                    match serde_json::from_value::<JsonRpcError>(error) {
                        Ok(error) => Self::Response {
                            id,
                            outcome: Err(error),
                        },
                        Err(e) => Self::Invalid(format!("malformed error object: {e}")),
                    }
                } else {
                    Self::Response {
                        id,
                        outcome: Ok(obj.remove("result").unwrap_or(Value::Null)),
                    }
                }
            }
            (None, None) => Self::Invalid("frame has neither 'method' nor 'id'".into()),
        }
    }
}

/// MCP server capabilities from the `initialize` response.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServerCapabilities {
    /// Present when the server offers `tools/list`.
    #[serde(default)]
    pub tools: Option<Value>,
    /// Present when the server offers `resources/list`.
    #[serde(default)]
    pub resources: Option<Value>,
    /// Present when the server offers `prompts/list`.
    #[serde(default)]
    pub prompts: Option<Value>,
}

/// MCP initialize response.
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    /// Revision the server agreed to.
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Which capability lists to fetch.
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    /// Implementation name and version.
    #[serde(default, rename = "serverInfo")]
    pub server_info: Option<mcphub_core::ServerInfo>,
}

/// Parameters of our `initialize` request.
pub fn initialize_params() -> Value {
    serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": "mcp-hub",
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

/// Whether a server notification announces a change in one of its lists.
pub fn is_list_changed(method: &str) -> bool {
    matches!(
        method,
        "notifications/tools/list_changed"
            | "notifications/resources/list_changed"
            | "notifications/prompts/list_changed"
    )
}
