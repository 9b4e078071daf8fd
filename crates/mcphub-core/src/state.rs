//! Server snapshots and the capability descriptors they carry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a downstream server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    /// Enabled but not connected, and not trying to connect.
    Idle,
    /// Transport open and handshake in flight.
    Connecting,
    /// Handshake done; capabilities available.
    Connected,
    /// Waiting out a backoff delay before the next connection attempt.
    Reconnecting,
    /// Disabled in configuration; no transport is held.
    Disabled,
    /// Non-recoverable failure; no automatic retries until config changes.
    Failed,
}

impl ServerStatus {
    /// Lowercase wire name, identical to the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Disabled => "disabled",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The channel used to reach a downstream server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// A spawned local subprocess speaking over stdin/stdout.
    Stdio,
    /// A remote endpoint speaking streamable HTTP.
    Http,
    /// A transport type the hub does not implement.
    Unsupported,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stdio => "stdio",
            Self::Http => "http",
            Self::Unsupported => "unsupported",
        })
    }
}

/// A tool advertised by a server (`tools/list`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Tool name, unique per server.
    pub name: String,
    /// Free-text description; empty when the server gave none.
    #[serde(default)]
    pub description: String,
    /// JSON Schema of the arguments.
    #[serde(default = "default_input_schema")]
    pub input_schema: serde_json::Value,
    /// Behaviour hints, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<serde_json::Value>,
}

fn default_input_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

/// A resource advertised by a server (`resources/list`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    /// Resource address.
    pub uri: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Free-text description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Content type, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// One argument accepted by a prompt template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptArgument {
    /// Argument name.
    pub name: String,
    /// Free-text description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether callers must supply it.
    #[serde(default)]
    pub required: bool,
}

/// A prompt template advertised by a server (`prompts/list`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptDescriptor {
    /// Prompt name, unique per server.
    pub name: String,
    /// Free-text description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Template arguments.
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
}

/// Everything a connected server advertises.
///
/// Always replaced as a whole; counts are derived from the sequences.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    /// From `tools/list`.
    pub tools: Vec<ToolDescriptor>,
    /// From `resources/list`.
    pub resources: Vec<ResourceDescriptor>,
    /// From `prompts/list`.
    pub prompts: Vec<PromptDescriptor>,
}

impl Capabilities {
    /// Returns `true` when the server advertises nothing.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty() && self.resources.is_empty() && self.prompts.is_empty()
    }
}

/// Name and version reported by a server during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Implementation name.
    pub name: String,
    /// Implementation version; empty when not reported.
    #[serde(default)]
    pub version: String,
}

/// Immutable snapshot of one downstream server.
///
/// Supervisors publish a fresh snapshot for every mutation; readers hold
/// `Arc<ServerState>` values and never observe a partially applied change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerState {
    /// Configured server name.
    pub name: String,
    /// Current lifecycle state.
    pub status: ServerStatus,
    /// How the server is reached.
    pub transport: TransportKind,
    /// `true` exactly when `status` is [`ServerStatus::Disabled`].
    pub disabled: bool,
    /// Advertised capabilities; empty unless connected.
    pub capabilities: Capabilities,
    /// Most recent failure, kept across transitions until the next success.
    pub last_error: Option<String>,
    /// When `status` last changed.
    pub last_transition: DateTime<Utc>,
    /// Reported during the handshake; `None` unless connected.
    pub server_info: Option<ServerInfo>,
    /// When the current connection was established.
    pub connected_at: Option<DateTime<Utc>>,
    /// Reconnect attempts since the last successful connection.
    pub reconnect_attempts: u32,
}

impl ServerState {
    /// Creates the initial snapshot for a server.
    pub fn new(name: impl Into<String>, transport: TransportKind, status: ServerStatus) -> Self {
        Self {
            name: name.into(),
            status,
            transport,
            disabled: status == ServerStatus::Disabled,
            capabilities: Capabilities::default(),
            last_error: None,
            last_transition: Utc::now(),
            server_info: None,
            connected_at: None,
            reconnect_attempts: 0,
        }
    }

    /// Returns a copy moved to `status`, stamped with the transition time.
    ///
    /// Leaving `Connected` clears the capability cache and the server info so
    /// that readers never see capabilities for a server that is not connected.
    pub fn transition(&self, status: ServerStatus) -> Self {
        let mut next = self.clone();
        next.status = status;
        next.disabled = status == ServerStatus::Disabled;
        next.last_transition = Utc::now();
        if status != ServerStatus::Connected {
            next.capabilities = Capabilities::default();
            next.server_info = None;
            next.connected_at = None;
        }
        next
    }

    /// Whether the server currently holds an established connection.
    pub fn is_connected(&self) -> bool {
        self.status == ServerStatus::Connected
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_names() {
        let json = serde_json::to_string(&ServerStatus::Reconnecting).unwrap();
        assert_eq!(json, "\"reconnecting\"");
        assert_eq!(ServerStatus::Disabled.to_string(), "disabled");
    }

    #[test]
    fn test_transition_out_of_connected_drops_capabilities() {
        let mut state = ServerState::new("a", TransportKind::Stdio, ServerStatus::Connecting)
            .transition(ServerStatus::Connected);
        state.capabilities.tools.push(ToolDescriptor {
            name: "read".into(),
            description: String::new(),
            input_schema: serde_json::json!({}),
            annotations: None,
        });
        let next = state.transition(ServerStatus::Reconnecting);
        assert!(next.capabilities.is_empty());
        assert!(next.last_transition >= state.last_transition);
        assert_eq!(state.capabilities.tools.len(), 1);
    }

    #[test]
    fn test_disabled_flag_tracks_status() {
        let state = ServerState::new("b", TransportKind::Http, ServerStatus::Disabled);
        assert!(state.disabled);
        assert!(!state.transition(ServerStatus::Idle).disabled);
    }

    #[test]
    fn test_tool_descriptor_parses_wire_format() {
        let tool: ToolDescriptor = serde_json::from_str(
            r#"{"name":"read_file","description":"Read a file","inputSchema":{"type":"object"}}"#,
        )
        .unwrap();
        assert_eq!(tool.name, "read_file");
        assert_eq!(tool.input_schema["type"], "object");

        let bare: ToolDescriptor = serde_json::from_str(r#"{"name":"noop"}"#).unwrap();
        assert_eq!(bare.description, "");
        assert_eq!(bare.input_schema["type"], "object");
    }
}
