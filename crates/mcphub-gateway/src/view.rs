//! Serialized views of registry snapshots.

use chrono::{DateTime, Utc};
use mcphub_config::{ServerConfigEntry, TransportSpec};
use mcphub_core::{
    PromptDescriptor, ResourceDescriptor, ServerInfo, ServerState, ServerStatus, ToolDescriptor,
    TransportKind,
};
use serde::Serialize;

/// One server as returned by `GET /api/servers`.
///
/// Capability lists are only populated while the server is connected; the
/// counts are derived from them.
#[derive(Debug, Clone, Serialize)]
pub struct ServerView {
    /// Configured server name.
    pub name: String,
    /// Current lifecycle state.
    pub status: ServerStatus,
    /// Whether the server is parked by an explicit disable.
    pub disabled: bool,
    /// Transport the hub uses for this server.
    pub transport: TransportKind,
    /// Transport type as clients know it: the configured `type` when it
    /// names an unsupported transport, else `stdio` or `http`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Endpoint of an HTTP server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Program of a spawned server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Arguments of a spawned server.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// What the server reported about itself during the handshake.
    pub server_info: Option<ServerInfo>,
    /// Most recent failure, if any.
    pub last_error: Option<String>,
    /// When `status` last changed.
    pub last_transition: DateTime<Utc>,
    /// When the current connection was established.
    pub connected_at: Option<DateTime<Utc>>,
    /// Reconnect attempts since the last successful connection.
    pub reconnect_attempts: u32,
    /// Advertised tools.
    pub tools: Vec<ToolDescriptor>,
    /// Advertised resources.
    pub resources: Vec<ResourceDescriptor>,
    /// Advertised prompts.
    pub prompts: Vec<PromptDescriptor>,
    /// `tools.len()`
    pub tool_count: usize,
    /// `resources.len()`
    pub resource_count: usize,
    /// `prompts.len()`
    pub prompt_count: usize,
}

impl ServerView {
    /// Build a view from a snapshot plus the entry it was configured from.
    pub fn new(state: &ServerState, entry: Option<&ServerConfigEntry>) -> Self {
        let (url, command, args) = match entry.map(|e| &e.transport) {
            Some(TransportSpec::Http { url, .. }) => (Some(url.clone()), None, Vec::new()),
            Some(TransportSpec::Process { command, args, .. }) => {
                (None, Some(command.clone()), args.clone())
            }
            Some(TransportSpec::Unsupported { .. }) | None => (None, None, Vec::new()),
        };
        let kind = match entry.map(|e| &e.transport) {
            Some(TransportSpec::Unsupported { kind }) => kind.clone(),
            _ => state.transport.to_string(),
        };
        let caps = &state.capabilities;
        Self {
            name: state.name.clone(),
            status: state.status,
            disabled: state.disabled,
            transport: state.transport,
            kind,
            url,
            command,
            args,
            server_info: state.server_info.clone(),
            last_error: state.last_error.clone(),
            last_transition: state.last_transition,
            connected_at: state.connected_at,
            reconnect_attempts: state.reconnect_attempts,
            tools: caps.tools.clone(),
            resources: caps.resources.clone(),
            prompts: caps.prompts.clone(),
            tool_count: caps.tools.len(),
            resource_count: caps.resources.len(),
            prompt_count: caps.prompts.len(),
        }
    }
}

/// Compact per-server line in the health payload.
#[derive(Debug, Clone, Serialize)]
pub struct ServerSummary {
    /// Configured server name.
    pub name: String,
    /// Current lifecycle state.
    pub status: ServerStatus,
    /// Tools advertised while connected.
    pub tool_count: usize,
}

impl From<&ServerState> for ServerSummary {
    fn from(state: &ServerState) -> Self {
        Self {
            name: state.name.clone(),
            status: state.status,
            tool_count: state.capabilities.tools.len(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use mcphub_core::Capabilities;

    fn process_entry() -> ServerConfigEntry {
        ServerConfigEntry {
            name: "files".into(),
            transport: TransportSpec::Process {
                command: "npx".into(),
                args: vec!["-y".into(), "server-files".into()],
                env: Default::default(),
            },
            disabled: false,
        }
    }

    #[test]
    fn test_connected_view_carries_counts_and_command() {
        let mut state = ServerState::new("files", TransportKind::Stdio, ServerStatus::Connecting)
            .transition(ServerStatus::Connected);
        state.capabilities = Capabilities {
            tools: vec![serde_json::from_str(r#"{"name":"read"}"#).unwrap()],
            resources: Vec::new(),
            prompts: vec![serde_json::from_str(r#"{"name":"summarize"}"#).unwrap()],
        };
        let view = ServerView::new(&state, Some(&process_entry()));
        let json = serde_json::to_value(&view).unwrap();

        assert_eq!(json["status"], "connected");
        assert_eq!(json["transport"], "stdio");
        assert_eq!(json["type"], "stdio");
        assert_eq!(json["command"], "npx");
        assert!(json.get("url").is_none());
        assert_eq!(json["tool_count"], 1);
        assert_eq!(json["resource_count"], 0);
        assert_eq!(json["prompt_count"], 1);
        assert_eq!(json["tools"][0]["name"], "read");
    }

    #[test]
    fn test_http_view_exposes_url() {
        let state = ServerState::new("remote", TransportKind::Http, ServerStatus::Disabled);
        let entry = ServerConfigEntry {
            name: "remote".into(),
            transport: TransportSpec::Http {
                url: "https://example.test/mcp".into(),
                headers: Default::default(),
            },
            disabled: true,
        };
        let json = serde_json::to_value(ServerView::new(&state, Some(&entry))).unwrap();
        assert_eq!(json["url"], "https://example.test/mcp");
        assert_eq!(json["type"], "http");
        assert_eq!(json["disabled"], true);
        assert!(json.get("command").is_none());
        assert_eq!(json["tools"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_unsupported_view_reports_declared_type() {
        let state = ServerState::new("ws", TransportKind::Unsupported, ServerStatus::Failed);
        let entry = ServerConfigEntry {
            name: "ws".into(),
            transport: TransportSpec::Unsupported {
                kind: "websocket".into(),
            },
            disabled: false,
        };
        let json = serde_json::to_value(ServerView::new(&state, Some(&entry))).unwrap();
        assert_eq!(json["type"], "websocket");
        assert_eq!(json["transport"], "unsupported");
        assert_eq!(json["status"], "failed");
    }
}
