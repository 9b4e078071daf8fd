//! Transport abstraction over the channels a downstream server can be
//! reached through.
//!
//! A transport only moves JSON frames. Correlating requests with responses
//! is the session's job, and deciding when to reconnect is the supervisor's.

pub mod http;
pub mod stdio;

pub use http::HttpTransport;
pub use stdio::StdioTransport;

use async_trait::async_trait;
use mcphub_config::{ServerConfigEntry, TransportSpec};
use mcphub_core::{HubError, HubResult, TransportKind};
use mcphub_logs::LogHub;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Capacity of the frame channel between a transport and its session.
pub const EVENT_BUFFER: usize = 256;

/// Something that happened on an open transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// One decoded JSON-RPC frame.
    Frame(Value),
    /// The transport is gone. Sent at most once per `open`, always last.
    Closed(String),
}

/// A bidirectional JSON frame channel to one downstream server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport family, for snapshots.
    fn kind(&self) -> TransportKind;

    /// Establish the channel and return the stream of inbound events.
    ///
    /// Each call starts a fresh connection; a previous one must have been
    /// closed first.
    async fn open(&self) -> HubResult<mpsc::Receiver<TransportEvent>>;

    /// Send one outbound frame. May wait on the network; callers bound it
    /// with their own deadline.
    async fn send(&self, frame: Value) -> HubResult<()>;

    /// Called once the MCP handshake has completed.
    async fn initialized(&self) -> HubResult<()> {
        Ok(())
    }

    /// Whether the channel is currently open.
    fn is_alive(&self) -> bool;

    /// Tear the channel down, waiting at most `grace` for a clean exit.
    async fn close(&self, grace: Duration);
}

/// Builds transports for configuration entries.
pub trait TransportFactory: Send + Sync {
    /// A closed transport for `entry`; the supervisor opens it.
    fn create(&self, entry: &ServerConfigEntry) -> HubResult<Arc<dyn Transport>>;
}

/// Builds the real stdio and HTTP transports.
pub struct DefaultTransportFactory {
    logs: Arc<LogHub>,
    http: reqwest::Client,
}

impl DefaultTransportFactory {
    /// Share one HTTP client across every HTTP transport.
    pub fn new(logs: Arc<LogHub>) -> Self {
        Self {
            logs,
            http: reqwest::Client::new(),
        }
    }
}

impl TransportFactory for DefaultTransportFactory {
    fn create(&self, entry: &ServerConfigEntry) -> HubResult<Arc<dyn Transport>> {
        match &entry.transport {
            TransportSpec::Process { command, args, env } => Ok(Arc::new(StdioTransport::new(
                &entry.name,
                command.clone(),
                args.clone(),
                env.clone(),
                self.logs.clone(),
            ))),
            TransportSpec::Http { url, headers } => Ok(Arc::new(HttpTransport::new(
                &entry.name,
                self.http.clone(),
                url.clone(),
                headers.clone(),
            )?)),
            TransportSpec::Unsupported { kind } => Err(HubError::Transport(format!(
                "transport type '{kind}' is not supported"
            ))),
        }
    }
}
