//! MCP client session: JSON-RPC request/response correlation on top of a
//! [`Transport`].

use crate::protocol::{
    initialize_params, is_list_changed, Incoming, InitializeResult, JsonRpcError,
    JsonRpcNotification, JsonRpcReply, JsonRpcRequest, METHOD_NOT_FOUND,
};
use crate::transport::{Transport, TransportEvent};
use mcphub_core::{HubError, HubResult, LogLevel};
use mcphub_logs::LogHub;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

type Reply = Result<Value, JsonRpcError>;
/// `None` once the session has closed.
type Pending = Arc<Mutex<Option<HashMap<u64, oneshot::Sender<Reply>>>>>;

/// Something the owning supervisor needs to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The server announced a change in one of its capability lists.
    ListChanged(String),
    /// The underlying transport is gone.
    Closed(String),
}

/// A live MCP client session with one server.
pub struct McpSession {
    name: String,
    transport: Arc<dyn Transport>,
    pending: Pending,
    next_id: AtomicU64,
    request_timeout: Duration,
    reader: JoinHandle<()>,
}

impl McpSession {
    /// Start correlating frames from `events`, which must come from
    /// `transport.open()`.
    pub fn start(
        name: &str,
        transport: Arc<dyn Transport>,
        events: mpsc::Receiver<TransportEvent>,
        logs: Arc<LogHub>,
        request_timeout: Duration,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let pending: Pending = Arc::new(Mutex::new(Some(HashMap::new())));
        let (notify_tx, notify_rx) = mpsc::channel(16);

        let reader = tokio::spawn(read_loop(
            name.to_string(),
            transport.clone(),
            events,
            pending.clone(),
            notify_tx,
            logs,
            request_timeout,
        ));

        let session = Self {
            name: name.to_string(),
            transport,
            pending,
            next_id: AtomicU64::new(1),
            request_timeout,
            reader,
        };
        (session, notify_rx)
    }

    /// Send a JSON-RPC request and wait for the result.
    pub async fn request(&self, method: &str, params: Option<Value>) -> HubResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            let map = pending
                .as_mut()
                .ok_or_else(|| HubError::Transport("connection closed".into()))?;
            map.insert(id, tx);
        }

        let frame = serde_json::to_value(JsonRpcRequest::new(id, method, params))?;
        // The send shares the reply's deadline.
        let exchange = async {
            self.transport.send(frame).await?;
            rx.await.map_err(|_| {
                HubError::Transport(format!("connection closed while waiting for '{method}'"))
            })
        };

        match tokio::time::timeout(self.request_timeout, exchange).await {
            Err(_) => {
                self.forget(id);
                Err(HubError::Transport(format!(
                    "MCP request '{method}' timed out after {}s",
                    self.request_timeout.as_secs()
                )))
            }
            Ok(Err(e)) => {
                self.forget(id);
                Err(e)
            }
            Ok(Ok(Err(err))) => Err(HubError::Transport(format!(
                "server rejected '{method}': MCP error {}: {}",
                err.code, err.message
            ))),
            Ok(Ok(Ok(result))) => Ok(result),
        }
    }

    /// Send a JSON-RPC notification (no response expected).
    pub async fn notify(&self, method: &str, params: Option<Value>) -> HubResult<()> {
        let frame = serde_json::to_value(JsonRpcNotification::new(method, params))?;
        tokio::time::timeout(self.request_timeout, self.transport.send(frame))
            .await
            .map_err(|_| {
                HubError::Transport(format!(
                    "MCP notification '{method}' timed out after {}s",
                    self.request_timeout.as_secs()
                ))
            })?
    }

    /// Perform the MCP initialize handshake.
    pub async fn initialize(&self) -> HubResult<InitializeResult> {
        let result = self.request("initialize", Some(initialize_params())).await?;
        let init: InitializeResult = serde_json::from_value(result)
            .map_err(|e| HubError::Protocol(format!("Malformed initialize result: {e}")))?;

        self.notify("notifications/initialized", None).await?;
        self.transport.initialized().await?;

        debug!(
            server = %self.name,
            version = %init.protocol_version,
            "MCP server initialized"
        );
        Ok(init)
    }

    /// Keep-alive round-trip.
    pub async fn ping(&self) -> HubResult<()> {
        self.request("ping", None).await.map(|_| ())
    }

    /// The transport this session speaks over.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Close the transport and stop reading.
    pub async fn close(&self, grace: Duration) {
        self.transport.close(grace).await;
        self.reader.abort();
        self.pending.lock().take();
    }

    fn forget(&self, id: u64) {
        if let Some(map) = self.pending.lock().as_mut() {
            map.remove(&id);
        }
    }
}

impl Drop for McpSession {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop(
    name: String,
    transport: Arc<dyn Transport>,
    mut events: mpsc::Receiver<TransportEvent>,
    pending: Pending,
    notify_tx: mpsc::Sender<SessionEvent>,
    logs: Arc<LogHub>,
    send_timeout: Duration,
) {
    let reason = loop {
        let frame = match events.recv().await {
            Some(TransportEvent::Frame(frame)) => frame,
            Some(TransportEvent::Closed(reason)) => break reason,
            None => break "transport closed".to_string(),
        };

        match Incoming::classify(frame) {
            Incoming::Response { id, outcome } => {
                let waiter = pending.lock().as_mut().and_then(|map| map.remove(&id));
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(outcome);
                    }
                    None => debug!(server = %name, id, "Response for unknown request id"),
                }
            }
            Incoming::Request { id, method, .. } => {
                let reply = if method == "ping" {
                    JsonRpcReply::result(id, serde_json::json!({}))
                } else {
                    JsonRpcReply::error(id, METHOD_NOT_FOUND, format!("Method '{method}' not supported by mcp-hub"))
                };
                match serde_json::to_value(reply) {
                    Ok(frame) => match tokio::time::timeout(send_timeout, transport.send(frame)).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => debug!(server = %name, error = %e, "Failed to answer server request"),
                        Err(_) => debug!(server = %name, "Timed out answering server request"),
                    },
                    Err(e) => debug!(server = %name, error = %e, "Failed to encode reply"),
                }
            }
            Incoming::Notification { method, params } => {
                if is_list_changed(&method) {
                    // A full channel already holds a pending refresh.
                    let _ = notify_tx.try_send(SessionEvent::ListChanged(method));
                } else if method == "notifications/message" {
                    forward_server_log(&logs, &name, params.as_ref());
                } else {
                    debug!(server = %name, method = %method, "Ignoring server notification");
                }
            }
            Incoming::Invalid(why) => {
                logs.debug(&name, format!("Ignoring invalid frame: {why}"));
            }
        }
    };

    // Dropping the waiters fails every in-flight request.
    pending.lock().take();
    let _ = notify_tx.send(SessionEvent::Closed(reason)).await;
}

/// Relay an MCP `notifications/message` log entry into the hub's log.
fn forward_server_log(logs: &LogHub, name: &str, params: Option<&Value>) {
    let Some(params) = params else { return };
    let level = match params.get("level").and_then(Value::as_str).unwrap_or("info") {
        "debug" => LogLevel::Debug,
        "info" | "notice" => LogLevel::Info,
        "warning" => LogLevel::Warn,
        _ => LogLevel::Error,
    };
    let message = match params.get("data") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => return,
    };
    logs.log(level, name, message);
}
