//! Streamable-HTTP transport.
//!
//! Every outbound frame is a POST to the server URL. The reply is either a
//! plain JSON body or an SSE stream carrying one or more frames. After the
//! handshake a long-lived GET stream carries server-initiated messages when
//! the server offers one.

use super::{Transport, TransportEvent, EVENT_BUFFER};
use async_trait::async_trait;
use futures_util::StreamExt;
use indexmap::IndexMap;
use mcphub_core::{HubError, HubResult, TransportKind};
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Response, StatusCode};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const SESSION_HEADER: &str = "mcp-session-id";

/// Upper bound for an SSE frame that has not been terminated yet.
const MAX_SSE_BUFFER: usize = 4 * 1024 * 1024;

/// One `open()`..`close()` lifetime of the transport.
struct Link {
    tx: mpsc::Sender<TransportEvent>,
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl Link {
    async fn deliver(&self, frame: Value) {
        if !self.closed.load(Ordering::SeqCst) {
            let _ = self.tx.send(TransportEvent::Frame(frame)).await;
        }
    }

    /// Report the terminal failure; only the first caller gets through.
    async fn fail(&self, reason: String) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.cancel.cancel();
            let _ = self.tx.send(TransportEvent::Closed(reason)).await;
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct Shared {
    link: Option<Arc<Link>>,
    session_id: Option<String>,
}

/// MCP server reached over streamable HTTP.
pub struct HttpTransport {
    name: String,
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
    shared: Arc<Mutex<Shared>>,
}

impl HttpTransport {
    /// Validate `headers` up front; nothing is sent until `open`.
    pub fn new(
        name: &str,
        client: reqwest::Client,
        url: String,
        headers: IndexMap<String, String>,
    ) -> HubResult<Self> {
        let mut map = HeaderMap::new();
        for (key, value) in &headers {
            let key = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| HubError::Transport(format!("Invalid header name '{key}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| HubError::Transport(format!("Invalid value for header '{key}': {e}")))?;
            map.insert(key, value);
        }
        Ok(Self {
            name: name.to_string(),
            client,
            url,
            headers: map,
            shared: Arc::new(Mutex::new(Shared::default())),
        })
    }

    /// Session id assigned by the server, if any.
    pub fn session_id(&self) -> Option<String> {
        self.shared.lock().session_id.clone()
    }

    fn current(&self) -> HubResult<(Arc<Link>, Option<String>)> {
        let shared = self.shared.lock();
        match &shared.link {
            Some(link) if !link.is_closed() => Ok((link.clone(), shared.session_id.clone())),
            _ => Err(HubError::Transport(format!("'{}' is not connected", self.name))),
        }
    }

    fn request(&self, method: reqwest::Method, session_id: Option<&str>) -> reqwest::RequestBuilder {
        let mut req = self.client.request(method, &self.url).headers(self.headers.clone());
        if let Some(id) = session_id {
            req = req.header(SESSION_HEADER, id);
        }
        req
    }

    fn remember_session(&self, response: &Response) {
        if let Some(id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            let mut shared = self.shared.lock();
            if shared.session_id.as_deref() != Some(id) {
                debug!(server = %self.name, session = %id, "MCP session established");
                shared.session_id = Some(id.to_string());
            }
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn open(&self) -> HubResult<mpsc::Receiver<TransportEvent>> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let link = Arc::new(Link {
            tx,
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });
        let mut shared = self.shared.lock();
        if let Some(old) = shared.link.replace(link) {
            old.cancel.cancel();
        }
        shared.session_id = None;
        Ok(rx)
    }

    async fn send(&self, frame: Value) -> HubResult<()> {
        let (link, session_id) = self.current()?;

        let sent = self
            .request(reqwest::Method::POST, session_id.as_deref())
            .header(ACCEPT, "application/json, text/event-stream")
            .header(CONTENT_TYPE, "application/json")
            .json(&frame)
            .send()
            .await;

        let response = match sent {
            Ok(response) => response,
            Err(e) => {
                let reason = format!("POST {} failed: {e}", self.url);
                link.fail(reason.clone()).await;
                return Err(HubError::Transport(reason));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let reason = if status == StatusCode::NOT_FOUND && session_id.is_some() {
                "MCP session expired".to_string()
            } else {
                format!("server answered HTTP {status}")
            };
            link.fail(reason.clone()).await;
            return Err(HubError::Transport(reason));
        }
        self.remember_session(&response);

        if status == StatusCode::ACCEPTED {
            return Ok(());
        }

        if is_event_stream(&response) {
            // Replies may trickle in; the caller is waiting on the session.
            let link = link.clone();
            tokio::spawn(async move {
                let cancel = link.cancel.clone();
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    result = pump_sse(response, &link) => {
                        if let Err(reason) = result {
                            link.fail(reason).await;
                        }
                    }
                }
            });
            return Ok(());
        }

        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                let reason = format!("Failed to read response body: {e}");
                link.fail(reason.clone()).await;
                return Err(HubError::Transport(reason));
            }
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(());
        }
        match serde_json::from_slice::<Value>(&bytes)? {
            Value::Array(batch) => {
                for frame in batch {
                    link.deliver(frame).await;
                }
            }
            frame => link.deliver(frame).await,
        }
        Ok(())
    }

    async fn initialized(&self) -> HubResult<()> {
        let (link, session_id) = self.current()?;
        let request = self
            .request(reqwest::Method::GET, session_id.as_deref())
            .header(ACCEPT, "text/event-stream");
        let name = self.name.clone();

        tokio::spawn(async move {
            let cancel = link.cancel.clone();
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = listen(name, request, &link) => {}
            }
        });
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.current().is_ok()
    }

    async fn close(&self, grace: Duration) {
        let (link, session_id) = {
            let mut shared = self.shared.lock();
            (shared.link.take(), shared.session_id.take())
        };
        let Some(link) = link else { return };
        link.closed.store(true, Ordering::SeqCst);
        link.cancel.cancel();

        if let Some(id) = session_id {
            let delete = self
                .request(reqwest::Method::DELETE, Some(&id))
                .timeout(grace)
                .send()
                .await;
            if let Err(e) = delete {
                debug!(server = %self.name, error = %e, "Session DELETE failed");
            }
        }
    }
}

/// Run the server-initiated GET stream until it ends.
async fn listen(name: String, request: reqwest::RequestBuilder, link: &Link) {
    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            link.fail(format!("GET event stream failed: {e}")).await;
            return;
        }
    };
    let status = response.status();
    if status == StatusCode::METHOD_NOT_ALLOWED {
        debug!(server = %name, "Server offers no GET event stream");
        return;
    }
    if !status.is_success() || !is_event_stream(&response) {
        warn!(server = %name, %status, "GET event stream unavailable, continuing without it");
        return;
    }
    let reason = match pump_sse(response, link).await {
        Ok(()) => "event stream ended".to_string(),
        Err(reason) => reason,
    };
    link.fail(reason).await;
}

fn is_event_stream(response: &Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/event-stream"))
}

/// Forward every SSE `data:` payload of `response` as a frame.
async fn pump_sse(response: Response, link: &Link) -> Result<(), String> {
    let mut decoder = SseDecoder::default();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| format!("Stream read error: {e}"))?;
        for data in decoder.push(&chunk)? {
            match serde_json::from_str::<Value>(&data) {
                Ok(frame) => link.deliver(frame).await,
                Err(e) => debug!(error = %e, "Ignoring non-JSON SSE payload"),
            }
        }
    }
    Ok(())
}

/// Incremental SSE parser yielding the `data` of each complete event.
///
/// Bytes are buffered until a full line arrives, so a UTF-8 sequence split
/// across chunks is decoded intact.
#[derive(Default)]
struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, String> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut consumed = 0;
        while let Some(offset) = self.buffer[consumed..].iter().position(|&b| b == b'\n') {
            let end = consumed + offset;
            let line = String::from_utf8_lossy(&self.buffer[consumed..end]);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            consumed = end + 1;

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(self.data.join("\n"));
                    self.data.clear();
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            if let Some(data) = line.strip_prefix("data:") {
                self.data.push(data.strip_prefix(' ').unwrap_or(data).to_string());
            }
            // event:, id: and retry: carry nothing we need.
        }
        self.buffer.drain(..consumed);

        let pending = self.buffer.len() + self.data.iter().map(String::len).sum::<usize>();
        if pending > MAX_SSE_BUFFER {
            return Err("SSE event exceeds buffer limit".into());
        }
        Ok(events)
    }
}
