//! Per-server connection supervisor.
//!
//! Each configured server gets one tokio task that owns its transport, its
//! MCP session and its registry entry. All transitions for a server happen
//! in that task, one at a time; the rest of the hub talks to it through a
//! bounded command channel.

use crate::aggregator::fetch_capabilities;
use crate::backoff::Backoff;
use crate::protocol::InitializeResult;
use crate::registry::StateWriter;
use crate::session::{McpSession, SessionEvent};
use crate::transport::{Transport, TransportFactory};
use chrono::Utc;
use futures_util::future::{BoxFuture, FutureExt};
use mcphub_config::{ServerConfigEntry, TransportSpec};
use mcphub_core::{Capabilities, HubError, HubResult, ServerState, ServerStatus};
use mcphub_logs::LogHub;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Supervisor tuning.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Bounds the handshake and every individual request.
    pub handshake_timeout: Duration,
    /// First reconnect delay.
    pub backoff_base: Duration,
    /// Longest reconnect delay.
    pub backoff_cap: Duration,
    /// How long a transport gets to shut down before it is killed.
    pub close_grace: Duration,
    /// Keep-alive ping period while connected. Zero disables pings.
    pub ping_interval: Duration,
    /// Queued commands per supervisor before senders wait.
    pub command_buffer: usize,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(30),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(60),
            close_grace: Duration::from_secs(5),
            ping_interval: Duration::from_secs(30),
            command_buffer: 32,
        }
    }
}

/// Control signals accepted by a supervisor.
#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorCommand {
    /// Clear the disabled flag and connect. No-op when already connecting
    /// or connected.
    Enable,
    /// Close the transport and stay `Idle` until the next `Enable`.
    Stop,
    /// Close the transport and park in `Disabled`.
    Disable,
    /// Re-run capability discovery, or retry a failed server.
    Refresh,
    /// The configuration entry changed on disk.
    Reconfigure(ServerConfigEntry),
}

/// Initial snapshot for an entry.
pub fn initial_state(entry: &ServerConfigEntry) -> ServerState {
    let kind = entry.transport.kind();
    if entry.disabled {
        return ServerState::new(&entry.name, kind, ServerStatus::Disabled);
    }
    match &entry.transport {
        TransportSpec::Unsupported { kind: declared } => {
            let mut state = ServerState::new(&entry.name, kind, ServerStatus::Failed);
            state.last_error = Some(unsupported_message(declared));
            state
        }
        _ => ServerState::new(&entry.name, kind, ServerStatus::Idle),
    }
}

fn unsupported_message(declared: &str) -> String {
    format!("transport type '{declared}' is not supported")
}

/// Handle to a running supervisor task.
pub struct SupervisorHandle {
    name: String,
    commands: mpsc::Sender<SupervisorCommand>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SupervisorHandle {
    /// Supervised server.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a command. Fails only when the supervisor has already stopped.
    pub async fn send(&self, command: SupervisorCommand) -> HubResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| HubError::ShuttingDown)
    }

    /// Cancel the supervisor and wait for it to close its transport.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            if e.is_panic() {
                tracing::error!(server = %self.name, "Supervisor task panicked");
            }
        }
    }

    /// Cancel without waiting.
    pub fn abort(&self) {
        self.cancel.cancel();
    }
}

/// Start supervising `entry`. `writer` must come from registering
/// [`initial_state`] for the same entry.
pub fn spawn(
    entry: ServerConfigEntry,
    writer: StateWriter,
    factory: Arc<dyn TransportFactory>,
    logs: Arc<LogHub>,
    settings: SupervisorSettings,
    parent: &CancellationToken,
) -> SupervisorHandle {
    let (tx, rx) = mpsc::channel(settings.command_buffer.max(1));
    let cancel = parent.child_token();
    let name = entry.name.clone();

    let supervisor = Supervisor {
        backoff: Backoff::new(settings.backoff_base, settings.backoff_cap),
        entry,
        writer,
        factory,
        logs,
        settings,
        cancel: cancel.clone(),
    };
    let task = tokio::spawn(supervisor.run(rx));

    SupervisorHandle {
        name,
        commands: tx,
        cancel,
        task,
    }
}

/// A completed handshake.
struct Connection {
    session: Arc<McpSession>,
    events: mpsc::Receiver<SessionEvent>,
    init: InitializeResult,
}

enum Flow {
    Continue,
    Exit,
}

/// Server round-trips made while connected.
enum Check {
    Ping,
    Refresh,
}

enum CheckOutcome {
    Alive,
    Refreshed(Capabilities),
}

type CheckFuture = BoxFuture<'static, HubResult<CheckOutcome>>;

impl Check {
    /// Run against `conn` without borrowing it, so the supervisor keeps
    /// serving commands while the server answers.
    fn start(self, conn: &Connection) -> CheckFuture {
        let session = conn.session.clone();
        match self {
            Check::Ping => async move {
                session
                    .ping()
                    .await
                    .map(|()| CheckOutcome::Alive)
                    .map_err(|e| HubError::Transport(format!("keep-alive ping failed: {e}")))
            }
            .boxed(),
            Check::Refresh => {
                let advertised = conn.init.capabilities.clone();
                async move {
                    fetch_capabilities(session.as_ref(), &advertised)
                        .await
                        .map(CheckOutcome::Refreshed)
                }
                .boxed()
            }
        }
    }
}

/// Resolve the in-flight check, or never when there is none.
async fn next_check(inflight: &mut Option<CheckFuture>) -> HubResult<CheckOutcome> {
    match inflight {
        Some(check) => check.await,
        None => std::future::pending().await,
    }
}

struct Supervisor {
    entry: ServerConfigEntry,
    writer: StateWriter,
    factory: Arc<dyn TransportFactory>,
    logs: Arc<LogHub>,
    settings: SupervisorSettings,
    cancel: CancellationToken,
    backoff: Backoff,
}

impl Supervisor {
    async fn run(mut self, mut commands: mpsc::Receiver<SupervisorCommand>) {
        if self.status() == ServerStatus::Idle {
            self.transition(ServerStatus::Connecting);
        }

        let mut conn: Option<Connection> = None;
        loop {
            let flow = match self.status() {
                ServerStatus::Connecting => self.connecting(&mut commands, &mut conn).await,
                ServerStatus::Connected => match conn.take() {
                    Some(c) => self.connected(&mut commands, c).await,
                    None => {
                        self.transition(ServerStatus::Reconnecting);
                        Flow::Continue
                    }
                },
                ServerStatus::Reconnecting => self.reconnecting(&mut commands).await,
                ServerStatus::Idle | ServerStatus::Disabled | ServerStatus::Failed => {
                    self.parked(&mut commands).await
                }
            };
            if let Flow::Exit = flow {
                break;
            }
        }

        if let Some(c) = conn.take() {
            c.session.close(self.settings.close_grace).await;
        }
        tracing::debug!(server = %self.entry.name, "Supervisor stopped");
    }

    fn status(&self) -> ServerStatus {
        self.writer.current().status
    }

    fn name(&self) -> &str {
        &self.entry.name
    }

    fn transition(&self, status: ServerStatus) {
        self.publish(status, None);
    }

    fn transition_with_error(&self, status: ServerStatus, error: String) {
        self.publish(status, Some(error));
    }

    /// Publish one snapshot moved to `status`.
    fn publish(&self, status: ServerStatus, error: Option<String>) {
        let previous = self.status();
        let attempts = self.backoff.attempts();
        self.writer.update(|s| {
            let mut next = s.transition(status);
            next.reconnect_attempts = attempts;
            if error.is_some() {
                next.last_error = error;
            }
            next
        });
        if previous != status {
            self.logs.debug(self.name(), format!("{previous} -> {status}"));
        }
    }

    /// Unrecoverable problem: park until config changes or an explicit retry.
    fn fail(&self, error: &HubError) {
        self.logs.error(self.name(), format!("Failed: {error}"));
        self.transition_with_error(ServerStatus::Failed, error.to_string());
    }

    /// Whether `command` must tear down whatever is live right now.
    fn disrupts(&self, command: &SupervisorCommand) -> bool {
        match command {
            SupervisorCommand::Stop | SupervisorCommand::Disable => true,
            SupervisorCommand::Reconfigure(entry) => {
                entry.disabled || entry.transport_differs(&self.entry)
            }
            SupervisorCommand::Enable | SupervisorCommand::Refresh => false,
        }
    }

    /// Apply a command once nothing is live any more.
    fn apply(&mut self, command: SupervisorCommand) {
        let status = self.status();
        match command {
            SupervisorCommand::Enable => {
                self.entry.disabled = false;
                if matches!(
                    status,
                    ServerStatus::Idle
                        | ServerStatus::Disabled
                        | ServerStatus::Failed
                        | ServerStatus::Reconnecting
                ) {
                    self.start_connecting();
                }
            }
            SupervisorCommand::Stop => {
                if status != ServerStatus::Disabled {
                    self.logs.info(self.name(), "Stopped");
                    self.backoff.reset();
                    self.transition(ServerStatus::Idle);
                }
            }
            SupervisorCommand::Disable => {
                self.entry.disabled = true;
                self.backoff.reset();
                if status != ServerStatus::Disabled {
                    self.logs.info(self.name(), "Disabled");
                    self.transition(ServerStatus::Disabled);
                }
            }
            SupervisorCommand::Refresh => {
                if matches!(status, ServerStatus::Failed | ServerStatus::Reconnecting) {
                    self.start_connecting();
                }
            }
            SupervisorCommand::Reconfigure(entry) => {
                let changed = entry.transport_differs(&self.entry);
                let was_disabled = self.entry.disabled;
                self.entry = entry;
                if self.entry.disabled {
                    if status != ServerStatus::Disabled {
                        self.logs.info(self.name(), "Disabled by configuration");
                        self.backoff.reset();
                        self.transition(ServerStatus::Disabled);
                    }
                } else if changed
                    || was_disabled
                    || matches!(status, ServerStatus::Failed | ServerStatus::Disabled)
                {
                    self.logs.info(self.name(), "Configuration changed, reconnecting");
                    self.start_connecting();
                }
            }
        }
    }

    fn start_connecting(&mut self) {
        self.backoff.reset();
        let kind = self.entry.transport.kind();
        self.writer.update(|s| {
            let mut next = s.clone();
            next.transport = kind;
            next
        });
        if self.status() != ServerStatus::Idle {
            self.transition(ServerStatus::Idle);
        }
        self.transition(ServerStatus::Connecting);
    }

    async fn parked(&mut self, commands: &mut mpsc::Receiver<SupervisorCommand>) -> Flow {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Flow::Exit,
            command = commands.recv() => match command {
                Some(command) => {
                    self.apply(command);
                    Flow::Continue
                }
                None => Flow::Exit,
            },
        }
    }

    async fn connecting(
        &mut self,
        commands: &mut mpsc::Receiver<SupervisorCommand>,
        conn: &mut Option<Connection>,
    ) -> Flow {
        if let TransportSpec::Unsupported { kind } = &self.entry.transport {
            let message = unsupported_message(kind);
            self.logs.error(self.name(), message.clone());
            self.transition_with_error(ServerStatus::Failed, message);
            return Flow::Continue;
        }
        let transport = match self.factory.create(&self.entry) {
            Ok(transport) => transport,
            Err(e) => {
                self.fail(&e);
                return Flow::Continue;
            }
        };

        self.logs.info(self.name(), "Connecting");
        let attempt = handshake(
            self.entry.name.clone(),
            transport.clone(),
            self.logs.clone(),
            self.settings.handshake_timeout,
        );
        tokio::pin!(attempt);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    transport.close(self.settings.close_grace).await;
                    return Flow::Exit;
                }
                command = commands.recv() => {
                    let Some(command) = command else {
                        transport.close(self.settings.close_grace).await;
                        return Flow::Exit;
                    };
                    if self.disrupts(&command) {
                        transport.close(self.settings.close_grace).await;
                        self.apply(command);
                        return Flow::Continue;
                    }
                    if let SupervisorCommand::Reconfigure(entry) = command {
                        self.entry = entry;
                    }
                }
                result = &mut attempt => {
                    match result {
                        Ok((connection, caps)) => {
                            self.publish_connected(&connection.init, caps);
                            *conn = Some(connection);
                        }
                        Err(e) => {
                            transport.close(self.settings.close_grace).await;
                            if matches!(e, HubError::Protocol(_)) {
                                self.fail(&e);
                            } else {
                                self.logs.error(self.name(), format!("Connection failed: {e}"));
                                self.transition_with_error(ServerStatus::Reconnecting, e.to_string());
                            }
                        }
                    }
                    return Flow::Continue;
                }
            }
        }
    }

    fn publish_connected(&mut self, init: &InitializeResult, caps: Capabilities) {
        self.backoff.reset();
        let summary = format!(
            "Connected ({} tools, {} resources, {} prompts)",
            caps.tools.len(),
            caps.resources.len(),
            caps.prompts.len()
        );
        let server_info = init.server_info.clone();
        let previous = self.status();
        self.writer.update(|s| {
            let mut next = s.transition(ServerStatus::Connected);
            next.capabilities = caps;
            next.server_info = server_info;
            next.connected_at = Some(Utc::now());
            next.last_error = None;
            next.reconnect_attempts = 0;
            next
        });
        self.logs.debug(
            self.name(),
            format!("{previous} -> {}", ServerStatus::Connected),
        );
        self.logs.info(self.name(), summary);
    }

    async fn connected(
        &mut self,
        commands: &mut mpsc::Receiver<SupervisorCommand>,
        mut conn: Connection,
    ) -> Flow {
        let pinging = !self.settings.ping_interval.is_zero();
        let period = if pinging {
            self.settings.ping_interval
        } else {
            Duration::from_secs(3600)
        };
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // At most one check talks to the server at a time; a refresh asked
        // for meanwhile runs right after it.
        let mut inflight: Option<CheckFuture> = None;
        let mut refresh_queued = false;

        loop {
            if inflight.is_none() && refresh_queued {
                refresh_queued = false;
                inflight = Some(Check::Refresh.start(&conn));
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    conn.session.close(self.settings.close_grace).await;
                    return Flow::Exit;
                }
                command = commands.recv() => {
                    let Some(command) = command else {
                        conn.session.close(self.settings.close_grace).await;
                        return Flow::Exit;
                    };
                    if self.disrupts(&command) {
                        conn.session.close(self.settings.close_grace).await;
                        self.apply(command);
                        return Flow::Continue;
                    }
                    match command {
                        SupervisorCommand::Refresh => refresh_queued = true,
                        SupervisorCommand::Reconfigure(entry) => self.entry = entry,
                        _ => {}
                    }
                }
                event = conn.events.recv() => match event {
                    Some(SessionEvent::ListChanged(method)) => {
                        self.logs.debug(self.name(), format!("Server sent {method}"));
                        refresh_queued = true;
                    }
                    Some(SessionEvent::Closed(reason)) => {
                        return self.lost(conn, HubError::Transport(reason)).await;
                    }
                    None => {
                        return self.lost(conn, HubError::Transport("session ended".into())).await;
                    }
                },
                outcome = next_check(&mut inflight) => {
                    inflight = None;
                    match outcome {
                        Ok(CheckOutcome::Alive) => {}
                        Ok(CheckOutcome::Refreshed(caps)) => self.publish_capabilities(caps),
                        Err(e) => return self.lost(conn, e).await,
                    }
                }
                _ = ticker.tick(), if pinging && inflight.is_none() => {
                    inflight = Some(Check::Ping.start(&conn));
                }
            }
        }
    }

    /// Publish re-fetched capabilities without leaving `Connected`.
    fn publish_capabilities(&mut self, caps: Capabilities) {
        self.logs.info(
            self.name(),
            format!(
                "Capabilities refreshed ({} tools, {} resources, {} prompts)",
                caps.tools.len(),
                caps.resources.len(),
                caps.prompts.len()
            ),
        );
        self.writer.update(|s| {
            let mut next = s.clone();
            next.capabilities = caps;
            next
        });
    }

    /// An established connection went away.
    async fn lost(&mut self, conn: Connection, error: HubError) -> Flow {
        conn.session.close(self.settings.close_grace).await;
        if matches!(error, HubError::Protocol(_)) {
            self.fail(&error);
        } else {
            self.logs
                .error(self.name(), format!("Connection lost: {error}"));
            self.transition_with_error(ServerStatus::Reconnecting, error.to_string());
        }
        Flow::Continue
    }

    async fn reconnecting(&mut self, commands: &mut mpsc::Receiver<SupervisorCommand>) -> Flow {
        let delay = self.backoff.next_delay();
        let attempt = self.backoff.attempts();
        self.writer.update(|s| {
            let mut next = s.clone();
            next.reconnect_attempts = attempt;
            next
        });
        self.logs.info(
            self.name(),
            format!("Reconnecting in {}ms (attempt {attempt})", delay.as_millis()),
        );

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Flow::Exit,
                command = commands.recv() => {
                    let Some(command) = command else { return Flow::Exit };
                    let retry_now = matches!(command, SupervisorCommand::Enable | SupervisorCommand::Refresh);
                    if retry_now || self.disrupts(&command) {
                        self.apply(command);
                        return Flow::Continue;
                    }
                    if let SupervisorCommand::Reconfigure(entry) = command {
                        self.entry = entry;
                    }
                }
                _ = &mut sleep => {
                    self.transition(ServerStatus::Connecting);
                    return Flow::Continue;
                }
            }
        }
    }
}

/// Open the transport, run `initialize` and fetch the capability lists.
async fn handshake(
    name: String,
    transport: Arc<dyn Transport>,
    logs: Arc<LogHub>,
    timeout: Duration,
) -> HubResult<(Connection, Capabilities)> {
    let events = transport.open().await?;
    let (session, events) = McpSession::start(&name, transport, events, logs, timeout);
    let session = Arc::new(session);

    let init = tokio::time::timeout(timeout, session.initialize())
        .await
        .map_err(|_| {
            HubError::Transport(format!("handshake timed out after {}s", timeout.as_secs()))
        })??;
    let caps = fetch_capabilities(session.as_ref(), &init.capabilities).await?;

    Ok((
        Connection {
            session,
            events,
            init,
        },
        caps,
    ))
}
