//! Spawned-process transport: newline-delimited JSON-RPC over the child's
//! stdin/stdout.

use super::{Transport, TransportEvent, EVENT_BUFFER};
use async_trait::async_trait;
use indexmap::IndexMap;
use mcphub_core::{HubError, HubResult, TransportKind};
use mcphub_logs::LogHub;
use serde_json::Value;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

struct Running {
    stdin: ChildStdin,
    child: Child,
}

/// MCP server running as a local subprocess.
pub struct StdioTransport {
    name: String,
    command: String,
    args: Vec<String>,
    env: IndexMap<String, String>,
    logs: Arc<LogHub>,
    running: Mutex<Option<Running>>,
    alive: Arc<AtomicBool>,
}

impl StdioTransport {
    /// Nothing is spawned until `open`.
    pub fn new(
        name: &str,
        command: String,
        args: Vec<String>,
        env: IndexMap<String, String>,
        logs: Arc<LogHub>,
    ) -> Self {
        Self {
            name: name.to_string(),
            command,
            args,
            env,
            logs,
            running: Mutex::new(None),
            alive: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    async fn open(&self) -> HubResult<mpsc::Receiver<TransportEvent>> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(HubError::Transport(format!(
                "'{}' is already running",
                self.name
            )));
        }

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            HubError::Transport(format!("Failed to spawn '{}': {e}", self.command))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| HubError::Transport("server stdin not available".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HubError::Transport("server stdout not available".into()))?;
        let stderr = child.stderr.take();

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        self.alive.store(true, Ordering::SeqCst);

        // stdout: one JSON frame per line. This task owns the only sender,
        // so exactly one Closed is ever delivered.
        let alive = self.alive.clone();
        let logs = self.logs.clone();
        let name = self.name.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let reason = loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<Value>(trimmed) {
                            Ok(frame) => {
                                if tx.send(TransportEvent::Frame(frame)).await.is_err() {
                                    break "session dropped".to_string();
                                }
                            }
                            Err(e) => {
                                logs.debug(&name, format!("Ignoring non-JSON stdout line ({e}): {trimmed}"));
                            }
                        }
                    }
                    Ok(None) => break "server process closed stdout".to_string(),
                    Err(e) => break format!("Error reading server stdout: {e}"),
                }
            };
            alive.store(false, Ordering::SeqCst);
            debug!(server = %name, reason = %reason, "stdio transport closed");
            let _ = tx.send(TransportEvent::Closed(reason)).await;
        });

        if let Some(stderr) = stderr {
            let logs = self.logs.clone();
            let name = self.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let line = line.trim_end();
                    if line.is_empty() {
                        continue;
                    }
                    if looks_like_problem(line) {
                        logs.warn(&name, line);
                    } else {
                        logs.debug(&name, line);
                    }
                }
            });
        }

        *running = Some(Running { stdin, child });
        Ok(rx)
    }

    async fn send(&self, frame: Value) -> HubResult<()> {
        let mut line = serde_json::to_vec(&frame)?;
        line.push(b'\n');

        let mut running = self.running.lock().await;
        let running = running
            .as_mut()
            .ok_or_else(|| HubError::Transport(format!("'{}' is not running", self.name)))?;
        running
            .stdin
            .write_all(&line)
            .await
            .map_err(|e| HubError::Transport(format!("Failed to write to server stdin: {e}")))?;
        running
            .stdin
            .flush()
            .await
            .map_err(|e| HubError::Transport(format!("Failed to flush server stdin: {e}")))?;
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn close(&self, grace: Duration) {
        let Some(Running { stdin, mut child }) = self.running.lock().await.take() else {
            return;
        };
        // Closing stdin is the polite way to ask a stdio server to leave.
        drop(stdin);
        match terminate(&mut child, grace).await {
            Ok(status) => debug!(server = %self.name, %status, "server process exited"),
            Err(e) => warn!(server = %self.name, error = %e, "Failed to stop server process"),
        }
        self.alive.store(false, Ordering::SeqCst);
    }
}

/// SIGTERM, wait up to `grace`, then SIGKILL; always reaps the child.
#[cfg(unix)]
async fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<std::process::ExitStatus> {
    let Some(pid) = child.id() else {
        // Already reaped.
        return child.wait().await;
    };

    if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        if e == nix::errno::Errno::ESRCH {
            return child.wait().await;
        }
        return Err(std::io::Error::other(e));
    }

    if let Ok(result) = tokio::time::timeout(grace, child.wait()).await {
        return result;
    }

    child.kill().await?;
    child.wait().await
}

#[cfg(not(unix))]
async fn terminate(child: &mut Child, _grace: Duration) -> std::io::Result<std::process::ExitStatus> {
    child.kill().await?;
    child.wait().await
}

fn looks_like_problem(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    ["error", "warn", "fatal", "panic", "exception", "traceback"]
        .iter()
        .any(|needle| lower.contains(needle))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use mcphub_core::LogLevel;
    use serde_json::json;

    fn transport(command: &str, args: &[&str], logs: Arc<LogHub>) -> StdioTransport {
        StdioTransport::new(
            "test",
            command.to_string(),
            args.iter().map(|s| s.to_string()).collect(),
            IndexMap::new(),
            logs,
        )
    }

    #[test]
    fn test_problem_detection() {
        assert!(looks_like_problem("ERROR: missing token"));
        assert!(looks_like_problem("Warning: deprecated flag"));
        assert!(!looks_like_problem("Server listening on stdio"));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_transport_error() {
        let t = transport("/nonexistent/mcp-server", &[], Arc::new(LogHub::in_memory()));
        let err = t.open().await.unwrap_err();
        assert_eq!(err.kind(), "transport");
        assert!(!t.is_alive());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_frames_round_trip_through_cat() {
        let t = transport("cat", &[], Arc::new(LogHub::in_memory()));
        let mut rx = t.open().await.unwrap();
        assert!(t.is_alive());

        t.send(json!({"jsonrpc": "2.0", "id": 1, "result": {}})).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            TransportEvent::Frame(json!({"jsonrpc": "2.0", "id": 1, "result": {}}))
        );

        t.close(Duration::from_secs(1)).await;
        assert!(matches!(rx.recv().await, Some(TransportEvent::Closed(_))));
        assert!(rx.recv().await.is_none());
        assert!(!t.is_alive());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_reports_single_close_and_stderr_is_forwarded() {
        let logs = Arc::new(LogHub::in_memory());
        let mut records = logs.subscribe();
        let t = transport(
            "sh",
            &["-c", "echo 'error: bad credentials' >&2; echo 'not json'"],
            logs.clone(),
        );
        let mut rx = t.open().await.unwrap();

        match rx.recv().await.unwrap() {
            TransportEvent::Closed(reason) => assert!(reason.contains("closed stdout")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(rx.recv().await.is_none());

        let mut saw_warn = false;
        while let Ok(Ok(record)) =
            tokio::time::timeout(Duration::from_secs(2), records.recv()).await
        {
            if record.level == LogLevel::Warn && record.message.contains("bad credentials") {
                saw_warn = true;
                break;
            }
        }
        assert!(saw_warn);
        t.close(Duration::from_millis(100)).await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_close_escalates_when_sigterm_ignored() {
        let t = transport(
            "sh",
            &["-c", "trap '' TERM; while true; do sleep 1; done"],
            Arc::new(LogHub::in_memory()),
        );
        let _rx = t.open().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = std::time::Instant::now();
        t.close(Duration::from_millis(200)).await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
