//! The [`LogHub`] and its file writer.

use crate::file::{open_appender, LogRotation};
use mcphub_core::{LogLevel, LogRecord};
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Settings for a [`LogHub`].
#[derive(Debug, Clone)]
pub struct LogHubSettings {
    /// Persisted log file. `None` disables the file sink.
    pub path: Option<PathBuf>,
    /// When the file rolls over to a new dated file.
    pub rotation: LogRotation,
    /// Rolled files kept, the active one included.
    pub max_files: usize,
    /// Per-subscriber buffer; lagging subscribers lose the oldest records.
    pub broadcast_capacity: usize,
}

impl Default for LogHubSettings {
    fn default() -> Self {
        Self {
            path: None,
            rotation: LogRotation::Daily,
            max_files: 7,
            broadcast_capacity: 1024,
        }
    }
}

enum FileCommand {
    Record(LogRecord),
    Flush(oneshot::Sender<()>),
}

/// Fan-out point for every operational event in the hub.
pub struct LogHub {
    sender: broadcast::Sender<LogRecord>,
    file_tx: Option<mpsc::UnboundedSender<FileCommand>>,
}

impl LogHub {
    /// Create a hub. When a file path is configured the file is written
    /// from a dedicated thread fed through an unbounded queue.
    pub fn new(settings: LogHubSettings) -> Self {
        let (sender, _) = broadcast::channel(settings.broadcast_capacity.max(1));

        let file_tx = settings.path.and_then(|path| {
            let (tx, rx) = mpsc::unbounded_channel();
            let rotation = settings.rotation;
            let max_files = settings.max_files;
            let spawned = std::thread::Builder::new()
                .name("mcp-hub-log-file".into())
                .spawn(move || run_file_writer(path, rotation, max_files, rx));
            match spawned {
                Ok(_) => Some(tx),
                Err(e) => {
                    warn!(error = %e, "Failed to start log file writer, file sink disabled");
                    None
                }
            }
        });

        Self { sender, file_tx }
    }

    /// A hub with no file sink. Used by tests and embedders.
    pub fn in_memory() -> Self {
        Self::new(LogHubSettings::default())
    }

    /// Emit a record at its true level. Never blocks.
    pub fn emit(&self, record: LogRecord) {
        mirror_to_tracing(&record);
        if let Some(tx) = &self.file_tx {
            let _ = tx.send(FileCommand::Record(record.clone()));
        }
        // No subscribers is fine.
        let _ = self.sender.send(record);
    }

    /// Emit a fresh record for `source`.
    pub fn log(&self, level: LogLevel, source: &str, message: impl Into<String>) {
        self.emit(LogRecord::new(level, source, message));
    }

    /// Emit at DEBUG.
    pub fn debug(&self, source: &str, message: impl Into<String>) {
        self.log(LogLevel::Debug, source, message);
    }

    /// Emit at INFO.
    pub fn info(&self, source: &str, message: impl Into<String>) {
        self.log(LogLevel::Info, source, message);
    }

    /// Emit at WARN.
    pub fn warn(&self, source: &str, message: impl Into<String>) {
        self.log(LogLevel::Warn, source, message);
    }

    /// Emit at ERROR.
    pub fn error(&self, source: &str, message: impl Into<String>) {
        self.log(LogLevel::Error, source, message);
    }

    /// Hub-level lifecycle event.
    pub fn hub(&self, message: impl Into<String>) {
        self.log(LogLevel::Hub, "hub", message);
    }

    /// Subscribe to live records. Filtering is the subscriber's job.
    pub fn subscribe(&self) -> broadcast::Receiver<LogRecord> {
        self.sender.subscribe()
    }

    /// Live subscribers right now.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Wait until every record emitted so far has reached the file.
    pub async fn flush(&self) {
        if let Some(tx) = &self.file_tx {
            let (done_tx, done_rx) = oneshot::channel();
            if tx.send(FileCommand::Flush(done_tx)).is_ok() {
                let _ = done_rx.await;
            }
        }
    }
}

fn mirror_to_tracing(record: &LogRecord) {
    let source = record.source.as_str();
    let message = record.message.as_str();
    match record.level {
        LogLevel::Debug => debug!(source, "{message}"),
        LogLevel::Info => info!(source, "{message}"),
        LogLevel::Warn => warn!(source, "{message}"),
        LogLevel::Error => error!(source, "{message}"),
        LogLevel::Hub => info!(source, hub = true, "{message}"),
    }
}

/// Drain the queue into the rolling file until every sender is gone.
fn run_file_writer(
    path: PathBuf,
    rotation: LogRotation,
    max_files: usize,
    mut rx: mpsc::UnboundedReceiver<FileCommand>,
) {
    let mut file = match open_appender(&path, rotation, max_files) {
        Ok(file) => Some(file),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Log file unavailable, file sink disabled");
            None
        }
    };

    while let Some(cmd) = rx.blocking_recv() {
        match cmd {
            FileCommand::Record(record) => {
                let Some(sink) = file.as_mut() else { continue };
                match serde_json::to_vec(&record) {
                    Ok(mut line) => {
                        line.push(b'\n');
                        if let Err(e) = sink.write_all(&line) {
                            warn!(path = %path.display(), error = %e, "Failed to write log record");
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to serialize log record"),
                }
            }
            FileCommand::Flush(done) => {
                if let Some(sink) = file.as_mut() {
                    let _ = sink.flush();
                }
                let _ = done.send(());
            }
        }
    }

    if let Some(mut sink) = file {
        let _ = sink.flush();
    }
    debug!("Log file writer exiting");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_records_reach_file_as_json_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("mcp-hub.log");
        let hub = LogHub::new(LogHubSettings {
            path: Some(path.clone()),
            rotation: LogRotation::Never,
            ..LogHubSettings::default()
        });

        hub.hub("starting");
        hub.debug("serverA", "stderr: booting");
        hub.error("serverA", "connection refused");
        hub.flush().await;

        let content = std::fs::read_to_string(&path).unwrap();
        let records: Vec<LogRecord> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].level, LogLevel::Hub);
        assert_eq!(records[1].level, LogLevel::Debug);
        assert_eq!(records[2].source, "serverA");
    }

    #[tokio::test]
    async fn test_subscribers_receive_all_levels() {
        let hub = LogHub::in_memory();
        let mut rx = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);

        hub.debug("a", "d");
        hub.warn("a", "w");

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.level, LogLevel::Debug);
        assert_eq!(second.level, LogLevel::Warn);
    }

    #[tokio::test]
    async fn test_slow_subscriber_never_blocks_emitter() {
        let hub = LogHub::new(LogHubSettings {
            broadcast_capacity: 4,
            ..LogHubSettings::default()
        });
        let mut rx = hub.subscribe();

        let emitted = tokio::time::timeout(Duration::from_secs(1), async {
            for i in 0..100 {
                hub.info("hub", format!("event {i}"));
            }
        })
        .await;
        assert!(emitted.is_ok(), "emitter stalled on a full subscriber");

        // Oldest records were dropped; the receiver reports the lag and then
        // resumes with the newest retained records.
        match rx.recv().await {
            Err(broadcast::error::RecvError::Lagged(n)) => assert!(n >= 96),
            other => panic!("expected lag, got {other:?}"),
        }
        let next = rx.recv().await.unwrap();
        assert_eq!(next.message, "event 96");
    }
}
