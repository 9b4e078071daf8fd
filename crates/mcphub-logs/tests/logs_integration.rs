#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Integration tests for the mcphub-logs crate.
//!
//! Covers: the rolling file driven through the hub, lagging subscribers,
//! and appending to an existing log across restarts.

use mcphub_core::{LogLevel, LogRecord};
use mcphub_logs::{LogHub, LogHubSettings, LogRotation};
use tokio::sync::broadcast::error::TryRecvError;

// ---------------------------------------------------------------------------
// File sink
// ---------------------------------------------------------------------------

fn log_files(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn hub_writes_json_lines_to_a_dated_file() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("logs");
    let hub = LogHub::new(LogHubSettings {
        path: Some(dir.join("mcp-hub.log")),
        rotation: LogRotation::Daily,
        max_files: 2,
        ..LogHubSettings::default()
    });

    for i in 0..60 {
        hub.info("serverA", format!("record number {i}"));
    }
    hub.flush().await;

    let names = log_files(&dir);
    assert_eq!(names.len(), 1, "{names:?}");
    assert!(names[0].starts_with("mcp-hub.") && names[0].ends_with(".log"));

    let active = std::fs::read_to_string(dir.join(&names[0])).unwrap();
    assert_eq!(active.lines().count(), 60);
    let last: LogRecord = serde_json::from_str(active.lines().last().unwrap()).unwrap();
    assert_eq!(last.message, "record number 59");
}

#[tokio::test]
async fn restart_appends_to_existing_log() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("mcp-hub.log");
    let settings = || LogHubSettings {
        path: Some(path.clone()),
        rotation: LogRotation::Never,
        ..LogHubSettings::default()
    };

    let first = LogHub::new(settings());
    first.hub("first run");
    first.flush().await;
    drop(first);

    let second = LogHub::new(settings());
    second.hub("second run");
    second.flush().await;

    let messages: Vec<String> = std::fs::read_to_string(&path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str::<LogRecord>(l).unwrap().message)
        .collect();
    assert_eq!(messages, vec!["first run", "second run"]);
}

#[tokio::test]
async fn unwritable_path_disables_file_sink_only() {
    let tmp = tempfile::tempdir().unwrap();
    let blocker = tmp.path().join("not-a-dir");
    std::fs::write(&blocker, "").unwrap();

    let hub = LogHub::new(LogHubSettings {
        path: Some(blocker.join("mcp-hub.log")),
        ..LogHubSettings::default()
    });
    let mut rx = hub.subscribe();
    hub.warn("serverA", "still delivered");
    hub.flush().await;

    assert_eq!(rx.try_recv().unwrap().message, "still delivered");
}

// ---------------------------------------------------------------------------
// Subscribers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn slow_subscriber_lags_without_blocking_emitter() {
    let hub = LogHub::new(LogHubSettings {
        broadcast_capacity: 4,
        ..LogHubSettings::default()
    });
    let mut slow = hub.subscribe();

    for i in 0..10 {
        hub.info("hub", format!("event {i}"));
    }

    match slow.try_recv() {
        Err(TryRecvError::Lagged(missed)) => assert_eq!(missed, 6),
        other => panic!("expected lag, got {other:?}"),
    }
    let next = slow.try_recv().unwrap();
    assert_eq!(next.message, "event 6");
}

#[tokio::test]
async fn records_keep_their_true_level() {
    let hub = LogHub::in_memory();
    let mut rx = hub.subscribe();
    assert_eq!(hub.subscriber_count(), 1);

    hub.debug("serverA", "stderr line");
    hub.error("serverA", "Failed: boom");
    hub.hub("Shutting down");

    let levels: Vec<LogLevel> = (0..3).map(|_| rx.try_recv().unwrap().level).collect();
    assert_eq!(levels, vec![LogLevel::Debug, LogLevel::Error, LogLevel::Hub]);
}
