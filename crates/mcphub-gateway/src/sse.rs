//! Server-sent event stream of hub log records.

use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::Stream;
use mcphub_core::{LogLevel, LogRecord};
use mcphub_logs::LogHub;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Interval between keep-alive comments on an idle stream.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Subscribe to the hub's log records at or above `min`.
///
/// `HUB` records always pass. A subscriber that falls behind loses the
/// oldest records and keeps streaming.
pub fn log_stream(
    logs: &LogHub,
    min: LogLevel,
) -> Sse<impl Stream<Item = Result<Event, Infallible>> + Send + 'static> {
    let receiver = logs.subscribe();
    let stream = BroadcastStream::new(receiver).filter_map(move |result| match result {
        Ok(record) if visible(&record, min) => match serde_json::to_string(&record) {
            Ok(json) => Some(Ok(Event::default().data(json))),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize log record");
                None
            }
        },
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(error = %e, "Log stream subscriber lagged");
            None
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL).text("ping"))
}

fn visible(record: &LogRecord, min: LogLevel) -> bool {
    record.level == LogLevel::Hub || record.passes(min)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_level_filter() {
        let debug = LogRecord::new(LogLevel::Debug, "a", "noise");
        let warn = LogRecord::new(LogLevel::Warn, "a", "careful");
        let hub = LogRecord::new(LogLevel::Hub, "hub", "started");

        assert!(!visible(&debug, LogLevel::Info));
        assert!(visible(&debug, LogLevel::Debug));
        assert!(visible(&warn, LogLevel::Info));
        assert!(!visible(&warn, LogLevel::Error));
        assert!(visible(&hub, LogLevel::Error));
    }
}
