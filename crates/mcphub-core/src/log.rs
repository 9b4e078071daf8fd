//! Log levels and records shared by every component.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Severity of a [`LogRecord`].
///
/// `Hub` marks hub-level lifecycle events (startup, reload, shutdown) and is
/// ranked above `Error` so that level filters never hide it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Chatter: transitions, child stderr noise, ignored frames.
    Debug,
    /// Normal progress.
    Info,
    /// Something looks wrong but nothing stopped.
    Warn,
    /// A connection or operation failed.
    Error,
    /// Hub lifecycle; always visible.
    Hub,
}

impl LogLevel {
    /// Uppercase wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Hub => "HUB",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARN" | "WARNING" => Ok(Self::Warn),
            "ERROR" => Ok(Self::Error),
            "HUB" => Ok(Self::Hub),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

/// A single structured operational event. Immutable once emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// When the record was emitted.
    pub timestamp: DateTime<Utc>,
    /// Severity at emission; never rewritten downstream.
    pub level: LogLevel,
    /// Emitting component, usually `hub` or the server name.
    pub source: String,
    /// Human-readable text.
    pub message: String,
}

impl LogRecord {
    /// A record stamped now.
    pub fn new(level: LogLevel, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            source: source.into(),
            message: message.into(),
        }
    }

    /// Whether this record passes a minimum-level filter.
    pub fn passes(&self, min: LogLevel) -> bool {
        self.level >= min
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering_keeps_hub_visible() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Error < LogLevel::Hub);
        let rec = LogRecord::new(LogLevel::Hub, "hub", "started");
        assert!(rec.passes(LogLevel::Error));
    }

    #[test]
    fn test_level_parse() {
        assert_eq!("warn".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_record_json_line_shape() {
        let rec = LogRecord::new(LogLevel::Info, "serverA", "connected");
        let value: serde_json::Value = serde_json::to_value(&rec).unwrap();
        assert_eq!(value["level"], "INFO");
        assert_eq!(value["source"], "serverA");
        assert!(value["timestamp"].is_string());
    }
}
