//! The hub-wide error taxonomy.

use std::path::PathBuf;

/// A convenience `Result` alias using [`HubError`].
pub type HubResult<T> = Result<T, HubError>;

/// Top-level error type for the hub.
///
/// Each variant maps onto one class of failure with its own propagation
/// policy: configuration problems skip the offending entry, transport
/// failures drive a reconnect, persistence failures are reported to the API
/// caller, and protocol violations fail only the affected server.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// A configuration source or entry could not be read or validated.
    #[error("Config error in '{}'{}: {message}", .path.display(), entry_suffix(.entry))]
    Config {
        /// The source file that produced the error.
        path: PathBuf,
        /// The offending entry, when the error is scoped to one entry.
        entry: Option<String>,
        /// Human readable detail.
        message: String,
    },

    /// Connect, handshake or runtime I/O failure on a transport.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A durable configuration write failed.
    #[error("Persistence error in '{}': {message}", .path.display())]
    Persistence {
        /// The source file that could not be rewritten.
        path: PathBuf,
        /// Human readable detail.
        message: String,
    },

    /// A connected server sent a malformed or unexpected response.
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// The named server is not present in the merged configuration.
    #[error("Unknown server: {0}")]
    UnknownServer(String),

    /// The hub is shutting down and no longer accepts work.
    #[error("Hub is shutting down")]
    ShuttingDown,

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HubError {
    /// Builds a [`HubError::Config`] scoped to a whole source.
    pub fn config(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Config {
            path: path.into(),
            entry: None,
            message: message.into(),
        }
    }

    /// Builds a [`HubError::Config`] scoped to one entry of a source.
    pub fn config_entry(
        path: impl Into<PathBuf>,
        entry: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Config {
            path: path.into(),
            entry: Some(entry.into()),
            message: message.into(),
        }
    }

    /// Builds a [`HubError::Persistence`].
    pub fn persistence(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Persistence {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Stable machine-readable name for the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Transport(_) => "transport",
            Self::Persistence { .. } => "persistence",
            Self::Protocol(_) => "protocol",
            Self::UnknownServer(_) => "unknown_server",
            Self::ShuttingDown => "shutting_down",
            Self::Json(_) => "json",
            Self::Io(_) => "io",
        }
    }

    /// Whether a supervisor should keep retrying after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Io(_))
    }
}

fn entry_suffix(entry: &Option<String>) -> String {
    entry
        .as_ref()
        .map(|e| format!(" (entry '{e}')"))
        .unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_names_source_and_entry() {
        let err = HubError::config_entry("/etc/hub/a.json", "serverA", "missing command");
        let msg = err.to_string();
        assert!(msg.contains("/etc/hub/a.json"), "{msg}");
        assert!(msg.contains("serverA"), "{msg}");
        assert!(msg.contains("missing command"), "{msg}");
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_config_error_without_entry() {
        let err = HubError::config("b.json", "not JSON");
        assert_eq!(err.to_string(), "Config error in 'b.json': not JSON");
    }

    #[test]
    fn test_recoverable_classes() {
        assert!(HubError::Transport("eof".into()).is_recoverable());
        assert!(!HubError::Protocol("bad".into()).is_recoverable());
        assert!(!HubError::persistence("x.json", "denied").is_recoverable());
    }
}
