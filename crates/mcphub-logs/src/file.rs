//! Persisted log file, rolled and capped by `tracing-appender`.

use std::path::{Path, PathBuf};
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};

/// Default persisted log location.
///
/// `$XDG_STATE_HOME/mcp-hub/logs/mcp-hub.log` where a state directory exists,
/// otherwise `~/.mcp-hub/logs/mcp-hub.log`.
pub fn default_log_path() -> PathBuf {
    if let Some(state) = dirs::state_dir() {
        return state.join("mcp-hub").join("logs").join("mcp-hub.log");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mcp-hub")
        .join("logs")
        .join("mcp-hub.log")
}

/// How often the log file rolls over to a new dated file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogRotation {
    /// `mcp-hub.YYYY-MM-DD-HH.log`
    Hourly,
    /// `mcp-hub.YYYY-MM-DD.log`
    #[default]
    Daily,
    /// A single `mcp-hub.log` that is never rolled.
    Never,
}

impl LogRotation {
    fn as_rotation(self) -> Rotation {
        match self {
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

/// Open the rolling appender behind `path`.
///
/// The parent of `path` is the log directory; its file stem and extension
/// become the prefix and suffix of every rolled file. At most `max_files`
/// rolled files are kept, the active one included. The directory is created
/// when missing.
pub fn open_appender(
    path: &Path,
    rotation: LogRotation,
    max_files: usize,
) -> Result<RollingFileAppender, InitError> {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let prefix = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mcp-hub".to_string());

    let mut builder = RollingFileAppender::builder()
        .rotation(rotation.as_rotation())
        .filename_prefix(prefix)
        .max_log_files(max_files.max(1));
    if let Some(extension) = path.extension() {
        builder = builder.filename_suffix(extension.to_string_lossy().into_owned());
    }
    builder.build(directory)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_never_rotation_keeps_the_configured_name() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("logs").join("hub.log");
        {
            let mut appender = open_appender(&path, LogRotation::Never, 3).unwrap();
            appender.write_all(b"first\n").unwrap();
            appender.flush().unwrap();
        }
        let mut appender = open_appender(&path, LogRotation::Never, 3).unwrap();
        appender.write_all(b"second\n").unwrap();
        appender.flush().unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn test_daily_rotation_writes_dated_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("mcp-hub.log");
        let mut appender = open_appender(&path, LogRotation::Daily, 3).unwrap();
        appender.write_all(b"line\n").unwrap();
        appender.flush().unwrap();

        let names: Vec<String> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("mcp-hub."));
        assert!(names[0].ends_with(".log"));
        assert_ne!(names[0], "mcp-hub.log");
        assert!(!path.exists());
    }

    #[test]
    fn test_unusable_directory_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();
        assert!(open_appender(&blocker.join("hub.log"), LogRotation::Never, 1).is_err());
    }

    #[test]
    fn test_default_path_shape() {
        let path = default_log_path();
        assert!(path.ends_with("logs/mcp-hub.log"));
    }
}
