//! Operational event hub for mcp-hub.
//!
//! Every component reports through a shared [`LogHub`]. Each record is
//! mirrored to `tracing`, appended as a JSON line to a rolling file capped
//! by `tracing-appender`, and broadcast to live subscribers (the gateway's
//! log stream). Emitting never blocks: the file sink sits behind an
//! unbounded queue and lagging subscribers lose their oldest records.

pub mod file;
pub mod hub;

pub use file::{default_log_path, LogRotation};
pub use hub::{LogHub, LogHubSettings};
