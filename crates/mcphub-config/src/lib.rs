//! Server configuration for mcp-hub.
//!
//! Configuration comes from an ordered list of JSON sources, each holding an
//! `mcpServers` object keyed by server name. The [`ConfigStore`] merges them
//! (later sources replace earlier entries of the same name), keeps track of
//! which source owns each entry, persists runtime enable/disable toggles back
//! to that source, and publishes [`ConfigDiff`]s when the sources change on
//! disk (see [`ConfigWatcher`]).

pub mod entry;
pub mod interpolate;
pub mod store;
pub mod watcher;

pub use entry::{ServerConfigEntry, TransportSpec};
pub use store::{ConfigDiff, ConfigStore};
pub use watcher::{ConfigWatcher, WatchSettings};
