//! Core types and error definitions for mcp-hub.
//!
//! This crate provides the foundational types shared across all hub crates:
//! the error taxonomy, the per-server state snapshot published by supervisors,
//! and the immutable log record carried by the log hub.
//!
//! # Main types
//!
//! - [`HubError`]: Unified error enum for all hub subsystems.
//! - [`HubResult`]: Convenience alias for `Result<T, HubError>`.
//! - [`ServerState`]: Immutable snapshot of one downstream server.
//! - [`ServerStatus`]: Lifecycle state of a downstream server.
//! - [`Capabilities`]: Tools, resources and prompts advertised by a server.
//! - [`LogRecord`]: A single structured operational event.

/// Error taxonomy.
pub mod error;
/// Log record and level types.
pub mod log;
/// Server state snapshot types.
pub mod state;

pub use error::{HubError, HubResult};
pub use log::{LogLevel, LogRecord};
pub use state::{
    Capabilities, PromptArgument, PromptDescriptor, ResourceDescriptor, ServerInfo, ServerState,
    ServerStatus, ToolDescriptor, TransportKind,
};
