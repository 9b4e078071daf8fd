//! MCP connectivity for mcp-hub.
//!
//! Transports move JSON-RPC frames, sessions correlate requests with
//! responses, supervisors drive each server through its connection
//! lifecycle, and the [`HubManager`] keeps one supervisor per configured
//! server in step with the configuration store.

pub mod aggregator;
pub mod backoff;
pub mod manager;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod supervisor;
pub mod transport;

pub use manager::{HubContext, HubManager};
pub use registry::{ServerRegistry, StateWriter};
pub use session::{McpSession, SessionEvent};
pub use supervisor::{SupervisorCommand, SupervisorHandle, SupervisorSettings};
pub use transport::{
    DefaultTransportFactory, Transport, TransportEvent, TransportFactory,
};
