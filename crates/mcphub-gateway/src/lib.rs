//! HTTP control API for the MCP hub.
//!
//! Serves registry snapshots, turns control requests into configuration
//! writes plus supervisor commands, and streams log records over SSE.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod server;
pub mod sse;
pub mod view;

pub use error::ApiError;
pub use server::{AppState, GatewayServer};
pub use view::ServerView;
