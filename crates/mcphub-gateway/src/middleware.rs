//! Request logging.

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::{debug, warn};

/// Logs every API request with its status and latency.
///
/// Server errors are logged at WARN; everything else at DEBUG so that
/// dashboard polling does not flood the console.
pub async fn trace_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    let status = response.status();
    let elapsed_ms = started.elapsed().as_millis() as u64;
    if status.is_server_error() {
        warn!(%method, %path, status = status.as_u16(), elapsed_ms, "Request failed");
    } else {
        debug!(%method, %path, status = status.as_u16(), elapsed_ms, "Request handled");
    }
    response
}
