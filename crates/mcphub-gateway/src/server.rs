//! Router assembly and the serve loop.

use crate::handlers;
use crate::middleware::trace_requests;
use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use mcphub_mcp::HubManager;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::info;

/// Shared application state.
pub struct AppState {
    /// The hub behind every route.
    pub manager: Arc<HubManager>,
    /// Wall-clock start, reported by the health route.
    pub started_at: DateTime<Utc>,
    /// Monotonic start for uptime.
    pub started: Instant,
}

/// The HTTP control API.
pub struct GatewayServer;

impl GatewayServer {
    /// Build the router over a running hub.
    pub fn build(manager: Arc<HubManager>) -> Router {
        let state = Arc::new(AppState {
            manager,
            started_at: Utc::now(),
            started: Instant::now(),
        });

        Router::new()
            .route("/api/health", get(handlers::health))
            .route("/api/servers", get(handlers::list_servers))
            .route("/api/servers/start", post(handlers::start_server))
            .route("/api/servers/stop", post(handlers::stop_server))
            .route("/api/servers/refresh", post(handlers::refresh_server))
            .route("/api/restart", post(handlers::restart))
            .route("/api/logs/stream", get(handlers::log_stream))
            .layer(axum_mw::from_fn(trace_requests))
            .with_state(state)
    }

    /// Serve `app` on an already bound listener until `shutdown` resolves.
    pub async fn serve(
        listener: TcpListener,
        app: Router,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<()> {
        let addr: SocketAddr = listener.local_addr()?;
        info!(%addr, "Control API listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use mcphub_config::ConfigStore;
    use mcphub_logs::LogHub;
    use mcphub_mcp::{DefaultTransportFactory, HubContext, SupervisorSettings};
    use tower::ServiceExt;

    async fn empty_hub(dir: &tempfile::TempDir) -> Arc<HubManager> {
        let path = dir.path().join("mcp.json");
        std::fs::write(&path, r#"{"mcpServers": {}}"#).unwrap();
        let logs = Arc::new(LogHub::in_memory());
        let store = Arc::new(ConfigStore::load(vec![path], logs.clone()).await.unwrap());
        HubManager::new(
            HubContext::new(store, logs.clone()),
            Arc::new(DefaultTransportFactory::new(logs)),
            SupervisorSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_health_with_no_servers() {
        let dir = tempfile::tempdir().unwrap();
        let app = GatewayServer::build(empty_hub(&dir).await);

        let resp = app
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["server_count"], 0);
        assert_eq!(json["servers"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_wrong_method_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = GatewayServer::build(empty_hub(&dir).await);

        let resp = app
            .oneshot(Request::get("/api/servers/start").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
