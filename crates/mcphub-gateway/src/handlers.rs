//! Route handlers for the control API.

use crate::error::ApiError;
use crate::server::AppState;
use crate::sse;
use crate::view::{ServerSummary, ServerView};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use mcphub_core::{HubError, LogLevel};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

/// Body of the per-server control requests.
#[derive(Debug, Deserialize)]
pub struct ServerRequest {
    /// Target server; `name` is accepted too.
    #[serde(alias = "name")]
    pub server_name: String,
}

/// Query string of `POST /api/servers/stop`.
#[derive(Debug, Default, Deserialize)]
pub struct StopParams {
    /// Persist `disabled: true` before stopping.
    #[serde(default)]
    pub disable: bool,
}

/// Query string of `GET /api/logs/stream`.
#[derive(Debug, Default, Deserialize)]
pub struct LogStreamParams {
    /// Minimum level; `INFO` when absent.
    pub level: Option<String>,
}

type Body = Result<Json<ServerRequest>, JsonRejection>;

fn server_name(body: Body) -> Result<String, ApiError> {
    let Json(request) = body?;
    let name = request.server_name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("server_name must not be empty".into()));
    }
    Ok(name.to_string())
}

fn accepted(action: &str, name: &str) -> impl IntoResponse {
    (
        StatusCode::ACCEPTED,
        Json(json!({"status": "accepted", "action": action, "server_name": name})),
    )
}

/// `GET /api/health`
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.manager.registry().snapshot();
    let connected = snapshot.iter().filter(|s| s.is_connected()).count();
    let servers: Vec<ServerSummary> = snapshot.iter().map(|s| ServerSummary::from(&**s)).collect();

    Json(json!({
        "status": "ok",
        "service": "mcp-hub",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started.elapsed().as_secs(),
        "started_at": state.started_at,
        "server_count": snapshot.len(),
        "connected_count": connected,
        "servers": servers,
    }))
}

/// `GET /api/servers`: every server in configuration order.
pub async fn list_servers(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store = state.manager.store();
    let servers: Vec<ServerView> = state
        .manager
        .registry()
        .snapshot()
        .iter()
        .map(|s| ServerView::new(s, store.entry(&s.name).as_ref()))
        .collect();

    Json(json!({ "servers": servers, "timestamp": Utc::now() }))
}

/// `POST /api/servers/start`
pub async fn start_server(
    State(state): State<Arc<AppState>>,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let name = server_name(body)?;
    state.manager.start_server(&name).await?;
    Ok(accepted("start", &name))
}

/// `POST /api/servers/stop[?disable=true]`
pub async fn stop_server(
    State(state): State<Arc<AppState>>,
    params: Result<Query<StopParams>, QueryRejection>,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let Query(params) = params?;
    let name = server_name(body)?;
    state.manager.stop_server(&name, params.disable).await?;
    let action = if params.disable { "disable" } else { "stop" };
    Ok(accepted(action, &name))
}

/// `POST /api/servers/refresh`
pub async fn refresh_server(
    State(state): State<Arc<AppState>>,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let name = server_name(body)?;
    state.manager.refresh_server(&name).await?;
    Ok(accepted("refresh", &name))
}

/// Soft restart. Runs in the background; the caller follows progress
/// through the log stream or by polling the server list.
pub async fn restart(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    if state.manager.is_shutting_down() {
        return Err(HubError::ShuttingDown.into());
    }
    let manager = state.manager.clone();
    tokio::spawn(async move {
        if let Err(e) = manager.restart().await {
            manager.logs().error("hub", format!("Restart failed: {e}"));
        }
    });
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({"status": "accepted", "action": "restart"})),
    ))
}

/// `GET /api/logs/stream[?level=..]`
pub async fn log_stream(
    State(state): State<Arc<AppState>>,
    params: Result<Query<LogStreamParams>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(params) = params?;
    let min = match params.level.as_deref() {
        None | Some("") => LogLevel::Info,
        Some(raw) => raw.parse::<LogLevel>().map_err(ApiError::BadRequest)?,
    };
    Ok(sse::log_stream(state.manager.logs(), min))
}
