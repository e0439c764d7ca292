//! API request handlers.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    Json,
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use pixelhub_protocol::{ClientInfo, CommandResult, Frame, LogEntry, LogKind, NodeInfo, events};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use subtle::ConstantTimeEq;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{info, instrument, warn};

use crate::hub::ConnectionId;
use crate::hub::relay::aggregate_replies;

use super::error::{ApiError, ApiResult};
use super::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Debug, Serialize)]
pub struct NodesResponse {
    pub nodes: Vec<NodeInfo>,
}

/// Connected engine nodes, oldest first.
pub async fn list_nodes(State(state): State<AppState>) -> Json<NodesResponse> {
    Json(NodesResponse {
        nodes: state.hub.registry().node_list(),
    })
}

#[derive(Debug, Serialize)]
pub struct ClientsResponse {
    pub clients: Vec<ClientInfo>,
}

/// Every live connection.
pub async fn list_clients(State(state): State<AppState>) -> Json<ClientsResponse> {
    Json(ClientsResponse {
        clients: state.hub.registry().clients(),
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<usize>,
    pub kind: Option<LogKind>,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub logs: Vec<LogEntry>,
}

pub async fn list_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Json<LogsResponse> {
    Json(LogsResponse {
        logs: state.hub.logs().tail(query.limit, query.kind),
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct LogStreamQuery {
    pub kind: Option<LogKind>,
}

/// Live log feed: one `new-log` SSE event per entry pushed after connecting.
pub async fn stream_logs(
    State(state): State<AppState>,
    Query(query): Query<LogStreamQuery>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let kind = query.kind;
    let stream =
        BroadcastStream::new(state.hub.logs().subscribe()).filter_map(move |item| match item {
            Ok(entry) if kind.is_none_or(|k| entry.kind == k) => {
                match serde_json::to_string(&entry) {
                    Ok(data) => Some(Ok(Event::default()
                        .event("new-log")
                        .id(entry.id.to_string())
                        .data(data))),
                    Err(e) => {
                        warn!("Failed to serialize log entry {}: {}", entry.id, e);
                        None
                    }
                }
            }
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!("Log stream subscriber lagged, skipped {} entries", skipped);
                None
            }
        });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}

/// Constant-time comparison of the control secret.
fn token_matches(expected: &str, provided: &str) -> bool {
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

fn check_token(state: &AppState, token: &str) -> ApiResult<()> {
    match state.control.token.as_deref() {
        None => Err(ApiError::service_unavailable("control API is disabled")),
        Some(expected) if token_matches(expected, token) => Ok(()),
        Some(_) => Err(ApiError::unauthorized("invalid control token")),
    }
}

/// `POST /api/control` body.
#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    pub token: String,
    pub action: String,
    pub target: String,
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub message: String,
    pub delivered: usize,
}

/// Push an event to every engine node or every console.
#[instrument(skip(state, request), fields(action = %request.action, target = %request.target))]
pub async fn control(
    State(state): State<AppState>,
    Json(request): Json<ControlRequest>,
) -> ApiResult<Json<ControlResponse>> {
    check_token(&state, &request.token)?;

    if request.action != "socket" {
        return Err(ApiError::not_implemented(format!(
            "unsupported action '{}'",
            request.action
        )));
    }
    if request.event.trim().is_empty() {
        return Err(ApiError::bad_request("event is required"));
    }

    let (message, delivered) = match request.target.as_str() {
        "unity" | "engine" => {
            let frame = Frame::new(
                events::UNITY_COMMAND,
                json!({ "cmd": request.event, "data": request.data }),
            );
            let delivered = state.hub.broadcast_to_engines(frame);
            ("Engine command sent", delivered)
        }
        "webconsole" | "console" => {
            let frame = Frame::new(request.event.clone(), request.data);
            let delivered = state.hub.broadcast_to_consoles(frame);
            ("Console event sent", delivered)
        }
        other => {
            return Err(ApiError::not_implemented(format!(
                "unsupported target '{other}'"
            )));
        }
    };

    info!(delivered, "Control event '{}' dispatched", request.event);
    Ok(Json(ControlResponse {
        message: message.to_string(),
        delivered,
    }))
}

/// `POST /api/nodes/{id}/fetch` body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    pub token: String,
    pub cmd: String,
    #[serde(default)]
    pub args: Map<String, Value>,
    pub timeout_ms: Option<u64>,
}

/// Send a command to one node and wait for its reply.
#[instrument(skip(state, request), fields(cmd = %request.cmd))]
pub async fn fetch_from_node(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    Json(request): Json<FetchRequest>,
) -> ApiResult<Json<CommandResult>> {
    check_token(&state, &request.token)?;

    if request.cmd.trim().is_empty() {
        return Err(ApiError::bad_request("cmd is required"));
    }

    let id = ConnectionId::from(node_id);
    let node = state.hub.registry().get(&id)?;
    if !node.is_engine() {
        return Err(ApiError::not_found(format!("node {id}")));
    }

    let timeout = state.hub.config().timeout_for(request.timeout_ms);
    let settled = state
        .hub
        .send(vec![id], &request.cmd, request.args, timeout)
        .await;
    Ok(Json(aggregate_replies(settled)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_matches() {
        assert!(token_matches("secret", "secret"));
        assert!(!token_matches("secret", "secreT"));
        assert!(!token_matches("secret", "secret-longer"));
        assert!(!token_matches("secret", ""));
    }
}
