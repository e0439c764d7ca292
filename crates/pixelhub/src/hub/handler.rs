//! WebSocket transport for hub connections.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use pixelhub_protocol::{ClientRole, CommandResponse, Frame, codes, events};
use serde::Deserialize;

use super::RelayHub;
use super::registry::Outbound;
use crate::api::AppState;

/// Ping interval for keepalive.
const PING_INTERVAL_SECS: u64 = 30;

/// Handshake query: `?clientType=engine&name=eu-1`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectQuery {
    pub client_type: Option<String>,
    pub name: Option<String>,
}

/// WebSocket upgrade handler.
///
/// GET /ws
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<ConnectQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let role = ClientRole::from_handshake(query.client_type.as_deref());
    let name = query.name.filter(|n| !n.trim().is_empty());
    info!("WebSocket upgrade request ({})", role);

    let hub = Arc::clone(&state.hub);
    ws.on_upgrade(move |socket| handle_socket(socket, hub, role, name))
}

async fn handle_socket(
    socket: WebSocket,
    hub: Arc<RelayHub>,
    role: ClientRole,
    name: Option<String>,
) {
    let (mut sender, mut receiver) = socket.split();

    let (connection, mut outbound) = match hub.connect(role, name).await {
        Ok(registered) => registered,
        Err(e) => {
            error!("Failed to register {} connection: {}", role, e);
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };
    let id = connection.id.clone();
    info!("{} connected: {}", role, id);

    // Writer: drains the outbound queue and keeps the socket alive.
    let writer_id = id.clone();
    let mut send_task = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(Duration::from_secs(PING_INTERVAL_SECS));
        // The first tick completes immediately.
        ping_interval.tick().await;

        loop {
            tokio::select! {
                item = outbound.recv() => match item {
                    Some(Outbound::Frame(frame)) => {
                        let json = match serde_json::to_string(&frame) {
                            Ok(j) => j,
                            Err(e) => {
                                warn!("Failed to serialize frame '{}': {}", frame.event, e);
                                continue;
                            }
                        };
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        debug!("Closing socket for {}", writer_id);
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                },

                _ = ping_interval.tick() => {
                    if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut send_task => break,

            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<Frame>(text.as_str()) {
                        Ok(frame) => hub.handle_frame(&id, frame).await,
                        Err(e) => {
                            warn!("Malformed frame from {}: {}", id, e);
                            let reply = CommandResponse::error(
                                codes::BAD_REQUEST,
                                format!("Malformed frame: {e}"),
                            );
                            if let Ok(frame) = Frame::encode(events::COMMAND_RESPONSE, &reply) {
                                connection.send(frame).await;
                            }
                        }
                    }
                }
                Some(Ok(Message::Binary(_))) => {
                    debug!("Ignoring binary message from {}", id);
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    info!("{} closed WebSocket connection", id);
                    break;
                }
                Some(Err(e)) => {
                    warn!("WebSocket error for {}: {}", id, e);
                    break;
                }
            }
        }
    }

    send_task.abort();
    hub.disconnect(&id);
    info!("{} disconnected: {}", role, id);
}
