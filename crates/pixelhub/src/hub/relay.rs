//! Relay hub: the composition root.
//!
//! Owns the registry, dispatch table, correlator and log buffer, and turns
//! inbound frames into registry updates, local command executions or relays
//! between engine nodes and consoles. Every failure is answered to the
//! originating connection; nothing here takes the hub down.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, info, warn};
use pixelhub_protocol::{
    ClientRole, CommandEnvelope, CommandRelayed, CommandResponse, CommandResult, EngineCommand,
    Frame, LogKind, NodeEvent, NodeReply, NodeRequest, NodeResult, Welcome, ZonesRequest, codes,
    events,
};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::HubConfig;
use super::commands::{SERVER_NAME, load_builtin_commands};
use super::correlator::{Correlator, Outcome, Settled};
use super::dispatch::{CommandTable, HubView};
use super::registry::{Connection, ConnectionId, ConnectionRegistry, Outbound, RegistryError};
use super::routing::{self, Route};
use crate::logstore::LogStore;

/// Node events forwarded to every console, with the event name consoles see.
const RELAY_TABLE: &[(&str, &str)] = &[
    (events::COMMAND_RESPONSE, events::GAME_RESPONSE),
    (events::GAME_LOG, events::GAME_LOG),
    (events::GAME_EVENT, events::GAME_EVENT),
    (events::GAME_STATUS, events::GAME_STATUS),
    (events::PLAYER_LEAVE, events::PLAYER_LEAVE),
    (events::ZONES_LIST, events::ZONES_LIST),
];

fn relayed_event(event: &str) -> Option<&'static str> {
    RELAY_TABLE
        .iter()
        .find(|(from, _)| *from == event)
        .map(|(_, to)| *to)
}

/// Collapse a settled correlated call into the `command:result` payload.
///
/// `code` is `100` when every node replied and `408` otherwise; nodes that
/// stayed silent get their own `408` entry.
pub fn aggregate_replies(settled: Settled<ConnectionId, CommandResponse>) -> CommandResult {
    let total = settled.replies.len();
    let replied = settled
        .replies
        .iter()
        .filter(|r| !r.outcome.is_timed_out())
        .count();

    let results = settled
        .replies
        .into_iter()
        .map(|reply| NodeResult {
            node_id: reply.target.to_string(),
            response: match reply.outcome {
                Outcome::Replied(response) => response,
                Outcome::TimedOut => {
                    CommandResponse::error(codes::TIMEOUT, "Game server did not respond in time")
                }
            },
        })
        .collect();

    let (code, message) = if replied == total {
        (codes::SUCCESS, format!("{replied} game server(s) replied"))
    } else {
        (
            codes::TIMEOUT,
            format!("{replied} of {total} game server(s) replied before the timeout"),
        )
    };

    CommandResult {
        code,
        message,
        token: settled.token.to_string(),
        results,
    }
}

pub struct RelayHub {
    config: HubConfig,
    registry: ConnectionRegistry,
    commands: CommandTable,
    correlator: Correlator<ConnectionId, CommandResponse>,
    logs: LogStore,
    started_at: Instant,
}

impl RelayHub {
    /// Hub with an empty command table.
    pub fn new(config: HubConfig) -> Self {
        Self {
            registry: ConnectionRegistry::new(config.default_alias.clone()),
            commands: CommandTable::new(),
            correlator: Correlator::new(),
            logs: LogStore::new(config.log_capacity),
            started_at: Instant::now(),
            config,
        }
    }

    /// Hub with the built-in commands registered.
    pub fn with_builtin_commands(config: HubConfig) -> Self {
        let hub = Self::new(config);
        load_builtin_commands(&hub.commands);
        hub
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn commands(&self) -> &CommandTable {
        &self.commands
    }

    pub fn logs(&self) -> &LogStore {
        &self.logs
    }

    pub fn pending_requests(&self) -> usize {
        self.correlator.pending_count()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn view(&self) -> HubView<'_> {
        HubView {
            registry: &self.registry,
            commands: &self.commands,
            logs: &self.logs,
            uptime: self.uptime(),
        }
    }

    // ========== Connection lifecycle ==========

    /// Register a new connection and greet it.
    ///
    /// Returns the connection and the receiving end of its outbound queue,
    /// which the transport drains into the socket.
    pub async fn connect(
        &self,
        role: ClientRole,
        display_name: Option<String>,
    ) -> Result<(Connection, mpsc::Receiver<Outbound>), RegistryError> {
        let (tx, rx) = mpsc::channel(self.config.outbound_buffer.max(1));
        let id = ConnectionId::generate();
        self.registry
            .add(Connection::new(id.clone(), role, display_name, tx))?;
        let connection = self.registry.get(&id)?;

        let nodes = self.registry.node_list();
        let welcome = Welcome {
            message: format!("Connected to {SERVER_NAME}"),
            client_id: id.to_string(),
            client_type: role,
            node_connected: !nodes.is_empty(),
            node_list: nodes.clone(),
            server_time: Utc::now(),
        };
        self.emit(&connection, events::WELCOME, &welcome).await;

        if connection.is_engine() {
            self.logs
                .push(LogKind::Hub, format!("Game server connected: {id}"));
            let event = NodeEvent {
                message: Some("Game server connected".to_string()),
                node_id: Some(id.to_string()),
                alias: connection.alias.clone(),
                nodes,
            };
            self.broadcast_event(ClientRole::Console, events::NODE_CONNECTED, &event);
        }

        Ok((connection, rx))
    }

    /// Drop a connection. Consoles learn about departing engine nodes.
    ///
    /// Correlated requests still waiting on the node settle through their
    /// timeout.
    pub fn disconnect(&self, id: &ConnectionId) {
        let Some(connection) = self.registry.remove(id) else {
            return;
        };

        if connection.is_engine() {
            self.logs
                .push(LogKind::Hub, format!("Game server disconnected: {id}"));
            let event = NodeEvent {
                message: Some("Game server disconnected".to_string()),
                node_id: Some(id.to_string()),
                alias: connection.alias,
                nodes: self.registry.node_list(),
            };
            self.broadcast_event(ClientRole::Console, events::NODE_DISCONNECTED, &event);
        }
    }

    /// Ask every connection to close. Used on shutdown.
    pub fn shutdown(&self) {
        let connections: Vec<Connection> = self
            .registry
            .by_role(ClientRole::Engine)
            .chain(self.registry.by_role(ClientRole::Console))
            .collect();
        info!("Closing {} connection(s)", connections.len());
        for connection in connections {
            connection.close();
        }
    }

    // ========== Outbound helpers ==========

    async fn emit<T: Serialize>(&self, connection: &Connection, event: &str, payload: &T) -> bool {
        match Frame::encode(event, payload) {
            Ok(frame) => connection.send(frame).await,
            Err(e) => {
                warn!("Failed to encode '{}' for {}: {}", event, connection.id, e);
                false
            }
        }
    }

    async fn respond(&self, connection: &Connection, event: &str, response: CommandResponse) {
        self.emit(connection, event, &response).await;
    }

    fn broadcast_event<T: Serialize>(&self, role: ClientRole, event: &str, payload: &T) {
        match Frame::encode(event, payload) {
            Ok(frame) => {
                self.broadcast(role, frame);
            }
            Err(e) => warn!("Failed to encode broadcast '{}': {}", event, e),
        }
    }

    /// Send `frame` to every connection of `role`. Returns how many accepted it.
    ///
    /// Never waits: a recipient whose queue is full misses the frame.
    pub fn broadcast(&self, role: ClientRole, frame: Frame) -> usize {
        self.registry
            .by_role(role)
            .filter(|connection| connection.try_send(frame.clone()))
            .count()
    }

    pub fn broadcast_to_consoles(&self, frame: Frame) -> usize {
        self.broadcast(ClientRole::Console, frame)
    }

    pub fn broadcast_to_engines(&self, frame: Frame) -> usize {
        self.broadcast(ClientRole::Engine, frame)
    }

    // ========== Correlated sends ==========

    /// Send `cmd` to `targets` and collect one reply per target.
    ///
    /// Every target appears in the result in the given order; the ones that
    /// did not answer within `timeout` are [`Outcome::TimedOut`].
    pub async fn send(
        &self,
        targets: Vec<ConnectionId>,
        cmd: &str,
        args: Map<String, Value>,
        timeout: Duration,
    ) -> Settled<ConnectionId, CommandResponse> {
        let registry = &self.registry;
        self.correlator
            .call(targets, timeout, |target, token| {
                let connection = registry.engine(&target);
                let command = EngineCommand {
                    cmd: cmd.to_string(),
                    data: args.clone(),
                    token: Some(token.to_string()),
                };
                async move {
                    let Some(connection) = connection else {
                        debug!("Correlated target {} is not a connected node", target);
                        return;
                    };
                    match Frame::encode(events::UNITY_COMMAND, &command) {
                        Ok(frame) => {
                            connection.try_send(frame);
                        }
                        Err(e) => warn!("Failed to encode command for {}: {}", target, e),
                    }
                }
            })
            .await
    }

    // ========== Inbound frames ==========

    /// Handle one frame received from connection `id`.
    pub async fn handle_frame(self: &Arc<Self>, id: &ConnectionId, frame: Frame) {
        let Ok(connection) = self.registry.get(id) else {
            debug!("Frame '{}' from unknown connection {}", frame.event, id);
            return;
        };
        let Frame { event, data } = frame;

        match event.as_str() {
            events::COMMAND | events::UNITY_COMMAND => {
                self.handle_command(&connection, &data).await
            }
            events::HUB_COMMAND | events::SVELTE_COMMAND => {
                self.handle_local_command(&connection, &data).await
            }
            events::WEB_TO_UNITY => self.handle_web_to_unity(&connection, &data).await,
            events::NODE_LIST => self.handle_node_list(&connection).await,
            events::SET_ALIAS => self.handle_set_alias(&connection, data).await,
            events::DISCONNECT_NODE => self.handle_disconnect_node(&connection, data).await,
            events::STOP_NODE => self.handle_stop_node(&connection, data).await,
            events::ZONES_LIST if !connection.is_engine() => {
                self.request_zones(&connection, data).await
            }
            events::COMMAND_RESPONSE if connection.is_engine() => {
                self.handle_node_reply(&connection, data).await
            }
            other if connection.is_engine() => self.relay_from_node(&connection, other, data).await,
            other => {
                debug!("Unknown event '{}' from console {}", other, connection.id);
                self.respond(
                    &connection,
                    events::COMMAND_RESPONSE,
                    CommandResponse::error(codes::NOT_FOUND, format!("Unknown event: {other}")),
                )
                .await;
            }
        }
    }

    async fn handle_command(self: &Arc<Self>, connection: &Connection, data: &Value) {
        let envelope = match CommandEnvelope::parse(data) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.respond(
                    connection,
                    events::COMMAND_RESPONSE,
                    CommandResponse::error(codes::BAD_REQUEST, e.to_string()),
                )
                .await;
                return;
            }
        };

        match routing::resolve(&envelope, connection.role, &self.registry) {
            Err(e) => {
                debug!("Command '{}' from {}: {}", envelope.cmd, connection.id, e);
                self.respond(
                    connection,
                    events::COMMAND_RESPONSE,
                    CommandResponse::error(e.code(), e.to_string()),
                )
                .await;
            }
            Ok(Route::Local) => {
                self.execute_local(connection, &envelope.cmd, envelope.args)
                    .await
            }
            Ok(Route::EngineFanout(targets)) => {
                self.relay_to_engines(connection, envelope, targets).await
            }
            Ok(Route::EngineTargeted { targets, missing }) => {
                for node_id in missing {
                    self.respond(
                        connection,
                        events::COMMAND_RESPONSE,
                        CommandResponse::error(
                            codes::NOT_FOUND,
                            format!("Game server not found: {node_id}"),
                        )
                        .with_data(json!({ "nodeId": node_id })),
                    )
                    .await;
                }
                if !targets.is_empty() {
                    self.relay_to_engines(connection, envelope, targets).await;
                }
            }
        }
    }

    async fn handle_local_command(&self, connection: &Connection, data: &Value) {
        match CommandEnvelope::parse(data) {
            Ok(envelope) => {
                self.execute_local(connection, &envelope.cmd, envelope.args)
                    .await
            }
            Err(e) => {
                self.respond(
                    connection,
                    events::COMMAND_RESPONSE,
                    CommandResponse::error(codes::BAD_REQUEST, e.to_string()),
                )
                .await
            }
        }
    }

    async fn execute_local(&self, connection: &Connection, cmd: &str, args: Map<String, Value>) {
        debug!("Executing '{}' locally for {}", cmd, connection.id);
        let replies = self.commands.execute(self.view(), connection, cmd, args);
        for reply in replies {
            self.respond(connection, events::COMMAND_RESPONSE, reply)
                .await;
        }
    }

    async fn relay_to_engines(
        self: &Arc<Self>,
        connection: &Connection,
        envelope: CommandEnvelope,
        targets: Vec<ConnectionId>,
    ) {
        if envelope.expect_reply {
            let hub = Arc::clone(self);
            let caller = connection.clone();
            let timeout = self.config.timeout_for(envelope.timeout_ms);
            tokio::spawn(async move {
                let settled = hub
                    .send(targets, &envelope.cmd, envelope.args, timeout)
                    .await;
                let result = aggregate_replies(settled);
                info!(
                    "Correlated '{}' for {} settled: {}",
                    envelope.cmd, caller.id, result.message
                );
                hub.emit(&caller, events::COMMAND_RESULT, &result).await;
            });
            return;
        }

        let command = EngineCommand {
            cmd: envelope.cmd.clone(),
            data: envelope.args,
            token: None,
        };
        let frame = match Frame::encode(events::UNITY_COMMAND, &command) {
            Ok(frame) => frame,
            Err(e) => {
                self.respond(
                    connection,
                    events::COMMAND_RESPONSE,
                    CommandResponse::error(codes::INTERNAL, e.to_string()),
                )
                .await;
                return;
            }
        };

        let mut delivered = Vec::with_capacity(targets.len());
        for target in targets {
            if let Some(node) = self.registry.engine(&target)
                && node.try_send(frame.clone())
            {
                delivered.push(target.to_string());
            }
        }

        if delivered.is_empty() {
            self.respond(
                connection,
                events::COMMAND_RESPONSE,
                CommandResponse::error(codes::UNAVAILABLE, "No game server accepted the command"),
            )
            .await;
            return;
        }

        info!(
            "Relayed '{}' from {} to {} node(s)",
            command.cmd,
            connection.id,
            delivered.len()
        );
        let relayed = CommandRelayed {
            code: codes::SUCCESS,
            message: format!(
                "Command relayed to {} game server(s): {}",
                delivered.len(),
                command.cmd
            ),
            target_ids: delivered,
            data: json!({ "cmd": command.cmd, "data": command.data }),
        };
        self.emit(connection, events::COMMAND_RELAYED, &relayed)
            .await;
    }

    async fn handle_web_to_unity(self: &Arc<Self>, connection: &Connection, data: &Value) {
        if connection.role != ClientRole::Console {
            self.respond(
                connection,
                events::COMMAND_RESPONSE,
                CommandResponse::error(
                    codes::FORBIDDEN,
                    "webToUnity is only available to consoles",
                ),
            )
            .await;
            return;
        }

        let Some(cmd) = data.get("cmd").and_then(Value::as_str) else {
            self.respond(
                connection,
                events::COMMAND_RESPONSE,
                CommandResponse::error(codes::BAD_REQUEST, "webToUnity requires `cmd`"),
            )
            .await;
            return;
        };
        let inner = data.get("data").cloned().unwrap_or(Value::Null);

        match cmd {
            events::UNITY_COMMAND => self.handle_command(connection, &inner).await,
            events::ZONES_LIST => self.request_zones(connection, inner).await,
            other => {
                self.respond(
                    connection,
                    events::COMMAND_RESPONSE,
                    CommandResponse::error(
                        codes::NOT_FOUND,
                        format!("Unsupported webToUnity command: {other}"),
                    ),
                )
                .await
            }
        }
    }

    // ========== Node administration ==========

    /// Consoles only; anyone else gets a `403` on `response_event`.
    async fn require_console(&self, connection: &Connection, response_event: &str) -> bool {
        if connection.role == ClientRole::Console {
            return true;
        }
        self.respond(
            connection,
            response_event,
            CommandResponse::error(codes::FORBIDDEN, "Permission denied"),
        )
        .await;
        false
    }

    async fn parse_node_request(
        &self,
        connection: &Connection,
        response_event: &str,
        data: Value,
    ) -> Option<NodeRequest> {
        match serde_json::from_value::<NodeRequest>(data) {
            Ok(request) => Some(request),
            Err(e) => {
                self.respond(
                    connection,
                    response_event,
                    CommandResponse::error(codes::BAD_REQUEST, format!("Invalid request: {e}")),
                )
                .await;
                None
            }
        }
    }

    async fn handle_node_list(&self, connection: &Connection) {
        if !self.require_console(connection, events::NODE_LIST).await {
            return;
        }
        let event = NodeEvent {
            message: None,
            node_id: None,
            alias: None,
            nodes: self.registry.node_list(),
        };
        self.emit(connection, events::NODE_LIST, &event).await;
    }

    async fn handle_set_alias(&self, connection: &Connection, data: Value) {
        let reply_to = events::SET_ALIAS_RESPONSE;
        if !self.require_console(connection, reply_to).await {
            return;
        }
        let Some(request) = self.parse_node_request(connection, reply_to, data).await else {
            return;
        };

        let node_id = ConnectionId::from(request.node_id.as_str());
        let alias = match self
            .registry
            .set_alias(&node_id, request.alias.as_deref().unwrap_or_default())
        {
            Ok(alias) => alias,
            Err(_) => {
                self.respond(
                    connection,
                    reply_to,
                    CommandResponse::error(
                        codes::NOT_FOUND,
                        format!("Game server not found: {}", request.node_id),
                    ),
                )
                .await;
                return;
            }
        };

        info!("Alias of node {} set to '{}'", node_id, alias);
        self.respond(
            connection,
            reply_to,
            CommandResponse::ok_with(
                format!("Alias changed to \"{alias}\""),
                json!({ "nodeId": request.node_id, "alias": alias }),
            ),
        )
        .await;

        let event = NodeEvent {
            message: None,
            node_id: Some(request.node_id),
            alias: Some(alias),
            nodes: self.registry.node_list(),
        };
        self.broadcast_event(ClientRole::Console, events::NODE_ALIAS_CHANGED, &event);
    }

    async fn handle_disconnect_node(&self, connection: &Connection, data: Value) {
        let reply_to = events::DISCONNECT_NODE_RESPONSE;
        if !self.require_console(connection, reply_to).await {
            return;
        }
        let Some(request) = self.parse_node_request(connection, reply_to, data).await else {
            return;
        };

        let response = match self.registry.engine(&request.node_id.as_str().into()) {
            Some(node) => {
                info!("Force disconnecting node {}", node.id);
                node.close();
                CommandResponse::ok(format!("Game server disconnected: {}", request.node_id))
            }
            None => CommandResponse::error(
                codes::NOT_FOUND,
                format!("Game server not found: {}", request.node_id),
            ),
        };
        self.respond(connection, reply_to, response).await;
    }

    async fn handle_stop_node(&self, connection: &Connection, data: Value) {
        let reply_to = events::STOP_NODE_RESPONSE;
        if !self.require_console(connection, reply_to).await {
            return;
        }
        let Some(request) = self.parse_node_request(connection, reply_to, data).await else {
            return;
        };

        let response = match self.registry.engine(&request.node_id.as_str().into()) {
            Some(node) => {
                info!("Asking node {} to stop", node.id);
                self.logs
                    .push(LogKind::Hub, format!("Stop requested for {}", node.id));
                node.try_send(Frame::new(events::SERVER_STOP, json!({})));
                CommandResponse::ok(format!("Stop requested: {}", request.node_id))
            }
            None => CommandResponse::error(
                codes::NOT_FOUND,
                format!("Game server not found: {}", request.node_id),
            ),
        };
        self.respond(connection, reply_to, response).await;
    }

    /// Console zone listing: the named node or the first connected one.
    async fn request_zones(&self, connection: &Connection, data: Value) {
        let request: ZonesRequest = serde_json::from_value(data).unwrap_or_default();

        let node = match request.target_node.as_deref() {
            Some(id) if !id.is_empty() => match self.registry.engine(&id.into()) {
                Some(node) => node,
                None => {
                    self.emit(
                        connection,
                        events::ZONES_LIST,
                        &json!({
                            "code": codes::NOT_FOUND,
                            "message": format!("Game server not found: {id}"),
                            "zones": [],
                        }),
                    )
                    .await;
                    return;
                }
            },
            _ => {
                let first = self
                    .registry
                    .node_list()
                    .into_iter()
                    .find_map(|info| self.registry.engine(&info.id.into()));
                match first {
                    Some(node) => node,
                    None => {
                        self.emit(
                            connection,
                            events::ZONES_LIST,
                            &json!({
                                "code": codes::UNAVAILABLE,
                                "message": "No game server is connected",
                                "zones": [],
                            }),
                        )
                        .await;
                        return;
                    }
                }
            }
        };

        node.try_send(Frame::new(events::ZONES_LIST, json!({})));
    }

    // ========== Node-originated frames ==========

    async fn handle_node_reply(&self, connection: &Connection, data: Value) {
        let reply: NodeReply = match serde_json::from_value(data.clone()) {
            Ok(reply) => reply,
            Err(_) => {
                // Not a structured reply; relay it untouched.
                self.relay_from_node(connection, events::COMMAND_RESPONSE, data)
                    .await;
                return;
            }
        };

        match reply.token {
            Some(token) => {
                let accepted = Uuid::parse_str(&token)
                    .map(|token| self.correlator.resolve(&token, &connection.id, reply.response))
                    .unwrap_or(false);
                if !accepted {
                    debug!("Dropping reply from {} for token {}", connection.id, token);
                }
            }
            None => {
                self.relay_from_node(connection, events::COMMAND_RESPONSE, data)
                    .await
            }
        }
    }

    async fn relay_from_node(&self, connection: &Connection, event: &str, data: Value) {
        let Some(console_event) = relayed_event(event) else {
            debug!("Ignoring unknown event '{}' from node {}", event, connection.id);
            return;
        };

        if event == events::GAME_LOG {
            let message = match &data {
                Value::String(text) => text.clone(),
                Value::Object(map) => map
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| data.to_string()),
                other => other.to_string(),
            };
            self.logs.push(LogKind::Engine, message);
        }

        let delivered = self.broadcast_to_consoles(Frame::new(console_event, data));
        debug!(
            "Relayed '{}' from node {} to {} console(s)",
            console_event, connection.id, delivered
        );
    }
}
