//! Connection registry.
//!
//! Pure bookkeeping over every live connection. The registry never sends
//! frames on its own; callers take a cloned [`Connection`] out and send
//! through its outbound channel. Shard guards are never held across an
//! `.await`.

use std::fmt;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::{debug, info, warn};
use pixelhub_protocol::{ClientInfo, ClientRole, Frame, NodeInfo};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::DEFAULT_ALIAS;

/// Opaque connection id assigned at accept time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(nanoid::nanoid!())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Item on a connection's outbound queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Frame(Frame),
    /// Ask the writer task to close the socket.
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Connection {0} is already registered")]
    DuplicateConnection(ConnectionId),

    #[error("Connection {0} not found")]
    NotFound(String),
}

/// A live connection.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub role: ClientRole,
    pub authenticated: bool,
    pub display_name: Option<String>,
    /// Engine nodes only.
    pub alias: Option<String>,
    pub connected_at: DateTime<Utc>,
    sender: mpsc::Sender<Outbound>,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        role: ClientRole,
        display_name: Option<String>,
        sender: mpsc::Sender<Outbound>,
    ) -> Self {
        Self {
            id,
            role,
            authenticated: false,
            display_name,
            alias: None,
            connected_at: Utc::now(),
            sender,
        }
    }

    pub fn is_engine(&self) -> bool {
        self.role == ClientRole::Engine
    }

    /// Queue a frame. Returns `false` when the writer is gone.
    pub async fn send(&self, frame: Frame) -> bool {
        if self.sender.send(Outbound::Frame(frame)).await.is_err() {
            debug!("Dropping frame for closed connection {}", self.id);
            return false;
        }
        true
    }

    /// Queue a frame without waiting on the queue.
    ///
    /// Used for every delivery to a connection other than the one being
    /// served, so a peer that stopped reading cannot stall the caller. A full
    /// queue drops the frame.
    pub fn try_send(&self, frame: Frame) -> bool {
        match self.sender.try_send(Outbound::Frame(frame)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Outbound queue full for {}, dropping frame", self.id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Dropping frame for closed connection {}", self.id);
                false
            }
        }
    }

    /// Ask the writer task to close the socket. Never waits.
    pub fn close(&self) -> bool {
        match self.sender.try_send(Outbound::Close) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Outbound queue full for {}, close not queued", self.id);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn info(&self) -> ClientInfo {
        ClientInfo {
            id: self.id.to_string(),
            role: self.role,
            alias: self.alias.clone(),
            display_name: self.display_name.clone(),
            authenticated: self.authenticated,
            connected_at: self.connected_at,
        }
    }

    pub fn node_info(&self, default_alias: &str) -> Option<NodeInfo> {
        if !self.is_engine() {
            return None;
        }
        Some(NodeInfo {
            id: self.id.to_string(),
            alias: self
                .alias
                .clone()
                .unwrap_or_else(|| default_alias.to_string()),
            connected_at: self.connected_at,
        })
    }
}

/// Every live connection keyed by id.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Connection>,
    default_alias: String,
}

impl ConnectionRegistry {
    pub fn new(default_alias: impl Into<String>) -> Self {
        let default_alias = default_alias.into();
        let default_alias = if default_alias.trim().is_empty() {
            DEFAULT_ALIAS.to_string()
        } else {
            default_alias
        };
        Self {
            connections: DashMap::new(),
            default_alias,
        }
    }

    pub fn default_alias(&self) -> &str {
        &self.default_alias
    }

    /// Insert a connection. Engine nodes without an alias get the default one.
    pub fn add(&self, mut connection: Connection) -> Result<(), RegistryError> {
        if connection.is_engine() && connection.alias.is_none() {
            connection.alias = Some(self.default_alias.clone());
        }

        match self.connections.entry(connection.id.clone()) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateConnection(connection.id)),
            Entry::Vacant(slot) => {
                info!(
                    "Registered {} connection {}",
                    connection.role, connection.id
                );
                slot.insert(connection);
                Ok(())
            }
        }
    }

    /// Remove a connection. Unknown ids are a no-op.
    pub fn remove(&self, id: &ConnectionId) -> Option<Connection> {
        let removed = self.connections.remove(id).map(|(_, conn)| conn);
        if let Some(conn) = &removed {
            info!("Unregistered {} connection {}", conn.role, conn.id);
        }
        removed
    }

    pub fn get(&self, id: &ConnectionId) -> Result<Connection, RegistryError> {
        self.connections
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    /// Connected engine node with the given id, if any.
    pub fn engine(&self, id: &ConnectionId) -> Option<Connection> {
        self.connections
            .get(id)
            .filter(|entry| entry.is_engine())
            .map(|entry| entry.value().clone())
    }

    /// Lazily iterate connections of one role, in no particular order.
    ///
    /// Each item is a clone; collect before awaiting on any of them so no
    /// shard guard is held across a suspension point.
    pub fn by_role(&self, role: ClientRole) -> impl Iterator<Item = Connection> + '_ {
        self.connections
            .iter()
            .filter(move |entry| entry.role == role)
            .map(|entry| entry.value().clone())
    }

    /// Rename an engine node. A blank alias resets it to the default.
    ///
    /// Returns the alias actually stored.
    pub fn set_alias(&self, id: &ConnectionId, alias: &str) -> Result<String, RegistryError> {
        let mut entry = self
            .connections
            .get_mut(id)
            .filter(|entry| entry.is_engine())
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        let alias = alias.trim();
        let alias = if alias.is_empty() {
            self.default_alias.clone()
        } else {
            alias.to_string()
        };
        entry.alias = Some(alias.clone());
        Ok(alias)
    }

    /// Engine nodes ordered by connect time.
    pub fn node_list(&self) -> Vec<NodeInfo> {
        let mut nodes: Vec<NodeInfo> = self
            .connections
            .iter()
            .filter_map(|entry| entry.node_info(&self.default_alias))
            .collect();
        nodes.sort_by(|a, b| {
            a.connected_at
                .cmp(&b.connected_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        nodes
    }

    /// Every connection ordered by connect time.
    pub fn clients(&self) -> Vec<ClientInfo> {
        let mut clients: Vec<ClientInfo> =
            self.connections.iter().map(|entry| entry.info()).collect();
        clients.sort_by(|a, b| {
            a.connected_at
                .cmp(&b.connected_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        clients
    }

    pub fn count_by_role(&self, role: ClientRole) -> usize {
        self.connections
            .iter()
            .filter(|entry| entry.role == role)
            .count()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_ALIAS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn connection(id: &str, role: ClientRole) -> (Connection, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(8);
        (Connection::new(id.into(), role, None, tx), rx)
    }

    #[test]
    fn test_add_get_remove() {
        let registry = ConnectionRegistry::default();
        let (conn, _rx) = connection("c1", ClientRole::Console);

        registry.add(conn).unwrap();
        let fetched = registry.get(&"c1".into()).unwrap();
        assert_eq!(fetched.role, ClientRole::Console);
        assert!(!fetched.authenticated);

        assert!(registry.remove(&"c1".into()).is_some());
        assert_eq!(
            registry.get(&"c1".into()).unwrap_err(),
            RegistryError::NotFound("c1".to_string())
        );
        // Second removal is a no-op.
        assert!(registry.remove(&"c1".into()).is_none());
    }

    #[test]
    fn test_duplicate_connection_rejected() {
        let registry = ConnectionRegistry::default();
        let (first, _rx1) = connection("dup", ClientRole::Engine);
        let (second, _rx2) = connection("dup", ClientRole::Console);

        registry.add(first).unwrap();
        assert_eq!(
            registry.add(second),
            Err(RegistryError::DuplicateConnection("dup".into()))
        );
        assert_eq!(registry.get(&"dup".into()).unwrap().role, ClientRole::Engine);
    }

    #[test]
    fn test_engine_gets_default_alias() {
        let registry = ConnectionRegistry::new("Game Server");
        let (engine, _rx) = connection("e1", ClientRole::Engine);
        let (console, _rx2) = connection("c1", ClientRole::Console);
        registry.add(engine).unwrap();
        registry.add(console).unwrap();

        assert_eq!(
            registry.get(&"e1".into()).unwrap().alias.as_deref(),
            Some("Game Server")
        );
        assert_eq!(registry.get(&"c1".into()).unwrap().alias, None);
    }

    #[test]
    fn test_set_alias_rules() {
        let registry = ConnectionRegistry::default();
        let (engine, _rx) = connection("e1", ClientRole::Engine);
        let (console, _rx2) = connection("c1", ClientRole::Console);
        registry.add(engine).unwrap();
        registry.add(console).unwrap();

        assert_eq!(registry.set_alias(&"e1".into(), " EU-1 ").unwrap(), "EU-1");
        assert_eq!(registry.set_alias(&"e1".into(), "   ").unwrap(), DEFAULT_ALIAS);

        // Consoles and unknown ids are not engine nodes.
        assert!(matches!(
            registry.set_alias(&"c1".into(), "x"),
            Err(RegistryError::NotFound(_))
        ));
        assert!(matches!(
            registry.set_alias(&"ghost".into(), "x"),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn test_by_role_and_counts() {
        let registry = ConnectionRegistry::default();
        let mut receivers = Vec::new();
        for (id, role) in [
            ("e1", ClientRole::Engine),
            ("e2", ClientRole::Engine),
            ("c1", ClientRole::Console),
        ] {
            let (conn, rx) = connection(id, role);
            receivers.push(rx);
            registry.add(conn).unwrap();
        }

        let mut engines: Vec<String> = registry
            .by_role(ClientRole::Engine)
            .map(|c| c.id.to_string())
            .collect();
        engines.sort();
        assert_eq!(engines, vec!["e1", "e2"]);
        assert_eq!(registry.count_by_role(ClientRole::Console), 1);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_node_list_ordered_by_connect_time() {
        let registry = ConnectionRegistry::default();
        let (mut late, _rx1) = connection("late", ClientRole::Engine);
        let (mut early, _rx2) = connection("early", ClientRole::Engine);
        let now = Utc::now();
        late.connected_at = now;
        early.connected_at = now - Duration::seconds(10);

        registry.add(late).unwrap();
        registry.add(early).unwrap();

        let ids: Vec<String> = registry.node_list().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["early", "late"]);
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped() {
        let (conn, rx) = connection("c1", ClientRole::Console);
        assert!(conn.send(Frame::new("ping", serde_json::Value::Null)).await);
        drop(rx);
        assert!(!conn.send(Frame::new("ping", serde_json::Value::Null)).await);
    }

    #[test]
    fn test_try_send_drops_when_queue_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let conn = Connection::new(ConnectionId::from("c1"), ClientRole::Console, None, tx);

        assert!(conn.try_send(Frame::new("first", serde_json::Value::Null)));
        assert!(!conn.try_send(Frame::new("second", serde_json::Value::Null)));
        assert!(!conn.close());

        match rx.try_recv() {
            Ok(Outbound::Frame(frame)) => assert_eq!(frame.event, "first"),
            _ => panic!("expected the first frame"),
        }
        assert!(rx.try_recv().is_err());

        assert!(conn.close());
        assert!(matches!(rx.try_recv(), Ok(Outbound::Close)));
    }
}
