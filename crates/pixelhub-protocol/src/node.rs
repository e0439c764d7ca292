//! Client roles, node listings and node management payloads.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role a connection declares at handshake time. Immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientRole {
    /// A game server instance executing commands.
    Engine,
    /// An operator dashboard.
    Console,
}

impl ClientRole {
    /// Map the handshake `clientType` value to a role.
    ///
    /// `engine` and `unity` identify game servers; anything else, including a
    /// missing value, is a console.
    pub fn from_handshake(client_type: Option<&str>) -> Self {
        match client_type {
            Some("engine") | Some("unity") => ClientRole::Engine,
            _ => ClientRole::Console,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ClientRole::Engine => "engine",
            ClientRole::Console => "console",
        }
    }
}

impl fmt::Display for ClientRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One connected engine node as shown to consoles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub id: String,
    pub alias: String,
    pub connected_at: DateTime<Utc>,
}

/// Any connection, as exposed over the HTTP API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub id: String,
    pub role: ClientRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub authenticated: bool,
    pub connected_at: DateTime<Utc>,
}

/// First frame every connection receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Welcome {
    pub message: String,
    pub client_id: String,
    pub client_type: ClientRole,
    pub node_connected: bool,
    pub node_list: Vec<NodeInfo>,
    pub server_time: DateTime<Utc>,
}

/// Payload of `unity:connected`, `unity:disconnected`, `unity:alias-changed`
/// and `unity:list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub nodes: Vec<NodeInfo>,
}

/// Console request naming a node: set-alias, disconnect and stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRequest {
    #[serde(alias = "unitySocketId")]
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

/// Console `zones:list` request. Without a node the first engine answers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZonesRequest {
    #[serde(
        default,
        alias = "targetUnityId",
        alias = "nodeId",
        skip_serializing_if = "Option::is_none"
    )]
    pub target_node: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_from_handshake() {
        assert_eq!(ClientRole::from_handshake(Some("unity")), ClientRole::Engine);
        assert_eq!(ClientRole::from_handshake(Some("engine")), ClientRole::Engine);
        assert_eq!(ClientRole::from_handshake(Some("svelte")), ClientRole::Console);
        assert_eq!(ClientRole::from_handshake(None), ClientRole::Console);
    }

    #[test]
    fn test_node_request_accepts_legacy_key() {
        let req: NodeRequest =
            serde_json::from_value(json!({ "unitySocketId": "n1", "alias": "EU-1" })).unwrap();
        assert_eq!(req.node_id, "n1");
        assert_eq!(req.alias.as_deref(), Some("EU-1"));
    }

    #[test]
    fn test_zones_request_aliases() {
        let req: ZonesRequest = serde_json::from_value(json!({ "targetUnityId": "n2" })).unwrap();
        assert_eq!(req.target_node.as_deref(), Some("n2"));

        let req: ZonesRequest = serde_json::from_value(json!({})).unwrap();
        assert_eq!(req.target_node, None);
    }
}
