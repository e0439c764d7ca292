//! Frame envelope shared by every connection.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single message on the wire: `{"event": "...", "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Build a frame from any serializable payload.
    pub fn encode<T: Serialize>(
        event: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(event, serde_json::to_value(payload)?))
    }
}

/// Event names understood or emitted by the hub.
///
/// The `unity:` prefix is kept on node administration events because the
/// game servers and consoles already speak it.
pub mod events {
    // ========== Commands ==========
    /// Routed command submission (resolver decides local vs engine).
    pub const COMMAND: &str = "command";
    /// Routed command submission, engine-facing spelling. Also the event the
    /// hub uses to forward commands to engine nodes.
    pub const UNITY_COMMAND: &str = "unity:command";
    /// Command that always executes on the hub.
    pub const HUB_COMMAND: &str = "hub:command";
    /// Legacy spelling of [`HUB_COMMAND`].
    pub const SVELTE_COMMAND: &str = "svelte:command";
    /// Console-only wrapper `{cmd, data}` for engine-bound requests.
    pub const WEB_TO_UNITY: &str = "webToUnity";

    // ========== Responses ==========
    pub const COMMAND_RESPONSE: &str = "command:response";
    pub const COMMAND_RELAYED: &str = "command:relayed";
    pub const COMMAND_RESULT: &str = "command:result";

    // ========== Connection lifecycle ==========
    pub const WELCOME: &str = "welcome";
    pub const NODE_CONNECTED: &str = "unity:connected";
    pub const NODE_DISCONNECTED: &str = "unity:disconnected";
    pub const NODE_ALIAS_CHANGED: &str = "unity:alias-changed";

    // ========== Node administration ==========
    pub const NODE_LIST: &str = "unity:list";
    pub const SET_ALIAS: &str = "unity:set-alias";
    pub const SET_ALIAS_RESPONSE: &str = "unity:set-alias:response";
    pub const DISCONNECT_NODE: &str = "unity:disconnect";
    pub const DISCONNECT_NODE_RESPONSE: &str = "unity:disconnect:response";
    pub const STOP_NODE: &str = "unity:stop";
    pub const STOP_NODE_RESPONSE: &str = "unity:stop:response";
    /// Sent to an engine node asked to shut itself down.
    pub const SERVER_STOP: &str = "server:stop";

    // ========== Node-originated events ==========
    pub const ZONES_LIST: &str = "zones:list";
    pub const GAME_RESPONSE: &str = "game:response";
    pub const GAME_LOG: &str = "game:log";
    pub const GAME_EVENT: &str = "game:event";
    pub const GAME_STATUS: &str = "game:status";
    pub const PLAYER_LEAVE: &str = "player:leave";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_without_data_defaults_to_null() {
        let frame: Frame = serde_json::from_str(r#"{"event":"unity:list"}"#).unwrap();
        assert_eq!(frame.event, events::NODE_LIST);
        assert!(frame.data.is_null());
    }

    #[test]
    fn test_frame_encode_payload() {
        #[derive(Serialize)]
        struct Payload {
            value: u32,
        }

        let frame = Frame::encode("game:event", &Payload { value: 7 }).unwrap();
        assert_eq!(frame.data, json!({ "value": 7 }));
        let text = serde_json::to_string(&frame).unwrap();
        assert_eq!(text, r#"{"event":"game:event","data":{"value":7}}"#);
    }
}
