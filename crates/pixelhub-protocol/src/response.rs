//! Command responses and application status codes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Application-level status codes carried in [`CommandResponse::code`].
///
/// These are not transport statuses; `100` is the success code used across
/// the game servers and consoles.
pub mod codes {
    pub const SUCCESS: u16 = 100;
    pub const BAD_REQUEST: u16 = 400;
    pub const UNAUTHORIZED: u16 = 401;
    pub const FORBIDDEN: u16 = 403;
    pub const NOT_FOUND: u16 = 404;
    pub const TIMEOUT: u16 = 408;
    pub const INTERNAL: u16 = 500;
    pub const UNAVAILABLE: u16 = 503;
}

/// `{code, message, data?}` answer to a command or management request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub code: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl CommandResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            code: codes::SUCCESS,
            message: message.into(),
            data: None,
        }
    }

    pub fn ok_with(message: impl Into<String>, data: Value) -> Self {
        Self {
            code: codes::SUCCESS,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn is_success(&self) -> bool {
        self.code == codes::SUCCESS
    }
}

/// Reply emitted by an engine node on `command:response`.
///
/// A present `token` ties the reply to a correlated request; without one the
/// reply is an unsolicited update for the consoles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(flatten)]
    pub response: CommandResponse,
}

/// One entry of an aggregated correlated result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResult {
    pub node_id: String,
    #[serde(flatten)]
    pub response: CommandResponse,
}

/// `command:result` payload: every targeted node, in target order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub code: u16,
    pub message: String,
    pub token: String,
    pub results: Vec<NodeResult>,
}

/// `command:relayed` payload acknowledging a fire-and-forget relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRelayed {
    pub code: u16,
    pub message: String,
    pub target_ids: Vec<String>,
    pub data: Value,
}
