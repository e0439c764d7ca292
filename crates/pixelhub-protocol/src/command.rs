//! Command envelopes.
//!
//! Consoles and engine nodes submit commands as
//! `{cmd, target?, targetNodes?, args?, expectReply?, timeoutMs?}`. The hub
//! validates the envelope here before routing it anywhere, so a malformed
//! submission is always answered with `400` instead of being dropped.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::logs::LogKind;

/// Legacy argument naming a single target node.
const LEGACY_TARGET_KEY: &str = "targetUnityId";

/// Validation failures for inbound command envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    #[error("Command data is empty or missing `cmd`")]
    MissingCommand,

    #[error("Unsupported command target: {0}")]
    UnsupportedTarget(String),

    #[error("Command arguments must be a JSON object")]
    ArgsNotObject,

    #[error("Invalid arguments for `{command}`: {reason}")]
    InvalidArgs { command: String, reason: String },

    #[error("Malformed command envelope: {0}")]
    Malformed(String),
}

/// Explicit execution target of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetTag {
    /// Forward to engine nodes.
    Engine,
    /// Execute on the hub's dispatch table.
    Local,
}

impl TargetTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetTag::Engine => "engine",
            TargetTag::Local => "local",
        }
    }
}

impl fmt::Display for TargetTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetTag {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "engine" | "unity" => Ok(TargetTag::Engine),
            "local" | "hub" | "socketIO" => Ok(TargetTag::Local),
            other => Err(EnvelopeError::UnsupportedTarget(other.to_string())),
        }
    }
}

/// A validated command submission.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEnvelope {
    pub cmd: String,
    pub target: Option<TargetTag>,
    /// Specific engine node ids; empty means "all engine nodes".
    pub target_nodes: Vec<String>,
    pub args: Map<String, Value>,
    /// Collect replies through the correlator instead of fire-and-forget.
    pub expect_reply: bool,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnvelope {
    #[serde(default)]
    cmd: Option<Value>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default, alias = "targetServers")]
    target_nodes: Option<Vec<String>>,
    #[serde(default)]
    args: Option<Value>,
    #[serde(default)]
    expect_reply: Option<bool>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

impl CommandEnvelope {
    /// Build a local or routed envelope with no targeting hints.
    pub fn new(cmd: impl Into<String>, args: Map<String, Value>) -> Self {
        Self {
            cmd: cmd.into(),
            target: None,
            target_nodes: Vec::new(),
            args,
            expect_reply: false,
            timeout_ms: None,
        }
    }

    /// Validate a raw frame payload.
    pub fn parse(data: &Value) -> Result<Self, EnvelopeError> {
        if !data.is_object() {
            return Err(EnvelopeError::MissingCommand);
        }

        let raw: RawEnvelope = serde_json::from_value(data.clone())
            .map_err(|e| EnvelopeError::Malformed(e.to_string()))?;

        let cmd = match raw.cmd {
            Some(Value::String(cmd)) if !cmd.trim().is_empty() => cmd,
            _ => return Err(EnvelopeError::MissingCommand),
        };

        let target = raw.target.as_deref().map(TargetTag::from_str).transpose()?;

        let mut args = match raw.args {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => return Err(EnvelopeError::ArgsNotObject),
        };

        let mut target_nodes = raw.target_nodes.unwrap_or_default();
        if let Some(legacy) = args.remove(LEGACY_TARGET_KEY)
            && let Value::String(id) = legacy
            && !id.is_empty()
            && !target_nodes.contains(&id)
        {
            target_nodes.push(id);
        }

        Ok(Self {
            cmd,
            target,
            target_nodes,
            args,
            expect_reply: raw.expect_reply.unwrap_or(false),
            timeout_ms: raw.timeout_ms,
        })
    }
}

/// Payload forwarded to engine nodes on `unity:command`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineCommand {
    pub cmd: String,
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Typed arguments for commands executed on the hub.
///
/// Built-in commands get their own variant; anything registered at runtime
/// by an extension receives the raw argument map.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandArgs {
    /// Commands that take no arguments (`status`, `ping`, `help`, ...).
    None,
    /// `logs`: tail of the hub log buffer.
    Logs {
        limit: Option<usize>,
        kind: Option<LogKind>,
    },
    /// Extension commands.
    Opaque(Map<String, Value>),
}

#[derive(Debug, Default, Deserialize)]
struct LogsArgs {
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    kind: Option<LogKind>,
}

impl CommandArgs {
    /// Decode the argument map for the named command.
    pub fn decode(cmd: &str, args: Map<String, Value>) -> Result<Self, EnvelopeError> {
        match cmd {
            "status" | "ping" | "help" | "server:info" | "logs:clear" => Ok(CommandArgs::None),
            "logs" => {
                let parsed: LogsArgs = serde_json::from_value(Value::Object(args)).map_err(|e| {
                    EnvelopeError::InvalidArgs {
                        command: cmd.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                Ok(CommandArgs::Logs {
                    limit: parsed.limit,
                    kind: parsed.kind,
                })
            }
            _ => Ok(CommandArgs::Opaque(args)),
        }
    }
}
