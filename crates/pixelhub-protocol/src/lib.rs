//! Wire protocol for the pixelhub relay.
//!
//! Every WebSocket text message exchanged with the hub is a [`Frame`]: an
//! event name plus a JSON payload. Engine nodes (game servers) and console
//! connections (operator dashboards) share the same framing; the event name
//! decides how the hub treats the payload.
//!
//! Modules:
//! - [`frame`]: the frame envelope and the event name constants.
//! - [`command`]: command envelopes, routing targets and typed arguments.
//! - [`response`]: command responses and the application status codes.
//! - [`node`]: client roles, node listings and management payloads.
//! - [`logs`]: entries of the hub's in-memory log buffer.

pub mod command;
pub mod frame;
pub mod logs;
pub mod node;
pub mod response;

pub use command::{CommandArgs, CommandEnvelope, EngineCommand, EnvelopeError, TargetTag};
pub use frame::{Frame, events};
pub use logs::{LogEntry, LogKind};
pub use node::{
    ClientInfo, ClientRole, NodeEvent, NodeInfo, NodeRequest, Welcome, ZonesRequest,
};
pub use response::{
    CommandRelayed, CommandResponse, CommandResult, NodeReply, NodeResult, codes,
};
