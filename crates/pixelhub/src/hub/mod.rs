//! Relay hub core.
//!
//! Components, leaves first:
//! - [`registry`]: every live connection with its role and metadata.
//! - [`dispatch`]: command name to handler table, mutable at runtime.
//! - [`routing`]: decides whether a command runs on the hub or on engine nodes.
//! - [`correlator`]: token-tagged "send and collect" with one timeout per request.
//! - [`relay`]: the [`RelayHub`] composition root tying them together.
//!
//! The WebSocket transport lives in [`handler`]; it only moves frames between
//! sockets and [`RelayHub::handle_frame`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod commands;
pub mod correlator;
pub mod dispatch;
pub mod handler;
pub mod registry;
pub mod relay;
pub mod routing;

pub use correlator::{Correlator, Outcome, PendingCall, Settled, TargetReply};
pub use dispatch::{CommandContext, CommandHandler, CommandTable, HandlerError, HubView};
pub use registry::{Connection, ConnectionId, ConnectionRegistry, Outbound, RegistryError};
pub use relay::RelayHub;
pub use routing::{Route, RouteError};

/// Alias given to engine nodes that have not been renamed.
pub const DEFAULT_ALIAS: &str = "Game Server";

/// Default timeout for correlated requests.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;

/// Upper bound for per-request timeout overrides.
pub const MAX_REQUEST_TIMEOUT_MS: u64 = 60_000;

/// Hub tuning knobs, loaded from the `[hub]` config section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Alias assigned to engine nodes on connect and on blank renames.
    pub default_alias: String,
    /// Timeout applied to correlated requests without an override.
    pub request_timeout_ms: u64,
    /// Capacity of the in-memory log buffer.
    pub log_capacity: usize,
    /// Per-connection outbound queue size.
    pub outbound_buffer: usize,
}

impl HubConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Clamp a caller-supplied override to the allowed range.
    pub fn timeout_for(&self, override_ms: Option<u64>) -> Duration {
        match override_ms {
            Some(ms) if ms > 0 => Duration::from_millis(ms.min(MAX_REQUEST_TIMEOUT_MS)),
            _ => self.request_timeout(),
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            default_alias: DEFAULT_ALIAS.to_string(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            log_capacity: crate::logstore::DEFAULT_CAPACITY,
            outbound_buffer: 256,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_override_is_clamped() {
        let config = HubConfig::default();
        assert_eq!(config.timeout_for(None), Duration::from_millis(5_000));
        assert_eq!(config.timeout_for(Some(0)), Duration::from_millis(5_000));
        assert_eq!(config.timeout_for(Some(250)), Duration::from_millis(250));
        assert_eq!(
            config.timeout_for(Some(3_600_000)),
            Duration::from_millis(MAX_REQUEST_TIMEOUT_MS)
        );
    }
}
