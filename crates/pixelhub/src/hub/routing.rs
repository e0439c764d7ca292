//! Routing resolver.
//!
//! Decides where a command envelope executes: on the hub's dispatch table,
//! on every engine node, or on specific engine nodes. Resolution reads the
//! registry at call time and has no side effects.

use std::collections::HashSet;

use pixelhub_protocol::{ClientRole, CommandEnvelope, TargetTag, codes};
use thiserror::Error;

use super::registry::{ConnectionId, ConnectionRegistry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Execute on the hub.
    Local,
    /// Every connected engine node, in connect order.
    EngineFanout(Vec<ConnectionId>),
    /// Named engine nodes. `missing` lists requested ids that are not
    /// connected engines; each gets its own `404`.
    EngineTargeted {
        targets: Vec<ConnectionId>,
        missing: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("No game server is connected")]
    NoEngines,
}

impl RouteError {
    pub fn code(&self) -> u16 {
        match self {
            RouteError::NoEngines => codes::UNAVAILABLE,
        }
    }
}

/// Explicit target wins; otherwise consoles talk to engines and engines
/// talk to the hub.
pub fn effective_target(explicit: Option<TargetTag>, sender: ClientRole) -> TargetTag {
    match (explicit, sender) {
        (Some(target), _) => target,
        (None, ClientRole::Console) => TargetTag::Engine,
        (None, ClientRole::Engine) => TargetTag::Local,
    }
}

pub fn resolve(
    envelope: &CommandEnvelope,
    sender: ClientRole,
    registry: &ConnectionRegistry,
) -> Result<Route, RouteError> {
    if effective_target(envelope.target, sender) == TargetTag::Local {
        return Ok(Route::Local);
    }

    if !envelope.target_nodes.is_empty() {
        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        let mut missing = Vec::new();

        for raw in &envelope.target_nodes {
            if !seen.insert(raw.as_str()) {
                continue;
            }
            let id = ConnectionId::from(raw.as_str());
            if registry.engine(&id).is_some() {
                targets.push(id);
            } else {
                missing.push(raw.clone());
            }
        }

        return Ok(Route::EngineTargeted { targets, missing });
    }

    let engines: Vec<ConnectionId> = registry
        .node_list()
        .into_iter()
        .map(|node| ConnectionId::from(node.id))
        .collect();

    if engines.is_empty() {
        return Err(RouteError::NoEngines);
    }
    Ok(Route::EngineFanout(engines))
}
