//! Application state shared across handlers.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::hub::RelayHub;

/// CORS allow-list, loaded from the `[cors]` config section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Allowed origins. Empty allows any origin.
    pub allowed_origins: Vec<String>,
}

/// Control API settings, loaded from the `[control]` config section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Shared secret for `/api/control` and node fetches. Unset disables them.
    pub token: Option<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<RelayHub>,
    pub cors: CorsConfig,
    pub control: ControlConfig,
}

impl AppState {
    pub fn new(hub: Arc<RelayHub>, cors: CorsConfig, control: ControlConfig) -> Self {
        Self { hub, cors, control }
    }
}
