//! Test utilities and common setup.

#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use pixelhub::api::{self, AppState, ControlConfig, CorsConfig};
use pixelhub::{HubConfig, RelayHub};

/// Control token accepted by [`test_app_with_token`].
pub const TEST_TOKEN: &str = "test-control-token";

/// Hub config with a short request timeout.
pub fn test_hub_config() -> HubConfig {
    HubConfig {
        request_timeout_ms: 500,
        ..HubConfig::default()
    }
}

/// Shared state with the built-in commands loaded.
pub fn test_state(token: Option<&str>) -> AppState {
    let hub = Arc::new(RelayHub::with_builtin_commands(test_hub_config()));
    AppState::new(
        hub,
        CorsConfig::default(),
        ControlConfig {
            token: token.map(str::to_string),
        },
    )
}

/// Router with the control API disabled.
pub fn test_app() -> Router {
    api::create_router(test_state(None))
}

/// Router accepting [`TEST_TOKEN`], plus its state for inspection.
pub fn test_app_with_token() -> (Router, AppState) {
    let state = test_state(Some(TEST_TOKEN));
    (api::create_router(state.clone()), state)
}
