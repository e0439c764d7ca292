//! HTTP API module.
//!
//! Serves the WebSocket endpoint plus a small REST surface for inspecting
//! the hub and driving it from scripts.

mod error;
mod handlers;
mod routes;
mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::create_router;
pub use state::{AppState, ControlConfig, CorsConfig};
