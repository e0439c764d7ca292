//! pixelhub: real-time relay between game engine nodes and operator consoles.
//!
//! The [`hub`] module holds the relay core (registry, dispatch table, routing
//! resolver, correlator and the [`hub::RelayHub`] composition root). The
//! [`api`] module exposes it over axum: the WebSocket endpoint plus a small
//! HTTP surface. [`server`] binds both to a listener and owns shutdown.

pub mod api;
pub mod hub;
pub mod logstore;
pub mod server;

pub use hub::{HubConfig, RelayHub};
pub use server::{ServerHandle, start};
