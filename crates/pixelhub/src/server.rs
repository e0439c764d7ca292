//! Listener setup and shutdown.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::api::{self, AppState};

/// Running hub server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    state: AppState,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Close every connection, then stop accepting and wait for the server
    /// task to finish.
    pub async fn stop(mut self) -> Result<()> {
        self.state.hub.shutdown();
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.task.await.context("joining server task")?
    }
}

/// Bind `host:port` and serve the hub in a background task.
///
/// Port `0` picks a free port; see [`ServerHandle::local_addr`].
pub async fn start(state: AppState, host: &str, port: u16) -> Result<ServerHandle> {
    let listener = TcpListener::bind((host, port))
        .await
        .with_context(|| format!("binding to {host}:{port}"))?;
    let local_addr = listener.local_addr().context("reading local address")?;
    info!("Listening on {}", local_addr);

    let app = api::create_router(state.clone());
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                if shutdown_rx.await.is_err() {
                    warn!("Shutdown handle dropped");
                }
            })
            .await
            .context("running server")
    });

    Ok(ServerHandle {
        local_addr,
        state,
        shutdown_tx: Some(shutdown_tx),
        task,
    })
}
