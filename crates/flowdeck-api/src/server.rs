use std::net::SocketAddr;

use anyhow::{Context, Result};
use flowdeck_core::Settings;
use flowdeck_store::Store;
use tokio::signal;
use tracing::{info, warn};

use crate::{create_router, AppState};

pub struct Server {
    state: AppState,
    addr: SocketAddr,
}

impl Server {
    /// Opens the database and clears presence left over from the previous run.
    pub fn new(settings: Settings) -> Result<Self> {
        let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
            .parse()
            .with_context(|| {
                format!(
                    "invalid listen address {}:{}",
                    settings.server.host, settings.server.port
                )
            })?;

        let store = Store::open(&settings.database.path)
            .with_context(|| format!("opening database {}", settings.database.path))?;
        let stale = store.reset_presence()?;
        if stale > 0 {
            info!(users = stale, "Cleared stale online flags");
        }

        Ok(Self {
            state: AppState::new(settings, store),
            addr,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub async fn run(self) -> Result<()> {
        let router = create_router(self.state);

        info!("Starting FlowDeck server on {}", self.addr);

        let listener = {
            let socket = if self.addr.is_ipv6() {
                tokio::net::TcpSocket::new_v6()
            } else {
                tokio::net::TcpSocket::new_v4()
            }?;

            // Reuse addr/port to improve rebind under restarts
            let _ = socket.set_reuseaddr(true);
            #[cfg(unix)]
            let _ = socket.set_reuseport(true);

            // Long-lived websocket clients benefit from OS keepalive
            let _ = socket.set_keepalive(true);

            socket
                .bind(self.addr)
                .with_context(|| format!("binding {}", self.addr))?;
            socket.listen(1024)?
        };

        info!("Server listening on http://{}", self.addr);
        info!("  GET /health - Readiness with database check");
        info!("  GET /health/live - Liveness probe");
        info!("  /api/v1/* - JSON API (Bearer token)");
        info!("  ws://{}/ws?token=<jwt> - Real-time chat and presence", self.addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("server error")?;

        info!("Server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
