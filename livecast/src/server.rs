//! Server lifecycle management
//!
//! Runs the HTTP front until a shutdown signal, then stops every live
//! stream before exiting.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use livecast_api::{create_router, AppState};
use livecast_core::Config;
use livecast_livestream::StreamOrchestrator;

pub struct LivecastServer {
    config: Arc<Config>,
    orchestrator: Arc<StreamOrchestrator>,
}

impl LivecastServer {
    pub const fn new(config: Arc<Config>, orchestrator: Arc<StreamOrchestrator>) -> Self {
        Self {
            config,
            orchestrator,
        }
    }

    /// Start the HTTP server and wait for a shutdown signal
    pub async fn start(self) -> anyhow::Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut http_handle = self.start_http_server(shutdown_rx).await?;

        info!("All servers started successfully");

        let http_finished = tokio::select! {
            _ = &mut http_handle => {
                error!("HTTP server stopped unexpectedly");
                true
            }
            () = shutdown_signal() => {
                info!("Shutdown signal received, starting graceful shutdown...");
                false
            }
        };

        // Stop accepting requests first so no stream starts mid-shutdown
        let _ = shutdown_tx.send(true);
        if !http_finished {
            if let Err(e) = http_handle.await {
                error!("HTTP server task failed: {}", e);
            }
        }

        self.shutdown().await;

        Ok(())
    }

    async fn shutdown(&self) {
        info!("Shutting down Livecast server...");

        let active = self.orchestrator.list_active().len();
        info!("Stopping {} active stream(s)...", active);
        self.orchestrator.shutdown().await;

        info!("Livecast server shut down complete");
    }

    /// Bind the HTTP listener and serve in a background task
    async fn start_http_server(
        &self,
        shutdown_rx: watch::Receiver<bool>,
    ) -> anyhow::Result<JoinHandle<()>> {
        let http_address = self.config.http_address();
        let http_addr: std::net::SocketAddr = http_address
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid HTTP address '{http_address}': {e}"))?;

        let listener = tokio::net::TcpListener::bind(http_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind HTTP address {http_addr}: {e}"))?;

        let router = create_router(AppState::new(
            Arc::clone(&self.orchestrator),
            Arc::clone(&self.config),
        ));

        info!("HTTP server listening on {}", http_addr);

        let handle = tokio::spawn(async move {
            let mut rx = shutdown_rx;
            let graceful = async move {
                let _ = rx.changed().await;
            };

            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(graceful)
                .await
            {
                error!("HTTP server error: {}", e);
            }

            info!("HTTP server shut down gracefully");
        });

        Ok(handle)
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C signal");
            }
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
