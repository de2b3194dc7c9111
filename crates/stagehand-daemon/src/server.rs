//! Server setup and lifecycle management.

use std::sync::Arc;

use stagehand_staging::{ControllerOptions, StagingController};
use stagehand_store::{InMemoryConfigSource, InMemoryObjectStore, InMemoryQueueSource};
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::api::{create_router, AppState};
use crate::config::DaemonConfig;
use crate::error::DaemonResult;

/// Staging daemon server.
pub struct Server {
    config: DaemonConfig,
    controller: Arc<StagingController>,
}

impl Server {
    /// Wire up a controller against the in-memory store.
    ///
    /// An orchestrator-backed store drops in behind the same traits; the
    /// in-memory wiring keeps the daemon self-contained for development.
    pub fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let store = Arc::new(InMemoryObjectStore::new());
        let queue_source = Arc::new(InMemoryQueueSource::new(store.clone()));
        let config_source = Arc::new(InMemoryConfigSource::new());

        let controller = StagingController::new(
            config.staging.team_name.clone(),
            config.staging.namespace.clone(),
            queue_source,
            config_source,
            store,
            config.credentials.runner_credentials(),
            ControllerOptions::default(),
        );

        Ok(Self { config, controller })
    }

    /// Run the controller loop and HTTP server until interrupted.
    pub async fn run(self) -> DaemonResult<()> {
        let addr = self.config.server.listen_addr;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let controller = self.controller.clone();
        let controller_handle = tokio::spawn(controller.run(shutdown_rx));

        let state = AppState::new(
            self.controller.clone(),
            self.config.staging.auth_token.clone(),
        );
        let app = create_router(state);

        let listener = TcpListener::bind(addr).await?;
        tracing::info!(
            team = %self.config.staging.team_name,
            namespace = %self.config.staging.namespace,
            "staging daemon listening on {}",
            addr,
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        // stop the reconcile loop; in-flight work completes naturally
        let _ = shutdown_tx.send(true);
        let _ = controller_handle.await;

        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
