//! Meta server

use crate::common::{Config, Result};
use crate::meta::balancer::DummyBalancer;
use crate::meta::guardian::PartitionGuardian;
use crate::meta::http::{create_router, MetaState};
use crate::meta::server_state::ServerState;
use crate::meta::service::{start_sweep_task, MetaService};
use crate::meta::store::{MemoryStore, MetaStore, MetadataStore};
use crate::meta::transport::HttpTransport;
use std::sync::Arc;

pub struct MetaServer {
    config: Config,
}

impl MetaServer {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Restore state, start the sweep loop and serve the HTTP API until
    /// ctrl-c
    pub async fn serve(self) -> Result<()> {
        let meta = &self.config.meta;
        let sweep_interval = meta.sweep_interval()?;
        let dropout_delay = meta.replica_assign_delay_for_dropouts()?;
        let proposal_timeout = meta.proposal_timeout()?;

        tracing::info!("Starting meta server {}: {}", crate::BUILD_INFO, self.config.node_id);
        tracing::info!("  HTTP API: {}", meta.bind_addr);
        match &meta.db_path {
            Some(path) => tracing::info!("  DB path: {}", path.display()),
            None => tracing::info!("  DB path: none (in-memory)"),
        }
        tracing::info!("  Sweep interval: {:?}", sweep_interval);
        tracing::info!("  Dropout delay: {:?}", dropout_delay);

        let store: Box<dyn MetaStore> = match &meta.db_path {
            Some(path) => Box::new(MetadataStore::open(path)?),
            None => Box::new(MemoryStore::new()),
        };
        let state = ServerState::open(
            store,
            PartitionGuardian::new(dropout_delay),
            Box::new(DummyBalancer),
        )?;
        let service = Arc::new(MetaService::new(
            state,
            Arc::new(HttpTransport::new(proposal_timeout)),
        ));

        let sweep_handle = start_sweep_task(service.clone(), sweep_interval);

        let router = create_router(MetaState {
            service,
            node_id: self.config.node_id.clone(),
        });
        let listener = tokio::net::TcpListener::bind(meta.bind_addr).await?;

        tracing::info!("✓ Meta server ready");

        let res = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await;
        sweep_handle.abort();

        if let Err(e) = res {
            tracing::error!("HTTP server error: {}", e);
            return Err(e.into());
        }
        tracing::info!("Meta server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}
