//! Coordinator server

use std::sync::Arc;

use crate::cloud::{Inventory, Providers};
use crate::common::{Config, Result, StoreBackend};
use crate::coordinator::http::{create_router, CoordState};
use crate::coordinator::join_store::{JoinStateStore, RetryPolicy};
use crate::coordinator::register::JoinCoordinator;
use crate::coordinator::reports::ReportLog;
use crate::coordinator::sled_store::SledStateStore;
use crate::coordinator::state::{MemoryStateStore, StateStore};
use crate::Error;

pub struct Coordinator {
    config: Config,
    init_state: bool,
}

impl Coordinator {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            init_state: false,
        }
    }

    /// Create the join record at startup instead of waiting for `POST /state`
    pub fn with_state_init(mut self, init: bool) -> Self {
        self.init_state = init;
        self
    }

    pub fn open_store(config: &Config) -> Result<Arc<dyn StateStore>> {
        Ok(match config.store.backend {
            StoreBackend::Memory => Arc::new(MemoryStateStore::new()),
            StoreBackend::Sled => {
                let path = config
                    .store
                    .path
                    .as_ref()
                    .ok_or_else(|| Error::InvalidConfig("sled backend requires store.path".into()))?;
                Arc::new(SledStateStore::open(path)?)
            }
        })
    }

    /// Wire store, providers and coordinator from config
    pub fn build_state(config: Config) -> Result<CoordState> {
        let store = JoinStateStore::new(
            Self::open_store(&config)?,
            RetryPolicy::from(&config.store),
        );
        let providers =
            Providers::from_inventory(Arc::new(Inventory::new(config.inventory.clone())));
        Ok(CoordState {
            coordinator: JoinCoordinator::new(store, providers, Arc::new(config)),
            reports: Arc::new(ReportLog::new()),
        })
    }

    pub async fn serve(self) -> Result<()> {
        let bind_addr = self.config.server.bind_addr;
        tracing::info!("Starting coordinator for cluster {}", self.config.cluster.name);
        tracing::info!("  HTTP API: {}", bind_addr);
        tracing::info!("  Expected nodes: {}", self.config.cluster.hosts_num);
        tracing::info!("  Pool: {}", self.config.cluster.pool_name());
        tracing::info!("  Store: {:?}", self.config.store.backend);

        let state = Self::build_state(self.config)?;
        if self.init_state {
            let config = state.coordinator.config();
            state
                .coordinator
                .store()
                .initialize(&config.cluster.name, config.cluster.hosts_num)
                .await?;
        }

        let router = create_router(state);
        let listener = tokio::net::TcpListener::bind(bind_addr).await?;

        tracing::info!("✓ Coordinator ready");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("Coordinator stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
