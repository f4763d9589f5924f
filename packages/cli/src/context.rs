// ABOUTME: Builds the orchestrator object graph from configuration
// ABOUTME: Opens the database, selects the provider and wires the manager and sweeper

use arena_config::OrchestratorConfig;
use arena_instance::providers;
use arena_instance::storage::{self, StorageError};
use arena_instance::{
    ExpirySweeper, InstanceManager, InstanceRegistry, InstanceStorage, ProviderError,
    SqliteChallengeCatalog,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ContextError {
    #[error("Failed to open database: {0}")]
    Storage(#[from] StorageError),
    #[error("Failed to initialize provider: {0}")]
    Provider(#[from] ProviderError),
}

pub struct AppContext {
    pub config: OrchestratorConfig,
    pub manager: Arc<InstanceManager>,
    pub catalog: Arc<SqliteChallengeCatalog>,
}

impl AppContext {
    pub async fn from_config(config: OrchestratorConfig) -> Result<Self, ContextError> {
        let pool = storage::connect(&config.database_url).await?;

        let provider = providers::from_config(&config)?;
        match &provider {
            Some(provider) => info!("Using container provider '{}'", provider.name()),
            None => warn!("No container provider configured; instance creation is disabled"),
        }

        let catalog = Arc::new(SqliteChallengeCatalog::new(pool.clone()));
        let manager = Arc::new(InstanceManager::new(
            provider,
            Arc::new(InstanceRegistry::new()),
            Arc::new(InstanceStorage::new(pool)),
            catalog.clone(),
            config.public_entry_host.clone(),
        ));

        Ok(Self {
            config,
            manager,
            catalog,
        })
    }

    pub fn sweeper(&self) -> ExpirySweeper {
        ExpirySweeper::new(
            self.manager.clone(),
            self.config.sweep_interval,
            self.config.registry_retention,
        )
    }
}
