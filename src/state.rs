use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use super::{
    config::Config,
    database::DocumentStore,
    error::AppError,
    firestore::{FirestoreStore, ServiceAccount},
};

/// Store handle decided once at startup.
pub enum Store {
    Configured(Arc<dyn DocumentStore>),
    Unconfigured,
}

impl Store {
    pub fn handle(&self) -> Result<&dyn DocumentStore, AppError> {
        match self {
            Store::Configured(store) => Ok(store.as_ref()),
            Store::Unconfigured => Err(AppError::NotConfigured),
        }
    }
}

pub struct AppState {
    pub config: Config,
    pub store: Store,
}

impl AppState {
    pub async fn new() -> Result<Arc<Self>> {
        let config = Config::load()?;

        let store = match &config.service_account {
            Some(path) => {
                let account = ServiceAccount::from_file(path)?;
                let firestore = FirestoreStore::new(account, &config.database)
                    .context("Failed to initialize Firestore client")?;
                info!(
                    "Firestore configured for project {} database {}",
                    firestore.project_id(),
                    config.database
                );

                Store::Configured(Arc::new(firestore))
            }
            None => Store::Unconfigured,
        };

        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: Config, store: Store) -> Arc<Self> {
        Arc::new(Self { config, store })
    }
}
