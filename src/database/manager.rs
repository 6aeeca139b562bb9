use std::sync::Arc;

use tracing::info;

use crate::config::{StoreBackend, StoreConfig};
use crate::database::dynamo::DynamoStore;
use crate::database::memory::MemoryStore;
use crate::database::postgres::PgStore;
use crate::database::store::{KeyValueStore, StoreError};

/// Builds the configured store backend once at startup.
pub struct StoreManager;

impl StoreManager {
    pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn KeyValueStore>, StoreError> {
        let store: Arc<dyn KeyValueStore> = match config.backend {
            StoreBackend::Memory => {
                info!("Using in-memory store; data is lost on exit");
                match config.page_size {
                    Some(size) => Arc::new(MemoryStore::with_page_size(size)),
                    None => Arc::new(MemoryStore::new()),
                }
            }
            StoreBackend::DynamoDb => {
                let store = DynamoStore::connect(
                    &config.region,
                    config.endpoint_url.as_deref(),
                    config.table_name.clone(),
                )
                .await;
                info!("Using DynamoDB table {} in {}", config.table_name, config.region);
                Arc::new(store)
            }
            StoreBackend::Postgres => {
                let url = config
                    .database_url
                    .as_deref()
                    .ok_or_else(|| StoreError::backend("connect", "DATABASE_URL is not set"))?;
                Self::validate_database_url(url)?;
                let store = PgStore::connect(url, &config.table_name, config.max_connections).await?;
                info!("Using Postgres table {}", config.table_name);
                Arc::new(store)
            }
        };
        Ok(store)
    }

    fn validate_database_url(raw: &str) -> Result<(), StoreError> {
        let url = url::Url::parse(raw)
            .map_err(|e| StoreError::backend("connect", format!("invalid DATABASE_URL: {}", e)))?;
        match url.scheme() {
            "postgres" | "postgresql" => Ok(()),
            other => Err(StoreError::backend(
                "connect",
                format!("DATABASE_URL must be a postgres URL, got scheme {}", other),
            )),
        }
    }
}
