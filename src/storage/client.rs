//! Store client: provisions the database and both containers, hands out handles
//!
//! Provisioning is idempotent. Existing databases and containers are reused;
//! creation only happens when the lookup reports "not found".

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

use super::backend::{ContainerStats, DocumentContainer, HealthStatus};
use super::connection::Storage;
use super::indexing::IndexingPolicy;
use super::run_blocking;
use super::sqlite_container::{
    create_database, read_database, ContainerProperties, SqliteContainer, ThroughputMode,
};
use crate::config::StoreConfig;
use crate::error::{HistoryError, Result};
use crate::model::paths;

struct ResolvedStore {
    database: String,
    conversations: Arc<dyn DocumentContainer>,
    messages: Arc<dyn DocumentContainer>,
}

/// Entry point to the document store
pub struct StoreClient {
    config: StoreConfig,
    resolved: OnceCell<ResolvedStore>,
}

impl StoreClient {
    /// An unresolved client; nothing is opened until [`StoreClient::initialize`]
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            resolved: OnceCell::new(),
        }
    }

    /// Create and initialize a client in one step
    pub async fn connect(config: StoreConfig) -> Result<Self> {
        let client = Self::new(config);
        client.initialize().await?;
        Ok(client)
    }

    /// A ready client over caller-supplied containers
    pub fn with_containers(
        config: StoreConfig,
        conversations: Arc<dyn DocumentContainer>,
        messages: Arc<dyn DocumentContainer>,
    ) -> Self {
        let resolved = ResolvedStore {
            database: config.database_name.clone(),
            conversations,
            messages,
        };
        Self {
            config,
            resolved: OnceCell::new_with(Some(resolved)),
        }
    }

    /// Open the database and both containers, creating what is missing.
    ///
    /// Any failure leaves the client unusable; calling again retries.
    pub async fn initialize(&self) -> Result<()> {
        self.resolved
            .get_or_try_init(|| async {
                let config = self.config.clone();
                run_blocking(move || Self::provision(&config)).await
            })
            .await
            .map_err(|e| {
                error!("Store client initialization failed: {}", e);
                e
            })?;
        Ok(())
    }

    fn provision(config: &StoreConfig) -> Result<ResolvedStore> {
        let db_path = config.expanded_db_path();
        let storage = Storage::open(&db_path)?;
        Self::ensure_database(&storage, config)?;

        let conversations = Self::ensure_container(
            &storage,
            &config.database_name,
            ContainerProperties {
                name: config.conversations_container.clone(),
                partition_key_path: paths::TENANT_ID.to_string(),
                indexing_policy: IndexingPolicy::conversations(),
            },
        )?;
        let messages = Self::ensure_container(
            &storage,
            &config.database_name,
            ContainerProperties {
                name: config.messages_container.clone(),
                partition_key_path: paths::CONVERSATION_ID.to_string(),
                indexing_policy: IndexingPolicy::messages(),
            },
        )?;

        info!(
            db_path = %db_path,
            database = %config.database_name,
            "Store client ready"
        );

        Ok(ResolvedStore {
            database: config.database_name.clone(),
            conversations,
            messages,
        })
    }

    fn ensure_database(storage: &Storage, config: &StoreConfig) -> Result<()> {
        match read_database(storage, &config.database_name) {
            Ok(()) => {
                debug!(database = %config.database_name, "Using existing database");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                let max_throughput = match config.throughput_mode {
                    ThroughputMode::Provisioned => Some(config.max_throughput),
                    ThroughputMode::Serverless => None,
                };
                create_database(
                    storage,
                    &config.database_name,
                    config.throughput_mode,
                    max_throughput,
                )
            }
            Err(e) => Err(e),
        }
    }

    fn ensure_container(
        storage: &Storage,
        database: &str,
        properties: ContainerProperties,
    ) -> Result<Arc<dyn DocumentContainer>> {
        match SqliteContainer::open(storage, database, &properties.name) {
            Ok(container) => {
                if container.partition_key_path() != properties.partition_key_path {
                    return Err(HistoryError::Config(format!(
                        "container '{}' is partitioned by '{}', expected '{}'",
                        properties.name,
                        container.partition_key_path(),
                        properties.partition_key_path
                    )));
                }
                debug!(container = %properties.name, "Using existing container");
                Ok(Arc::new(container))
            }
            Err(e) if e.is_not_found() => {
                Ok(Arc::new(SqliteContainer::create(storage, database, &properties)?))
            }
            Err(e) => Err(e),
        }
    }

    fn resolved(&self) -> Result<&ResolvedStore> {
        self.resolved
            .get()
            .ok_or_else(|| HistoryError::Storage("store client is not initialized".to_string()))
    }

    /// True once the database and both containers are resolved
    pub fn is_ready(&self) -> bool {
        self.resolved.initialized()
    }

    pub fn get_conversations_container(&self) -> Result<Arc<dyn DocumentContainer>> {
        Ok(self.resolved()?.conversations.clone())
    }

    pub fn get_messages_container(&self) -> Result<Arc<dyn DocumentContainer>> {
        Ok(self.resolved()?.messages.clone())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Probe every container; failures are reported in the map, never raised
    pub async fn health_check(&self) -> BTreeMap<String, HealthStatus> {
        let mut statuses = BTreeMap::new();

        let resolved = match self.resolved() {
            Ok(resolved) => resolved,
            Err(e) => {
                statuses.insert("client".to_string(), HealthStatus::unhealthy(e.to_string()));
                return statuses;
            }
        };

        let mut client = HealthStatus::default();
        client
            .details
            .insert("database".to_string(), resolved.database.clone());
        statuses.insert("client".to_string(), client);

        for container in [resolved.conversations.clone(), resolved.messages.clone()] {
            let name = container.name().to_string();
            let status = run_blocking(move || Ok(container.probe()))
                .await
                .unwrap_or_else(|e| HealthStatus::unhealthy(e.to_string()));
            statuses.insert(name, status);
        }

        statuses
    }

    /// Coarse document counts per container
    pub async fn container_stats(&self) -> Result<Vec<ContainerStats>> {
        let resolved = self.resolved()?;
        let mut stats = Vec::with_capacity(2);

        for container in [resolved.conversations.clone(), resolved.messages.clone()] {
            let name = container.name().to_string();
            let partition_key_path = container.partition_key_path().to_string();
            let document_count = run_blocking(move || container.count_documents()).await?;
            stats.push(ContainerStats {
                name,
                partition_key_path,
                document_count,
            });
        }

        Ok(stats)
    }

    /// Remove expired documents from both containers
    pub async fn purge_expired(&self) -> Result<BTreeMap<String, usize>> {
        let resolved = self.resolved()?;
        let mut purged = BTreeMap::new();

        for container in [resolved.conversations.clone(), resolved.messages.clone()] {
            let name = container.name().to_string();
            let count = run_blocking(move || container.purge_expired()).await?;
            purged.insert(name, count);
        }

        Ok(purged)
    }
}
