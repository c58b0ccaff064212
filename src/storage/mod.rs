// Persistence for progress records; one contract, two backends

pub mod database;
pub mod locks;
pub mod memory;

use std::{fmt, sync::Arc};

use crate::{
    config::{Config, StorageBackend},
    domain::{ProgressRecord, StorageKind, SyncRequest, ValidationError},
};

pub use database::DatabaseProgressStore;
pub use memory::MemoryProgressStore;

/// Identifies one record. Displays as `user:video`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub user_id: String,
    pub video_id: String,
}

impl RecordKey {
    pub fn new(user_id: &str, video_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            video_id: video_id.to_string(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.user_id, self.video_id)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("storage backend error: {0}")]
    Backend(#[from] sea_orm::DbErr),
}

/// Server-side persistence. Both backends apply the same merge rules; only
/// durability differs.
#[async_trait::async_trait]
pub trait ProgressStore: Send + Sync {
    fn kind(&self) -> StorageKind;

    async fn get(&self, user_id: &str, video_id: &str) -> Result<Option<ProgressRecord>, StoreError>;

    /// Validates `request`, merges it into the stored record and persists the
    /// result as one atomic step per key.
    async fn merge_and_save(
        &self,
        user_id: &str,
        video_id: &str,
        request: &SyncRequest,
    ) -> Result<ProgressRecord, StoreError>;
}

/// Builds the store selected by `config`.
///
/// In `auto` mode an unreachable database is logged and the transient
/// backend takes over.
pub async fn open(config: &Config) -> anyhow::Result<Arc<dyn ProgressStore>> {
    let store: Arc<dyn ProgressStore> = match config.storage_backend {
        StorageBackend::Memory => Arc::new(MemoryProgressStore::new()),
        StorageBackend::Durable => {
            Arc::new(DatabaseProgressStore::connect(&config.db_connection_string).await?)
        }
        StorageBackend::Auto => {
            match DatabaseProgressStore::connect(&config.db_connection_string).await {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    tracing::warn!(error = %format!("{:#}", e), "database unavailable, falling back to in-memory storage");
                    Arc::new(MemoryProgressStore::new())
                }
            }
        }
    };
    tracing::info!(storage = store.kind().as_str(), "progress store ready");
    Ok(store)
}
