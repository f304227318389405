//! Shared status snapshot: the whole table as one JSON array under one key

use crate::store::{KvStore, StoreError};
use fabric_core_liveness::PersistedStatus;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("snapshot '{key}' is not valid JSON: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot encode snapshot: {0}")]
    Encode(#[source] serde_json::Error),
}

#[derive(Clone)]
pub struct SnapshotStore {
    store: Arc<dyn KvStore>,
    key: String,
}

impl SnapshotStore {
    /// Snapshot kept under `key` in `store`
    pub fn new(store: Arc<dyn KvStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Store key of the snapshot
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Last written snapshot; a missing key is an empty one
    pub async fn load(&self) -> Result<Vec<PersistedStatus>, SnapshotError> {
        let Some(raw) = self.store.get(&self.key).await? else {
            return Ok(Vec::new());
        };
        serde_json::from_slice(&raw).map_err(|source| SnapshotError::Decode {
            key: self.key.clone(),
            source,
        })
    }

    /// Overwrite the snapshot with `statuses`
    pub async fn save(&self, statuses: &[PersistedStatus]) -> Result<(), SnapshotError> {
        let raw = serde_json::to_vec(statuses).map_err(SnapshotError::Encode)?;
        self.store.put(&self.key, raw).await?;
        Ok(())
    }
}
