//! Block list: users barred from support chat until a point in time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockEntry {
    pub user_id: String,
    pub until: DateTime<Utc>,
    pub reason: String,
}

impl BlockEntry {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now <= self.until
    }
}

#[async_trait]
pub trait BlockList: Send + Sync {
    /// Active block for the user at `now`. Expired entries are removed and reported as `None`.
    async fn check(&self, user_id: &str, now: DateTime<Utc>) -> Result<Option<BlockEntry>, StoreError>;
    async fn set(&self, entry: BlockEntry) -> Result<(), StoreError>;
    async fn clear(&self, user_id: &str) -> Result<bool, StoreError>;
}

pub struct MemoryBlockList {
    inner: RwLock<HashMap<String, BlockEntry>>,
}

impl Default for MemoryBlockList {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBlockList {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl BlockList for MemoryBlockList {
    async fn check(&self, user_id: &str, now: DateTime<Utc>) -> Result<Option<BlockEntry>, StoreError> {
        {
            let g = self.inner.read().await;
            match g.get(user_id) {
                None => return Ok(None),
                Some(e) if e.is_active(now) => return Ok(Some(e.clone())),
                Some(_) => {}
            }
        }
        let mut g = self.inner.write().await;
        if g.get(user_id).is_some_and(|e| !e.is_active(now)) {
            g.remove(user_id);
            log::debug!("block for user {} expired", user_id);
        }
        Ok(g.get(user_id).cloned())
    }

    async fn set(&self, entry: BlockEntry) -> Result<(), StoreError> {
        self.inner.write().await.insert(entry.user_id.clone(), entry);
        Ok(())
    }

    async fn clear(&self, user_id: &str) -> Result<bool, StoreError> {
        Ok(self.inner.write().await.remove(user_id).is_some())
    }
}
