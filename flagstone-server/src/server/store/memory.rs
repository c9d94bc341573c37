use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{DocumentBackend, Meta, StoreError};

/// In-memory document storage backed by a `RwLock<HashMap>`. Used for
/// tests and ephemeral deployments; nothing survives a restart.
pub struct MemoryBackend {
    data: RwLock<HashMap<String, (Vec<u8>, Meta)>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentBackend for MemoryBackend {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let data = self.data.read().await;
        Ok(data.get(key).map(|(content, _)| content.clone()))
    }

    async fn save(&self, key: &str, content: &[u8], meta: &Meta) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        data.insert(key.to_string(), (content.to_vec(), meta.clone()));
        Ok(())
    }

    async fn load_meta(&self, key: &str) -> Result<Option<Meta>, StoreError> {
        let data = self.data.read().await;
        Ok(data.get(key).map(|(_, meta)| meta.clone()))
    }
}
