use async_trait::async_trait;

use super::{DocumentBackend, Meta, StoreError};

/// Persistent document storage backed by sled.
pub struct SledBackend {
    db: sled::Db,
}

impl SledBackend {
    pub fn new(db: sled::Db) -> Self {
        Self { db }
    }

    /// Open a sled database at the given directory path.
    pub fn open(data_dir: &str) -> Result<Self, StoreError> {
        let db = sled::open(data_dir)
            .map_err(|e| StoreError::Backend(format!("failed to open sled db: {e}")))?;
        Ok(Self::new(db))
    }

    fn doc_key(key: &str) -> String {
        format!("doc:{key}")
    }

    fn meta_key(key: &str) -> String {
        format!("meta:{key}")
    }
}

#[async_trait]
impl DocumentBackend for SledBackend {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.db
            .get(Self::doc_key(key))
            .map(|found| found.map(|ivec| ivec.to_vec()))
            .map_err(|e| StoreError::Backend(format!("failed to read document: {e}")))
    }

    async fn save(&self, key: &str, content: &[u8], meta: &Meta) -> Result<(), StoreError> {
        let meta_bytes = serde_json::to_vec(meta)
            .map_err(|e| StoreError::Serialization(format!("failed to serialize meta: {e}")))?;

        self.db
            .insert(Self::doc_key(key), content)
            .map_err(|e| StoreError::Backend(format!("failed to store document: {e}")))?;

        self.db
            .insert(Self::meta_key(key), meta_bytes)
            .map_err(|e| StoreError::Backend(format!("failed to store meta: {e}")))?;

        self.db
            .flush_async()
            .await
            .map_err(|e| StoreError::Backend(format!("failed to flush: {e}")))?;

        Ok(())
    }

    async fn load_meta(&self, key: &str) -> Result<Option<Meta>, StoreError> {
        let Some(ivec) = self
            .db
            .get(Self::meta_key(key))
            .map_err(|e| StoreError::Backend(format!("failed to read meta: {e}")))?
        else {
            return Ok(None);
        };
        serde_json::from_slice(&ivec)
            .map(Some)
            .map_err(|e| StoreError::Serialization(format!("failed to parse meta: {e}")))
    }
}
