pub mod definitions;
pub mod memory;
pub mod sled_store;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use definitions::DefinitionStore;

/// Metadata attached to a stored tenant document on every write.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    /// SHA-1 of the serialized document.
    pub hash: String,
    /// RFC 3339 timestamp of the write.
    pub updated_at: String,
    pub flags_count: u64,
}

/// Errors crossing the store boundary. Mutators return these; they never
/// panic across the API.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("flag not found: {0}")]
    FlagNotFound(String),

    #[error("segment not found: {0}")]
    SegmentNotFound(String),

    #[error("invalid definition: {0}")]
    InvalidDefinition(#[from] flagstone::ValidationError),

    #[error("invalid patch: {0}")]
    InvalidPatch(String),

    #[error("source and target environments are identical")]
    SameEnvironment,

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Raw per-tenant document storage. One record per storage key
/// (`v1:<app>:<env>`). Implementations must be thread-safe.
#[async_trait]
pub trait DocumentBackend: Send + Sync {
    /// Fetch the serialized document, or `None` if the tenant has none.
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store the serialized document together with its metadata.
    async fn save(&self, key: &str, content: &[u8], meta: &Meta) -> Result<(), StoreError>;

    /// Fetch the write metadata for a tenant.
    async fn load_meta(&self, key: &str) -> Result<Option<Meta>, StoreError>;
}
