//! Validated mutators over per-tenant documents.
//!
//! Every mutation is a read-modify-write of the whole tenant document,
//! serialised per tenant by an async lock, so cross-flag invariants
//! (segment references, cascade deletes) hold atomically. The evaluation
//! read path goes through a TTL cache; stale reads are fine because
//! determinism only needs definitions to be stable, not newest.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use sha1::{Digest, Sha1};
use tokio::sync::{Mutex, RwLock};

use flagstone::{FlagDefinition, TenantDocument, TenantKey, ValidationError};

use super::{DocumentBackend, Meta, StoreError};

struct CachedDocument {
    loaded_at: Instant,
    document: Arc<TenantDocument>,
}

/// Counts reported back from a sync operation.
#[derive(Debug, Clone, Copy, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub flags_copied: u64,
    pub segments_copied: u64,
}

pub struct DefinitionStore {
    backend: Arc<dyn DocumentBackend>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    cache: RwLock<HashMap<String, CachedDocument>>,
    cache_ttl: Duration,
}

impl DefinitionStore {
    pub fn new(backend: Arc<dyn DocumentBackend>, cache_ttl: Duration) -> Self {
        Self {
            backend,
            locks: Mutex::new(HashMap::new()),
            cache: RwLock::new(HashMap::new()),
            cache_ttl,
        }
    }

    /// The tenant's `{flags, segments}` document, empty if none exists.
    /// Served from the TTL cache on the hot evaluation path.
    pub async fn get_data(&self, tenant: &TenantKey) -> Result<Arc<TenantDocument>, StoreError> {
        let key = tenant.storage_key();
        if !self.cache_ttl.is_zero() {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(&key) {
                if entry.loaded_at.elapsed() < self.cache_ttl {
                    return Ok(Arc::clone(&entry.document));
                }
            }
        }
        let document = Arc::new(self.load_document(tenant).await?);
        if !self.cache_ttl.is_zero() {
            let mut cache = self.cache.write().await;
            cache.insert(
                key,
                CachedDocument {
                    loaded_at: Instant::now(),
                    document: Arc::clone(&document),
                },
            );
        }
        Ok(document)
    }

    /// Write metadata for a tenant, if any document has been stored.
    pub async fn get_meta(&self, tenant: &TenantKey) -> Result<Option<Meta>, StoreError> {
        self.backend.load_meta(&tenant.storage_key()).await
    }

    /// Create or replace a flag after validating it against the schema and
    /// the tenant's segments. A missing segment reference rejects the write
    /// before anything is stored.
    pub async fn put_flag(
        &self,
        tenant: &TenantKey,
        flag: FlagDefinition,
    ) -> Result<(), StoreError> {
        let guard = self.tenant_lock(tenant).await;
        let _held = guard.lock().await;

        let mut document = self.load_document(tenant).await?;
        flag.validate(&document.segments)?;
        document.flags.insert(flag.id.clone(), flag);
        self.write_document(tenant, &document).await
    }

    /// Shallow-merge a patch into an existing flag and re-validate. The
    /// flag id is immutable; a patch `id` is ignored.
    pub async fn update_flag(
        &self,
        tenant: &TenantKey,
        flag_id: &str,
        patch: &Value,
    ) -> Result<FlagDefinition, StoreError> {
        let Some(patch_fields) = patch.as_object() else {
            return Err(StoreError::InvalidPatch("patch must be a JSON object".into()));
        };

        let guard = self.tenant_lock(tenant).await;
        let _held = guard.lock().await;

        let mut document = self.load_document(tenant).await?;
        let Some(existing) = document.flags.get(flag_id) else {
            return Err(StoreError::FlagNotFound(flag_id.to_string()));
        };

        let mut merged = serde_json::to_value(existing)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        if let Value::Object(target) = &mut merged {
            for (field, value) in patch_fields {
                if field == "id" {
                    continue;
                }
                target.insert(field.clone(), value.clone());
            }
        }
        let updated: FlagDefinition = serde_json::from_value(merged)
            .map_err(|e| StoreError::InvalidPatch(e.to_string()))?;
        updated.validate(&document.segments)?;

        document.flags.insert(flag_id.to_string(), updated.clone());
        self.write_document(tenant, &document).await?;
        Ok(updated)
    }

    pub async fn delete_flag(&self, tenant: &TenantKey, flag_id: &str) -> Result<(), StoreError> {
        let guard = self.tenant_lock(tenant).await;
        let _held = guard.lock().await;

        let mut document = self.load_document(tenant).await?;
        if document.flags.remove(flag_id).is_none() {
            return Err(StoreError::FlagNotFound(flag_id.to_string()));
        }
        self.write_document(tenant, &document).await
    }

    /// Upsert a segment. Segments stand alone: no referential checks.
    pub async fn put_segment(
        &self,
        tenant: &TenantKey,
        segment_id: &str,
        rule: String,
    ) -> Result<(), StoreError> {
        if segment_id.trim().is_empty() {
            return Err(ValidationError::EmptySegmentId.into());
        }
        let guard = self.tenant_lock(tenant).await;
        let _held = guard.lock().await;

        let mut document = self.load_document(tenant).await?;
        document.segments.insert(segment_id.to_string(), rule);
        self.write_document(tenant, &document).await
    }

    /// Remove a segment and strip it from every referencing flag, in one
    /// write.
    pub async fn delete_segment(
        &self,
        tenant: &TenantKey,
        segment_id: &str,
    ) -> Result<(), StoreError> {
        let guard = self.tenant_lock(tenant).await;
        let _held = guard.lock().await;

        let mut document = self.load_document(tenant).await?;
        if !document.remove_segment(segment_id) {
            return Err(StoreError::SegmentNotFound(segment_id.to_string()));
        }
        self.write_document(tenant, &document).await
    }

    /// Copy every flag and segment from `source_env` to `target_env` within
    /// the same app. Copied flags arrive disabled unless `overwrite` is
    /// set; target-only keys are retained.
    pub async fn sync_env(
        &self,
        tenant: &TenantKey,
        source_env: &str,
        target_env: &str,
        overwrite: bool,
    ) -> Result<SyncOutcome, StoreError> {
        let source_key = tenant.with_env(source_env);
        let target_key = tenant.with_env(target_env);
        if source_key == target_key {
            return Err(StoreError::SameEnvironment);
        }

        let source = self.load_document(&source_key).await?;

        let guard = self.tenant_lock(&target_key).await;
        let _held = guard.lock().await;

        let mut target = self.load_document(&target_key).await?;
        let outcome = SyncOutcome {
            flags_copied: source.flags.len() as u64,
            segments_copied: source.segments.len() as u64,
        };
        for (id, flag) in source.flags {
            target.flags.insert(id, copied_flag(flag, overwrite));
        }
        for (id, rule) in source.segments {
            target.segments.insert(id, rule);
        }
        self.write_document(&target_key, &target).await?;
        Ok(outcome)
    }

    /// Copy a single flag across environments, together with only the
    /// segments its `segments` set references.
    pub async fn sync_flag(
        &self,
        tenant: &TenantKey,
        flag_id: &str,
        source_env: &str,
        target_env: &str,
        overwrite: bool,
    ) -> Result<SyncOutcome, StoreError> {
        let source_key = tenant.with_env(source_env);
        let target_key = tenant.with_env(target_env);
        if source_key == target_key {
            return Err(StoreError::SameEnvironment);
        }

        let source = self.load_document(&source_key).await?;
        let Some(flag) = source.flags.get(flag_id) else {
            return Err(StoreError::FlagNotFound(flag_id.to_string()));
        };

        let guard = self.tenant_lock(&target_key).await;
        let _held = guard.lock().await;

        let mut target = self.load_document(&target_key).await?;
        let mut segments_copied = 0;
        for segment_id in &flag.segments {
            if let Some(rule) = source.segments.get(segment_id) {
                target.segments.insert(segment_id.clone(), rule.clone());
                segments_copied += 1;
            }
        }
        target
            .flags
            .insert(flag_id.to_string(), copied_flag(flag.clone(), overwrite));
        self.write_document(&target_key, &target).await?;
        Ok(SyncOutcome {
            flags_copied: 1,
            segments_copied,
        })
    }

    async fn tenant_lock(&self, tenant: &TenantKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(tenant.storage_key()).or_default())
    }

    async fn load_document(&self, tenant: &TenantKey) -> Result<TenantDocument, StoreError> {
        match self.backend.load(&tenant.storage_key()).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StoreError::Serialization(format!("corrupt tenant document: {e}"))),
            None => Ok(TenantDocument::default()),
        }
    }

    async fn write_document(
        &self,
        tenant: &TenantKey,
        document: &TenantDocument,
    ) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(document)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let mut hasher = Sha1::new();
        hasher.update(&bytes);
        let meta = Meta {
            hash: format!("{:x}", hasher.finalize()),
            updated_at: Utc::now().to_rfc3339(),
            flags_count: document.flags.len() as u64,
        };

        self.backend
            .save(&tenant.storage_key(), &bytes, &meta)
            .await?;

        // Readers must not see the pre-write document past this point.
        let mut cache = self.cache.write().await;
        cache.remove(&tenant.storage_key());
        Ok(())
    }
}

fn copied_flag(mut flag: FlagDefinition, overwrite: bool) -> FlagDefinition {
    if !overwrite {
        flag.enabled = false;
    }
    flag
}
