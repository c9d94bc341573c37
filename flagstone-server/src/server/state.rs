use std::sync::Arc;
use std::time::Duration;

use flagstone::Engine;

use super::config::ServiceConfig;
use super::store::{DefinitionStore, DocumentBackend};

/// Shared application state for the HTTP server.
pub struct AppState {
    /// Service configuration (tokens, cors, storage).
    pub config: ServiceConfig,
    /// Validated mutators and the cached read path over tenant documents.
    pub store: DefinitionStore,
    /// The evaluation engine with its compiled-expression cache.
    pub engine: Engine,
}

impl AppState {
    pub fn new(config: ServiceConfig, backend: Arc<dyn DocumentBackend>) -> Self {
        let cache_ttl = Duration::from_millis(config.server.cache_ttl_ms);
        Self {
            config,
            store: DefinitionStore::new(backend, cache_ttl),
            engine: Engine::new(),
        }
    }
}
