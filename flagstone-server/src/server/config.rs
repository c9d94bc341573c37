use std::env;

use serde::Deserialize;

/// Top-level flagstone.toml configuration.
#[derive(Debug, Deserialize, Default)]
pub struct ServiceConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub cors: CorsConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_hostname")]
    pub hostname: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_storage")]
    pub storage: StorageBackend,
    /// Read-path document cache TTL in milliseconds; 0 disables caching.
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Sled,
    Memory,
}

/// Bearer tokens for the two audiences. Empty lists run the server open.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub eval_tokens: Vec<String>,
    #[serde(default)]
    pub admin_tokens: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorsConfig {
    #[serde(default = "default_origins")]
    pub origins: Vec<String>,
}

// ── Default value functions ──────────────────────────

fn default_port() -> u16 {
    8080
}

fn default_hostname() -> String {
    "0.0.0.0".to_string()
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_storage() -> StorageBackend {
    StorageBackend::Sled
}

fn default_cache_ttl_ms() -> u64 {
    5_000
}

fn default_origins() -> Vec<String> {
    vec!["*".to_string()]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            hostname: default_hostname(),
            data_dir: default_data_dir(),
            storage: default_storage(),
            cache_ttl_ms: default_cache_ttl_ms(),
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origins: default_origins(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from a TOML file, falling back to defaults if the
    /// file doesn't exist or cannot be parsed.
    pub fn load(path: &str) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(path, error = %e, "failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("FS_PORT") {
            if let Ok(port) = val.parse::<u16>() {
                self.server.port = port;
            }
        }

        if let Ok(val) = env::var("FS_STORAGE") {
            match val.to_lowercase().as_str() {
                "sled" => self.server.storage = StorageBackend::Sled,
                "memory" => self.server.storage = StorageBackend::Memory,
                other => tracing::warn!(value = other, "unknown FS_STORAGE value"),
            }
        }

        if let Ok(val) = env::var("FS_DATA_DIR") {
            self.server.data_dir = val;
        }

        if let Ok(val) = env::var("FS_CACHE_TTL_MS") {
            if let Ok(ttl) = val.parse::<u64>() {
                self.server.cache_ttl_ms = ttl;
            }
        }

        if let Ok(val) = env::var("FS_EVAL_TOKENS") {
            self.auth.eval_tokens = split_tokens(&val);
        }

        if let Ok(val) = env::var("FS_ADMIN_TOKENS") {
            self.auth.admin_tokens = split_tokens(&val);
        }
    }
}

fn split_tokens(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
