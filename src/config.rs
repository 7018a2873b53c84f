use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use redis::aio::ConnectionManager;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::gate::{ActivationGate, DEFAULT_ACTIVATION_HEADER};
use crate::session::{MemorySessionStore, RedisSessionStore, SessionStore};
use crate::storage::{CacheStorage, KeyValueCache, MemoryCache, RedisCache, StorageBackend};

// ─── Command line ────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(
    name = "clockwork-collector",
    about = "Per-request profiling collector with a demo axum app"
)]
pub struct Args {
    /// Address the HTTP server binds to
    #[arg(long, env = "CLOCKWORK_BIND", default_value = "0.0.0.0:3000")]
    pub bind: String,

    /// Optional TOML config file
    #[arg(long, env = "CLOCKWORK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Redis URL, used only by redis drivers
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379/")]
    pub redis_url: String,

    /// Emit logs as JSON lines instead of pretty text
    #[arg(long, env = "CLOCKWORK_JSON_LOGS")]
    pub json_logs: bool,
}

// ─── File config ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    #[default]
    Memory,
    Redis,
}

/// Backend selector. Absent means [`StorageConfig::Session`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    Cache {
        #[serde(default = "default_cache_name")]
        name: String,
        #[serde(default)]
        ttl_secs: Option<u64>,
        #[serde(default)]
        driver: Driver,
    },
    Session,
}

fn default_cache_name() -> String {
    "clockwork".into()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub driver: Driver,
    pub cookie: String,
    pub ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            driver: Driver::Memory,
            cookie: "sid".into(),
            ttl_secs: 1800,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClockworkConfig {
    pub activation_header: String,
    pub storage: Option<StorageConfig>,
    pub session: SessionConfig,
}

impl Default for ClockworkConfig {
    fn default() -> Self {
        Self {
            activation_header: DEFAULT_ACTIVATION_HEADER.into(),
            storage: None,
            session: SessionConfig::default(),
        }
    }
}

impl ClockworkConfig {
    /// Reads `path` when given, defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_toml(&std::fs::read_to_string(path)?),
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn needs_redis(&self) -> bool {
        let cache_on_redis = matches!(
            self.storage,
            Some(StorageConfig::Cache {
                driver: Driver::Redis,
                ..
            })
        );
        cache_on_redis || self.session.driver == Driver::Redis
    }

    pub fn gate(&self) -> Result<ActivationGate, ConfigError> {
        ActivationGate::from_name(&self.activation_header)
    }

    pub fn storage_backend(
        &self,
        redis: Option<&ConnectionManager>,
    ) -> Result<StorageBackend, ConfigError> {
        match &self.storage {
            None | Some(StorageConfig::Session) => Ok(StorageBackend::Session),
            Some(StorageConfig::Cache {
                name,
                ttl_secs,
                driver,
            }) => {
                let cache: Arc<dyn KeyValueCache> = match driver {
                    Driver::Memory => Arc::new(MemoryCache::new(ttl_secs.map(Duration::from_secs))),
                    Driver::Redis => {
                        let conn = redis.ok_or(ConfigError::RedisRequired("storage"))?;
                        Arc::new(RedisCache::new(conn.clone(), *ttl_secs))
                    }
                };
                Ok(StorageBackend::Cache(CacheStorage::new(name.clone(), cache)))
            }
        }
    }

    pub fn session_store(
        &self,
        redis: Option<&ConnectionManager>,
    ) -> Result<Arc<dyn SessionStore>, ConfigError> {
        match self.session.driver {
            Driver::Memory => Ok(Arc::new(MemorySessionStore::new())),
            Driver::Redis => {
                let conn = redis.ok_or(ConfigError::RedisRequired("session"))?;
                Ok(Arc::new(RedisSessionStore::new(
                    conn.clone(),
                    self.session.ttl_secs,
                )))
            }
        }
    }
}
