use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::ProfileStore;
use crate::error::StorageError;
use crate::profile::Profile;

/// A named key/value cache that owns its own expiry policy.
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError>;
}

// ─── In-process cache ────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryCache {
    ttl: Option<Duration>,
    entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
}

impl MemoryCache {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl KeyValueCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            None => return Ok(None),
            Some((_, Some(deadline))) => Instant::now() >= *deadline,
            Some((_, None)) => false,
        };
        if expired {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|(value, _)| value.clone()))
    }

    /// Also sweeps every expired entry, so profiles that are never read
    /// do not accumulate.
    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if self.ttl.is_some() {
            entries.retain(|_, (_, deadline)| deadline.map_or(true, |deadline| deadline > now));
        }
        entries.insert(key.to_string(), (value, self.ttl.map(|ttl| now + ttl)));
        Ok(())
    }
}

// ─── Redis cache ─────────────────────────────────────────────────

#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
    ttl_secs: Option<u64>,
}

impl RedisCache {
    pub fn new(conn: ConnectionManager, ttl_secs: Option<u64>) -> Self {
        Self { conn, ttl_secs }
    }
}

#[async_trait]
impl KeyValueCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = self.ttl_secs {
            cmd.arg("EX").arg(ttl);
        }
        let _: () = cmd.query_async(&mut conn).await?;
        Ok(())
    }
}

// ─── Profile storage over a cache ────────────────────────────────

/// Idempotent backend: reads never remove anything.
#[derive(Clone)]
pub struct CacheStorage {
    name: String,
    cache: Arc<dyn KeyValueCache>,
}

impl CacheStorage {
    pub fn new(name: impl Into<String>, cache: Arc<dyn KeyValueCache>) -> Self {
        Self {
            name: name.into(),
            cache,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn key(&self, id: &str) -> String {
        format!("{}:{id}", self.name)
    }
}

#[async_trait]
impl ProfileStore for CacheStorage {
    async fn get(&self, id: &str) -> Result<Option<Profile>, StorageError> {
        match self.cache.get(&self.key(id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, id: &str, profile: &Profile) -> Result<(), StorageError> {
        let raw = serde_json::to_string(profile)?;
        self.cache.set(&self.key(id), raw).await
    }
}
