use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::{Map, Value};

use super::{SessionData, SessionEntry};
use crate::error::SessionError;

/// Backing store for session data, keyed by session id.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<SessionData>, SessionError>;

    async fn save(&self, id: &str, data: &SessionData) -> Result<(), SessionError>;
}

// ─── In-process store ────────────────────────────────────────────

/// Keeps entries as-is, session objects included. No expiry.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, SessionData>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, id: &str) -> Result<Option<SessionData>, SessionError> {
        Ok(self.sessions.lock().get(id).cloned())
    }

    async fn save(&self, id: &str, data: &SessionData) -> Result<(), SessionError> {
        let mut sessions = self.sessions.lock();
        if data.is_empty() {
            sessions.remove(id);
        } else {
            sessions.insert(id.to_string(), data.clone());
        }
        Ok(())
    }
}

// ─── Redis store ─────────────────────────────────────────────────

/// Stores each session as one JSON blob under `session:<id>` with a TTL.
/// Session objects are written in their tagged document form.
#[derive(Clone)]
pub struct RedisSessionStore {
    conn: ConnectionManager,
    ttl_secs: u64,
}

impl RedisSessionStore {
    pub fn new(conn: ConnectionManager, ttl_secs: u64) -> Self {
        Self { conn, ttl_secs }
    }

    fn key(id: &str) -> String {
        format!("session:{id}")
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn load(&self, id: &str) -> Result<Option<SessionData>, SessionError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(Self::key(id)).await?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        let fields: Map<String, Value> = serde_json::from_str(&raw)?;
        Ok(Some(
            fields
                .into_iter()
                .map(|(key, value)| (key, SessionEntry::Value(value)))
                .collect(),
        ))
    }

    async fn save(&self, id: &str, data: &SessionData) -> Result<(), SessionError> {
        let mut conn = self.conn.clone();
        if data.is_empty() {
            let _: () = conn.del(Self::key(id)).await?;
            return Ok(());
        }

        let doc: Map<String, Value> = data
            .iter()
            .map(|(key, entry)| (key.clone(), entry.to_document()))
            .collect();
        let json_str = serde_json::to_string(&doc)?;

        let _: () = redis::cmd("SET")
            .arg(Self::key(id))
            .arg(&json_str)
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}
