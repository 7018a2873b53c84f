//! Minimal per-client session host.
//!
//! A [`Session`] is the in-request view of one client's session data. It is
//! loaded by [`session_middleware`](crate::middleware::session::session_middleware)
//! before the handler runs and saved back after the response is built.

pub mod store;

use std::fmt;
use std::sync::Arc;

use axum::http::{header, HeaderMap};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::events::Fields;

pub use store::{MemorySessionStore, RedisSessionStore, SessionStore};

/// Tag key naming the original type of a serialized session object.
pub const CLASS_NAME_KEY: &str = "_className";
/// Marker set when a session object failed to serialize.
pub const ERROR_KEY: &str = "_error";

// ─── Session objects ─────────────────────────────────────────────

/// Opt-in capability for non-primitive values stored in a session.
pub trait SessionObject: Send + Sync + fmt::Debug {
    fn type_name(&self) -> &str;

    fn serialize(&self) -> Result<Fields, String>;
}

/// Adapts any `Serialize` type into a [`SessionObject`].
#[derive(Debug, Clone)]
pub struct SerdeObject<T> {
    type_name: String,
    value: T,
}

impl<T> SerdeObject<T> {
    pub fn new(type_name: impl Into<String>, value: T) -> Self {
        Self {
            type_name: type_name.into(),
            value,
        }
    }
}

impl<T> SessionObject for SerdeObject<T>
where
    T: Serialize + Send + Sync + fmt::Debug,
{
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn serialize(&self) -> Result<Fields, String> {
        match serde_json::to_value(&self.value).map_err(|e| e.to_string())? {
            Value::Object(fields) => Ok(fields),
            other => {
                let mut fields = Fields::new();
                fields.insert("value".into(), other);
                Ok(fields)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum SessionEntry {
    Value(Value),
    Object(Arc<dyn SessionObject>),
}

impl SessionEntry {
    pub fn object(object: impl SessionObject + 'static) -> Self {
        Self::Object(Arc::new(object))
    }

    /// Primitive values pass through; objects become a document tagged
    /// with their type name. A failing object yields the tag plus an
    /// error marker instead of aborting.
    pub fn to_document(&self) -> Value {
        match self {
            Self::Value(value) => value.clone(),
            Self::Object(object) => {
                let mut doc = Map::new();
                doc.insert(CLASS_NAME_KEY.into(), object.type_name().into());
                match object.serialize() {
                    Ok(fields) => {
                        for (key, value) in fields {
                            if key != CLASS_NAME_KEY {
                                doc.insert(key, value);
                            }
                        }
                    }
                    Err(err) => {
                        tracing::warn!(
                            type_name = object.type_name(),
                            error = %err,
                            "session value could not be serialized"
                        );
                        doc.insert(ERROR_KEY.into(), err.into());
                    }
                }
                Value::Object(doc)
            }
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            Self::Object(_) => None,
        }
    }
}

impl From<Value> for SessionEntry {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

/// Ordered session contents.
pub type SessionData = IndexMap<String, SessionEntry>;

// ─── Session handle ──────────────────────────────────────────────

#[derive(Debug, Default)]
struct SessionState {
    data: SessionData,
    dirty: bool,
}

/// Cloneable handle; all clones share the same data.
#[derive(Debug, Clone)]
pub struct Session {
    id: Arc<str>,
    is_new: bool,
    state: Arc<Mutex<SessionState>>,
}

impl Session {
    pub fn new(id: impl Into<Arc<str>>, data: SessionData) -> Self {
        Self {
            id: id.into(),
            is_new: false,
            state: Arc::new(Mutex::new(SessionState { data, dirty: false })),
        }
    }

    /// A session for a client that presented no (or an unknown) cookie.
    pub fn fresh() -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string().into(),
            is_new: true,
            state: Arc::new(Mutex::new(SessionState::default())),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn is_dirty(&self) -> bool {
        self.state.lock().dirty
    }

    pub fn get(&self, key: &str) -> Option<SessionEntry> {
        self.state.lock().data.get(key).cloned()
    }

    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.get(key).and_then(|entry| entry.as_value().cloned())
    }

    pub fn set(&self, key: impl Into<String>, entry: impl Into<SessionEntry>) {
        let mut state = self.state.lock();
        state.data.insert(key.into(), entry.into());
        state.dirty = true;
    }

    pub fn remove(&self, key: &str) -> Option<SessionEntry> {
        let mut state = self.state.lock();
        let removed = state.data.shift_remove(key);
        if removed.is_some() {
            state.dirty = true;
        }
        removed
    }

    /// Copy of the current contents.
    pub fn data(&self) -> SessionData {
        self.state.lock().data.clone()
    }
}

// ─── Cookies ─────────────────────────────────────────────────────

/// Every `name=value` pair from all `Cookie` headers, in order.
pub fn parse_cookies(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            let name = name.trim();
            (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
        })
        .collect()
}
