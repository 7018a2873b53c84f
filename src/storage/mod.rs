//! Where finished profiles go, and how they come back.
//!
//! Every backend satisfies [`ProfileStore`]: `get` answers `Ok(None)` for an
//! unknown id and `set` overwrites. Backends differ in what `get` does to the
//! stored value: the cache backend leaves it in place, the session backend
//! consumes it.

pub mod cache;
pub mod session;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::profile::Profile;
use crate::session::Session;

pub use cache::{CacheStorage, KeyValueCache, MemoryCache, RedisCache};
pub use session::{SessionStorage, SESSION_SLOT};

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Profile>, StorageError>;

    async fn set(&self, id: &str, profile: &Profile) -> Result<(), StorageError>;
}

/// The configured backend, built once at startup.
#[derive(Clone)]
pub enum StorageBackend {
    Cache(CacheStorage),
    Session,
}

impl StorageBackend {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Cache(_) => "cache",
            Self::Session => "session",
        }
    }

    /// Resolves the backend for one request. The session backend needs the
    /// requesting client's session.
    pub fn for_request(&self, session: Option<&Session>) -> Result<BoundStorage, StorageError> {
        match self {
            Self::Cache(cache) => Ok(BoundStorage::Cache(cache.clone())),
            Self::Session => session
                .map(|s| BoundStorage::Session(SessionStorage::new(s.clone())))
                .ok_or(StorageError::NoSession),
        }
    }
}

/// A backend ready to serve one request.
pub enum BoundStorage {
    Cache(CacheStorage),
    Session(SessionStorage),
}

#[async_trait]
impl ProfileStore for BoundStorage {
    async fn get(&self, id: &str) -> Result<Option<Profile>, StorageError> {
        match self {
            Self::Cache(cache) => cache.get(id).await,
            Self::Session(session) => session.get(id).await,
        }
    }

    async fn set(&self, id: &str, profile: &Profile) -> Result<(), StorageError> {
        match self {
            Self::Cache(cache) => cache.set(id, profile).await,
            Self::Session(session) => session.set(id, profile).await,
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_profile(id: &str) -> Profile {
    Profile {
        id: id.to_string(),
        time: 1_700_000_000.0,
        response_time: 1_700_000_000.25,
        response_duration: 250.0,
        response_status: 200,
        method: "GET".into(),
        uri: format!("/items/{id}"),
        controller_name: Some("Items::show".into()),
        memory_peak_bytes: 4096,
        request: Default::default(),
        timeline_data: Default::default(),
        log: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_backend_requires_a_session() {
        let backend = StorageBackend::Session;
        assert!(matches!(
            backend.for_request(None),
            Err(StorageError::NoSession)
        ));

        let session = Session::fresh();
        assert!(matches!(
            backend.for_request(Some(&session)),
            Ok(BoundStorage::Session(_))
        ));
    }
}
