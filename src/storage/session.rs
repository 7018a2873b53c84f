use async_trait::async_trait;
use serde_json::{Map, Value};

use super::ProfileStore;
use crate::error::StorageError;
use crate::profile::Profile;
use crate::session::Session;

/// Reserved session slot holding `id -> profile`.
pub const SESSION_SLOT: &str = "CLOCKWORK";

/// Consume-once backend living inside the client's own session.
///
/// `get` removes what it returns, so a profile can be fetched exactly once.
/// The slot is read, modified and written back without any cross-request
/// locking: two concurrent activated requests from one client can lose a
/// profile (last session save wins).
pub struct SessionStorage {
    session: Session,
}

impl SessionStorage {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    fn slot(&self) -> Map<String, Value> {
        match self.session.get_value(SESSION_SLOT) {
            Some(Value::Object(profiles)) => profiles,
            _ => Map::new(),
        }
    }
}

#[async_trait]
impl ProfileStore for SessionStorage {
    async fn get(&self, id: &str) -> Result<Option<Profile>, StorageError> {
        let mut profiles = self.slot();
        let Some(raw) = profiles.remove(id) else {
            return Ok(None);
        };

        if profiles.is_empty() {
            self.session.remove(SESSION_SLOT);
        } else {
            self.session.set(SESSION_SLOT, Value::Object(profiles));
        }

        Ok(Some(serde_json::from_value(raw)?))
    }

    async fn set(&self, id: &str, profile: &Profile) -> Result<(), StorageError> {
        let mut profiles = self.slot();
        profiles.insert(id.to_string(), serde_json::to_value(profile)?);
        self.session.set(SESSION_SLOT, Value::Object(profiles));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::sample_profile;

    #[tokio::test]
    async fn reads_consume_the_profile() {
        let session = Session::fresh();
        let storage = SessionStorage::new(session.clone());
        let profile = sample_profile("a1");

        storage.set("a1", &profile).await.unwrap();
        assert_eq!(storage.get("a1").await.unwrap(), Some(profile));
        assert_eq!(storage.get("a1").await.unwrap(), None);
        assert!(session.get(SESSION_SLOT).is_none());
    }

    #[tokio::test]
    async fn consuming_one_id_keeps_the_others() {
        let session = Session::fresh();
        let storage = SessionStorage::new(session.clone());
        let p1 = sample_profile("a1");
        let p2 = sample_profile("a2");

        storage.set("a1", &p1).await.unwrap();
        storage.set("a2", &p2).await.unwrap();

        assert_eq!(storage.get("a1").await.unwrap(), Some(p1));
        assert!(session.get(SESSION_SLOT).is_some());
        assert_eq!(storage.get("a2").await.unwrap(), Some(p2));
        assert!(session.get(SESSION_SLOT).is_none());
    }

    #[tokio::test]
    async fn unknown_id_leaves_session_untouched() {
        let session = Session::fresh();
        let storage = SessionStorage::new(session.clone());
        storage.set("a1", &sample_profile("a1")).await.unwrap();
        let before = session.get_value(SESSION_SLOT);

        assert_eq!(storage.get("missing").await.unwrap(), None);
        assert_eq!(session.get_value(SESSION_SLOT), before);
    }

    #[tokio::test]
    async fn other_session_keys_survive() {
        let session = Session::fresh();
        session.set("user", serde_json::json!(42));
        let storage = SessionStorage::new(session.clone());

        storage.set("a1", &sample_profile("a1")).await.unwrap();
        storage.get("a1").await.unwrap();
        assert_eq!(session.get_value("user"), Some(serde_json::json!(42)));
    }
}
