use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde_json::Value;
use std::sync::Arc;

use crate::collector::Handler;
use crate::error::StorageError;
use crate::profile::Profile;
use crate::session::Session;
use crate::storage::ProfileStore;
use crate::AppState;

use super::AppError;

/// Looks a profile up by id. Unknown ids are `Ok(None)`.
pub async fn retrieve(
    storage: &impl ProfileStore,
    id: &str,
) -> Result<Option<Profile>, StorageError> {
    storage.get(id).await
}

// ─── GET /__clockwork/:id ────────────────────────────────────────

/// Returns the stored profile, or `{}` when there is none. With the session
/// backend this consumes the profile.
pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    session: Option<Extension<Session>>,
) -> Result<(Extension<Handler>, Json<Value>), AppError> {
    if !state.retrieval_route_registered() {
        return Err(AppError::NotFound(format!("no route for /__clockwork/{id}")));
    }

    let storage = state
        .storage
        .for_request(session.as_ref().map(|Extension(session)| session))?;

    let body = match retrieve(&storage, &id).await? {
        Some(profile) => {
            serde_json::to_value(profile).map_err(|e| AppError::Internal(e.to_string()))?
        }
        None => Value::Object(Default::default()),
    };

    Ok((Extension(Handler::method("Clockwork", "get")), Json(body)))
}
