//! A few routes that exercise the collector: timed work, tracing logs,
//! session writes, post bodies and uploads.

use axum::{
    body::Bytes,
    extract::{Path, Query},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;

use crate::collector::{Clockwork, Handler};
use crate::events::{Fields, LogEvent, LogLevel};
use crate::session::{SerdeObject, Session, SessionEntry};

use super::AppError;

// ─── Domain types ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct Greeting {
    pub message: String,
    pub visits: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub title: String,
    pub body: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateNoteRequest {
    pub title: String,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct UploadParams {
    pub filename: String,
}

/// Runs `operation` under a timer when the request is being profiled.
async fn timed<F: Future>(
    clockwork: Option<&Clockwork>,
    namespace: &str,
    kind: &str,
    data: Fields,
    operation: F,
) -> F::Output {
    match clockwork {
        Some(clockwork) => clockwork.time(namespace, kind, data, operation).await,
        None => operation.await,
    }
}

// ─── GET /api/greet/:name ────────────────────────────────────────

pub async fn greet(
    Path(name): Path<String>,
    clockwork: Option<Extension<Clockwork>>,
    session: Option<Extension<Session>>,
) -> (Extension<Handler>, Json<Greeting>) {
    let clockwork = clockwork.map(|Extension(clockwork)| clockwork);

    let visits = session.map_or(1, |Extension(session)| {
        let visits = session
            .get_value("visits")
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
            + 1;
        session.set("visits", json!(visits));
        visits
    });

    let mut query = Fields::new();
    query.insert(
        "sql".into(),
        "SELECT greeting FROM greetings WHERE lang = 'en'".into(),
    );
    let salutation = timed(clockwork.as_ref(), "db", "query", query, async {
        tokio::time::sleep(Duration::from_millis(2)).await;
        "Hello"
    })
    .await;

    tracing::info!(name = %name, visits, "greeting rendered");

    (
        Extension(Handler::method("Demo", "greet")),
        Json(Greeting {
            message: format!("{salutation}, {name}!"),
            visits,
        }),
    )
}

// ─── POST /api/notes ─────────────────────────────────────────────

pub async fn create_note(
    clockwork: Option<Extension<Clockwork>>,
    session: Option<Extension<Session>>,
    Json(req): Json<CreateNoteRequest>,
) -> Result<(Extension<Handler>, Json<Note>), AppError> {
    if req.title.trim().is_empty() {
        return Err(AppError::BadRequest("title must not be empty".into()));
    }

    let note = Note {
        title: req.title,
        body: req.body,
        created_at: chrono::Utc::now().to_rfc3339(),
    };

    if let Some(Extension(session)) = &session {
        session.set(
            "last_note",
            SessionEntry::object(SerdeObject::new("Note", note.clone())),
        );
    }

    if let Some(Extension(clockwork)) = &clockwork {
        clockwork
            .log(
                LogEvent::new(LogLevel::Info, "note created")
                    .with_context(json!({"title": note.title, "length": note.body.len()})),
            )
            .map_err(|e| AppError::Internal(e.to_string()))?;
    }

    Ok((Extension(Handler::method("Demo", "createNote")), Json(note)))
}

// ─── POST /api/upload?filename= ──────────────────────────────────

pub async fn upload(
    Query(params): Query<UploadParams>,
    clockwork: Option<Extension<Clockwork>>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    if params.filename.is_empty() {
        return Err(AppError::BadRequest("filename must not be empty".into()));
    }

    let metadata = json!({"name": params.filename, "size": body.len()});
    if let Some(Extension(clockwork)) = &clockwork {
        clockwork
            .record_upload("file", metadata.clone())
            .map_err(|e| AppError::Internal(e.to_string()))?;
    }

    Ok(Json(metadata))
}
