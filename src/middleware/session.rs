use axum::{
    extract::{Request, State},
    http::{header, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::warn;

use crate::session::{parse_cookies, Session};
use crate::AppState;

/// Loads the client's session into the request extensions and saves it
/// after the inner service (clockwork included) has finished with it.
///
/// Store failures degrade to an empty session on load and a log line on
/// save; they never change the response.
pub async fn session_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let presented = parse_cookies(req.headers())
        .into_iter()
        .find(|(name, _)| *name == state.session_cookie)
        .map(|(_, value)| value);

    let session = match presented {
        Some(id) => match state.sessions.load(&id).await {
            Ok(Some(data)) => Session::new(id, data),
            Ok(None) => Session::fresh(),
            Err(err) => {
                warn!(error = %err, "session load failed, starting a new session");
                Session::fresh()
            }
        },
        None => Session::fresh(),
    };

    req.extensions_mut().insert(session.clone());
    let mut response = next.run(req).await;

    if !session.is_dirty() {
        return response;
    }

    if let Err(err) = state.sessions.save(session.id(), &session.data()).await {
        warn!(session = session.id(), error = %err, "session save failed");
        return response;
    }

    if session.is_new() {
        let cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax",
            state.session_cookie,
            session.id()
        );
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }

    response
}
