use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Extension, Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::collector::Handler;
use crate::handlers;
use crate::middleware::{clockwork, session, timing};
use crate::AppState;

/// Builds the full Axum `Router`: the retrieval route, the demo routes and
/// the middleware stack.
///
/// Layers run outermost first: request-start stamp, session load/save,
/// then clockwork. The session layer therefore saves after clockwork has
/// written a profile into the session.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // ── Profile retrieval ───────────────────────────────────
        .route("/__clockwork/:id", get(handlers::clockwork::get_profile))
        // ── Demo endpoints ──────────────────────────────────────
        .route("/api/greet/:name", get(handlers::demo::greet))
        .route("/api/notes", post(handlers::demo::create_note))
        .route("/api/upload", post(handlers::demo::upload))
        .route(
            "/api/ping",
            get(|| async { (Extension(Handler::closure_here("Routes")), "pong") }),
        )
        // ── Middleware (applied bottom-up) ──────────────────────
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            clockwork::clockwork_middleware,
        ))
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            session::session_middleware,
        ))
        .layer(axum_mw::from_fn(timing::request_start_middleware))
        .layer(cors())
        .with_state(state)
}

/// Lets a browser inspection client on another origin read the profile id.
fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([
            clockwork::ID_HEADER.clone(),
            clockwork::VERSION_HEADER.clone(),
        ])
}
