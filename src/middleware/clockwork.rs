//! Ties one activated request to one profile.
//!
//! Inactive requests go straight to the inner service. Activated ones get a
//! [`Clockwork`] handle, run inside the bridge span, receive the
//! `X-Clockwork-*` response headers, and have their profile finalized and
//! written exactly once. Finalize and storage failures are logged; the
//! response the handler produced is always the one returned.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, MatchedPath, Request, State},
    http::{header, request::Parts, HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use serde_json::Value;
use tracing::{debug, error, warn, Instrument};

use super::timing::RequestStart;
use crate::collector::bridge::SPAN_NAME;
use crate::collector::context::{headers_to_fields, pairs_to_fields, urlencoded_to_fields};
use crate::collector::{generate_id, Clockwork, Handler, RequestContext};
use crate::events::Fields;
use crate::profile::Profile;
use crate::session::{parse_cookies, Session};
use crate::storage::ProfileStore;
use crate::AppState;

pub static ID_HEADER: HeaderName = HeaderName::from_static("x-clockwork-id");
pub static VERSION_HEADER: HeaderName = HeaderName::from_static("x-clockwork-version");
pub const PROTOCOL_VERSION: &str = "2.0";

/// Bodies larger than this are passed through without being captured.
const MAX_CAPTURED_BODY: usize = 1 << 20;

pub async fn clockwork_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    if !state.gate.should_activate(req.headers()) {
        return next.run(req).await;
    }

    state.register_retrieval_route();
    let clockwork = Clockwork::start(generate_id());
    state.active.register(&clockwork);
    debug!(clockwork.id = clockwork.id(), "profiling request");

    let (mut parts, body) = req.into_parts();
    let mut ctx = request_context(&parts);
    let (body, post_body) = capture_post_body(&parts.headers, body).await;
    ctx.post_body = post_body;

    let session = parts.extensions.get::<Session>().cloned();
    let matched_path = parts.extensions.get::<MatchedPath>().cloned();
    parts.extensions.insert(clockwork.clone());
    let req = Request::from_parts(parts, body);

    let span = tracing::info_span!(SPAN_NAME, clockwork.id = %clockwork.id());
    let mut response = next.run(req).instrument(span).await;
    state.active.release(clockwork.id());

    if let Ok(id) = HeaderValue::from_str(clockwork.id()) {
        response.headers_mut().insert(ID_HEADER.clone(), id);
    }
    response.headers_mut().insert(
        VERSION_HEADER.clone(),
        HeaderValue::from_static(PROTOCOL_VERSION),
    );

    ctx.response_status = response.status().as_u16();
    // Headers set by outer layers (session cookie, CORS) are not seen here.
    // The session layer has to stay outside so it saves the profile slot.
    ctx.response_headers = headers_to_fields(response.headers());
    ctx.controller = response
        .extensions()
        .get::<Handler>()
        .cloned()
        .or_else(|| matched_path.map(|path| Handler::named(path.as_str())));
    ctx.session = session.as_ref().map(Session::data);
    ctx.memory_peak_bytes = state.memory.sample();

    match clockwork.finalize(ctx) {
        Ok(profile) => persist(&state, session.as_ref(), &profile).await,
        Err(err) => error!(clockwork.id = clockwork.id(), error = %err, "profile not finalized"),
    }

    response
}

async fn persist(state: &AppState, session: Option<&Session>, profile: &Profile) {
    let storage = match state.storage.for_request(session) {
        Ok(storage) => storage,
        Err(err) => {
            warn!(clockwork.id = %profile.id, error = %err, "profile storage unavailable");
            return;
        }
    };

    match storage.set(&profile.id, profile).await {
        Ok(()) => debug!(
            clockwork.id = %profile.id,
            backend = state.storage.kind(),
            timers = profile.timeline_data.len(),
            logs = profile.log.len(),
            "profile stored"
        ),
        Err(err) => warn!(clockwork.id = %profile.id, error = %err, "profile write failed"),
    }
}

/// Facts known before the handler runs.
fn request_context(parts: &Parts) -> RequestContext {
    let started_at = parts.extensions.get::<RequestStart>().map(|start| start.0);

    RequestContext {
        started_at,
        method: parts.method.to_string(),
        uri: parts.uri.to_string(),
        cookies: pairs_to_fields(parse_cookies(&parts.headers)),
        request_headers: headers_to_fields(&parts.headers),
        query: parts
            .uri
            .query()
            .map(urlencoded_to_fields)
            .unwrap_or_default(),
        server_vars: server_vars(parts, started_at),
        ..Default::default()
    }
}

fn server_vars(parts: &Parts, started_at: Option<f64>) -> Fields {
    let mut vars = Fields::new();
    vars.insert("REQUEST_METHOD".into(), parts.method.as_str().into());
    let request_uri = parts
        .uri
        .path_and_query()
        .map_or_else(|| parts.uri.path().to_string(), |pq| pq.as_str().to_string());
    vars.insert("REQUEST_URI".into(), request_uri.into());
    vars.insert("SERVER_PROTOCOL".into(), format!("{:?}", parts.version).into());
    if let Some(started_at) = started_at {
        vars.insert("REQUEST_TIME_FLOAT".into(), started_at.into());
    }
    if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
        vars.insert("REMOTE_ADDR".into(), addr.ip().to_string().into());
        vars.insert("REMOTE_PORT".into(), addr.port().into());
    }
    vars
}

/// Buffers small form/JSON bodies so they can be recorded, then hands the
/// same bytes back to the handler. Anything else passes through untouched.
async fn capture_post_body(headers: &HeaderMap, body: Body) -> (Body, Fields) {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let is_form = content_type.starts_with("application/x-www-form-urlencoded");
    let is_json = content_type.starts_with("application/json");
    if !is_form && !is_json {
        return (body, Fields::new());
    }

    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok());
    if !declared.is_some_and(|len| len <= MAX_CAPTURED_BODY) {
        return (body, Fields::new());
    }

    let bytes = match axum::body::to_bytes(body, MAX_CAPTURED_BODY).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(error = %err, "request body could not be buffered");
            return (Body::empty(), Fields::new());
        }
    };

    let fields = if is_form {
        urlencoded_to_fields(&String::from_utf8_lossy(&bytes))
    } else {
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(fields)) => fields,
            _ => Fields::new(),
        }
    };

    (Body::from(bytes), fields)
}
