use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    middleware as axum_mw,
    response::Response,
    routing::get as route_get,
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use clockwork_collector::error::StorageError;
use clockwork_collector::gate::ActivationGate;
use clockwork_collector::middleware::clockwork::clockwork_middleware;
use clockwork_collector::profile::{Profile, TOTAL_EXECUTION_TIME};
use clockwork_collector::server::create_router;
use clockwork_collector::session::MemorySessionStore;
use clockwork_collector::storage::{CacheStorage, KeyValueCache, MemoryCache, StorageBackend};
use clockwork_collector::AppState;

// ─── Fixtures ────────────────────────────────────────────────────

/// Memory cache that counts writes, or fails every call.
#[derive(Default)]
struct CountingCache {
    inner: MemoryCache,
    writes: AtomicUsize,
    broken: bool,
}

impl CountingCache {
    fn broken() -> Self {
        Self {
            broken: true,
            ..Default::default()
        }
    }

    fn failure() -> StorageError {
        StorageError::Serialization(serde_json::from_str::<Value>("{").unwrap_err())
    }
}

#[async_trait]
impl KeyValueCache for CountingCache {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        if self.broken {
            return Err(Self::failure());
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.broken {
            return Err(Self::failure());
        }
        self.inner.set(key, value).await
    }
}

fn state(storage: StorageBackend) -> Arc<AppState> {
    Arc::new(AppState::new(
        ActivationGate::default(),
        storage,
        Arc::new(MemorySessionStore::new()),
    ))
}

fn cache_app() -> (Router, Arc<AppState>, Arc<CountingCache>) {
    let cache = Arc::new(CountingCache::default());
    let state = state(StorageBackend::Cache(CacheStorage::new(
        "clockwork",
        cache.clone(),
    )));
    (create_router(state.clone()), state, cache)
}

fn session_app() -> Router {
    create_router(state(StorageBackend::Session))
}

fn get(uri: &str) -> axum::http::request::Builder {
    Request::builder().method("GET").uri(uri)
}

async fn send(app: &Router, req: Request<Body>) -> Response {
    app.clone().oneshot(req).await.unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn profile_id(response: &Response) -> String {
    response.headers()["x-clockwork-id"]
        .to_str()
        .unwrap()
        .to_string()
}

fn session_cookie(response: &Response) -> String {
    let raw = response.headers()[header::SET_COOKIE].to_str().unwrap();
    raw.split(';').next().unwrap().to_string()
}

// ─── Activation ──────────────────────────────────────────────────

#[tokio::test]
async fn inactive_request_leaves_no_trace() {
    let (app, state, cache) = cache_app();

    let response = send(&app, get("/api/greet/ada").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("x-clockwork-id").is_none());
    assert!(response.headers().get("x-clockwork-version").is_none());
    assert_eq!(json_body(response).await["message"], json!("Hello, ada!"));

    assert_eq!(cache.writes.load(Ordering::SeqCst), 0);
    assert!(!state.retrieval_route_registered());

    let response = send(&app, get("/__clockwork/anything").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn falsy_activation_header_is_inactive() {
    let (app, _, cache) = cache_app();

    let response = send(
        &app,
        get("/api/greet/ada")
            .header("X-Clockwork", "0")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert!(response.headers().get("x-clockwork-id").is_none());
    assert_eq!(cache.writes.load(Ordering::SeqCst), 0);
}

// ─── Cache backend ───────────────────────────────────────────────

#[tokio::test]
async fn cache_backend_serves_profile_repeatedly() {
    let (app, state, cache) = cache_app();

    let response = send(
        &app,
        get("/api/greet/ada?lang=en")
            .header("X-Clockwork", "1")
            .header(header::COOKIE, "theme=dark")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-clockwork-version"], "2.0");
    let id = profile_id(&response);
    assert!(state.retrieval_route_registered());
    assert_eq!(cache.writes.load(Ordering::SeqCst), 1);

    let uri = format!("/__clockwork/{id}");
    let first = json_body(send(&app, get(&uri).body(Body::empty()).unwrap()).await).await;
    let second = json_body(send(&app, get(&uri).body(Body::empty()).unwrap()).await).await;
    assert_eq!(first, second);

    let profile: Profile = serde_json::from_value(first.clone()).unwrap();
    assert_eq!(profile.id, id);
    assert_eq!(profile.method, "GET");
    assert_eq!(profile.uri, "/api/greet/ada?lang=en");
    assert_eq!(profile.response_status, 200);
    assert_eq!(profile.controller_name.as_deref(), Some("Demo::greet"));
    assert!(profile.response_duration >= 0.0);

    let namespaces: Vec<&str> = profile.timeline_data.keys().map(String::as_str).collect();
    assert_eq!(namespaces, [TOTAL_EXECUTION_TIME, "Db"]);
    assert_eq!(profile.timeline_data["Db"].bucket("Query").unwrap().len(), 1);

    assert_eq!(first["request"]["query"], json!({"lang": "en"}));
    assert_eq!(first["request"]["cookies"], json!({"theme": "dark"}));
    assert_eq!(first["request"]["responseHeaders"]["x-clockwork-id"], json!(id));
    assert_eq!(first["request"]["serverVars"]["REQUEST_METHOD"], json!("GET"));
    assert_eq!(first["request"]["session"], json!({"visits": 1}));
    assert!(first["request"].get("postBody").is_none());
}

#[tokio::test]
async fn unknown_id_is_an_empty_document() {
    let (app, _, _) = cache_app();
    send(
        &app,
        get("/api/ping")
            .header("X-Clockwork", "1")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    let response = send(&app, get("/__clockwork/missing").body(Body::empty()).unwrap()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({}));
}

#[tokio::test]
async fn closure_routes_are_labelled_by_owner() {
    let (app, _, _) = cache_app();
    let response = send(
        &app,
        get("/api/ping")
            .header("X-Clockwork", "1")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let id = profile_id(&response);

    let profile = json_body(
        send(&app, get(&format!("/__clockwork/{id}")).body(Body::empty()).unwrap()).await,
    )
    .await;
    let label = profile["controllerName"].as_str().unwrap();
    assert!(label.starts_with("Routes::closure["), "{label}");
}

#[tokio::test]
async fn storage_failure_does_not_change_the_response() {
    let cache = Arc::new(CountingCache::broken());
    let app = create_router(state(StorageBackend::Cache(CacheStorage::new(
        "clockwork",
        cache.clone(),
    ))));

    let response = send(
        &app,
        get("/api/greet/ada")
            .header("X-Clockwork", "1")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("x-clockwork-id").is_some());
    assert_eq!(cache.writes.load(Ordering::SeqCst), 1);
    assert_eq!(json_body(response).await["message"], json!("Hello, ada!"));
}

#[tokio::test]
async fn missing_request_start_writes_nothing() {
    let cache = Arc::new(CountingCache::default());
    let state = state(StorageBackend::Cache(CacheStorage::new(
        "clockwork",
        cache.clone(),
    )));
    // No request-start stamp in this stack.
    let app = Router::new()
        .route("/", route_get(|| async { "ok" }))
        .layer(axum_mw::from_fn_with_state(state.clone(), clockwork_middleware))
        .with_state(state);

    let response = send(
        &app,
        get("/").header("X-Clockwork", "1").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("x-clockwork-id").is_some());
    assert_eq!(cache.writes.load(Ordering::SeqCst), 0);
}

// ─── Session backend ─────────────────────────────────────────────

#[tokio::test]
async fn session_backend_consumes_profile_on_read() {
    let app = session_app();

    let response = send(
        &app,
        get("/api/greet/ada")
            .header("X-Clockwork", "1")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let id = profile_id(&response);
    let cookie = session_cookie(&response);

    let uri = format!("/__clockwork/{id}");
    let first = json_body(
        send(
            &app,
            get(&uri)
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await,
    )
    .await;
    assert_eq!(first["id"], json!(id));
    assert_eq!(first["request"]["session"], json!({"visits": 1}));
    // snapshot is taken inside the session layer, before its cookie
    let headers = &first["request"]["responseHeaders"];
    assert_eq!(headers["x-clockwork-version"], json!("2.0"));
    assert!(headers.get("set-cookie").is_none());

    let second = json_body(
        send(
            &app,
            get(&uri)
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await,
    )
    .await;
    assert_eq!(second, json!({}));
}

#[tokio::test]
async fn session_backend_keeps_other_profiles() {
    let app = session_app();

    let first = send(
        &app,
        get("/api/greet/ada")
            .header("X-Clockwork", "1")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let cookie = session_cookie(&first);
    let first_id = profile_id(&first);

    let second = send(
        &app,
        get("/api/greet/ada")
            .header("X-Clockwork", "1")
            .header(header::COOKIE, &cookie)
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let second_id = profile_id(&second);
    assert_ne!(first_id, second_id);

    for id in [&first_id, &second_id] {
        let profile = json_body(
            send(
                &app,
                get(&format!("/__clockwork/{id}"))
                    .header(header::COOKIE, &cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await,
        )
        .await;
        assert_eq!(profile["id"], json!(id));
        // the reserved slot never leaks into the snapshot
        assert!(profile["request"]["session"].get("CLOCKWORK").is_none());
    }
}

#[tokio::test]
async fn post_body_session_objects_and_logs_are_recorded() {
    let app = session_app();
    let body = r#"{"title":"groceries","body":"milk"}"#;

    let response = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/api/notes")
            .header("X-Clockwork", "1")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_LENGTH, body.len())
            .body(Body::from(body))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let id = profile_id(&response);
    let cookie = session_cookie(&response);
    assert_eq!(json_body(response).await["title"], json!("groceries"));

    let profile = json_body(
        send(
            &app,
            get(&format!("/__clockwork/{id}"))
                .header(header::COOKIE, &cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await,
    )
    .await;

    assert_eq!(
        profile["request"]["postBody"],
        json!({"title": "groceries", "body": "milk"})
    );
    let note = &profile["request"]["session"]["last_note"];
    assert_eq!(note["_className"], json!("Note"));
    assert_eq!(note["title"], json!("groceries"));
    assert_eq!(profile["controllerName"], json!("Demo::createNote"));
    assert_eq!(
        profile["log"][0]["message"],
        json!("note created [Title: groceries] [Length: 4]")
    );
    assert_eq!(profile["log"][0]["level"], json!("info"));
}

#[tokio::test]
async fn uploads_are_reported_by_handlers() {
    let (app, _, _) = cache_app();

    let response = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/api/upload?filename=cat.png")
            .header("X-Clockwork", "1")
            .header(header::CONTENT_TYPE, "image/png")
            .body(Body::from(vec![0u8; 16]))
            .unwrap(),
    )
    .await;
    let id = profile_id(&response);

    let profile = json_body(
        send(&app, get(&format!("/__clockwork/{id}")).body(Body::empty()).unwrap()).await,
    )
    .await;
    assert_eq!(
        profile["request"]["uploadedFiles"],
        json!({"file": {"name": "cat.png", "size": 16}})
    );
}
