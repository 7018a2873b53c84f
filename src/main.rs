use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use clockwork_collector::collector::bridge::ActiveProfiles;
use clockwork_collector::collector::ClockworkLayer;
use clockwork_collector::config::{Args, ClockworkConfig};
use clockwork_collector::{redis_client, server, AppState};

fn set_global_subscriber(json_logs: bool, active: ActiveProfiles) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new("clockwork_collector=info,tower_http=info")
            .expect("hard-coded env filter should be valid")
    });

    // The bridge sees every event; only console output is filtered.
    let console = if json_logs {
        fmt::layer().json().with_filter(env_filter).boxed()
    } else {
        fmt::layer().pretty().with_filter(env_filter).boxed()
    };

    tracing_subscriber::registry()
        .with(ClockworkLayer::new(active))
        .with(console)
        .init();
}

fn exit_with(message: &str, err: impl std::fmt::Display) -> ! {
    error!(error = %err, "{message}");
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let active = ActiveProfiles::default();
    set_global_subscriber(args.json_logs, active.clone());

    // ── 1. Load configuration ────────────────────────────────────
    let config = ClockworkConfig::load(args.config.as_deref())
        .unwrap_or_else(|e| exit_with("cannot load configuration", e));

    // ── 2. Connect to Redis when a driver needs it ───────────────
    let redis = if config.needs_redis() {
        info!(url = %args.redis_url, "connecting to redis");
        let conn = redis_client::connect(&args.redis_url)
            .await
            .unwrap_or_else(|e| exit_with("cannot connect to redis", e));
        Some(conn)
    } else {
        None
    };

    // ── 3. Build shared state ────────────────────────────────────
    let gate = config
        .gate()
        .unwrap_or_else(|e| exit_with("invalid activation header", e));
    let storage = config
        .storage_backend(redis.as_ref())
        .unwrap_or_else(|e| exit_with("invalid storage configuration", e));
    let sessions = config
        .session_store(redis.as_ref())
        .unwrap_or_else(|e| exit_with("invalid session configuration", e));

    info!(
        backend = storage.kind(),
        header = %gate.header(),
        "clockwork collector configured"
    );

    let state = Arc::new(
        AppState::new(gate, storage, sessions)
            .with_session_cookie(config.session.cookie.clone())
            .with_active_profiles(active),
    );

    // ── 4. Build Axum router ─────────────────────────────────────
    let app = server::create_router(state);

    // ── 5. Bind & serve ──────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .unwrap_or_else(|e| exit_with("cannot bind listener", e));

    info!(addr = %args.bind, "listening; send `X-Clockwork: 1` to profile a request");

    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    {
        exit_with("server exited with error", e);
    }
}
