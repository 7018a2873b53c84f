//! Per-request instrumentation collector for axum applications.
//!
//! Requests carrying the activation header get a [`collector::Clockwork`]
//! handle in their extensions. Timers and log events emitted through it are
//! folded into one [`profile::Profile`], written to the configured
//! [`storage::StorageBackend`] when the response is ready, and served back
//! from `/__clockwork/{id}`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub mod collector;
pub mod config;
pub mod error;
pub mod events;
pub mod gate;
pub mod handlers;
pub mod middleware;
pub mod profile;
pub mod redis_client;
pub mod server;
pub mod session;
pub mod storage;

use collector::bridge::ActiveProfiles;
use collector::MemoryProbe;
use gate::ActivationGate;
use session::SessionStore;
use storage::StorageBackend;

/// Shared application state available to every handler via `State<Arc<AppState>>`.
pub struct AppState {
    /// Per-request activation decision.
    pub gate: ActivationGate,

    /// Where finished profiles are written and read back from.
    pub storage: StorageBackend,

    /// Host session subsystem.
    pub sessions: Arc<dyn SessionStore>,

    /// Name of the cookie carrying the session id.
    pub session_cookie: String,

    /// Requests currently collecting, for the tracing bridge.
    pub active: ActiveProfiles,

    /// Process peak memory, sampled at finalize.
    pub memory: MemoryProbe,

    /// Set by the first activated request; the retrieval route stays
    /// unregistered until then.
    retrieval_registered: AtomicBool,
}

impl AppState {
    pub fn new(
        gate: ActivationGate,
        storage: StorageBackend,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            gate,
            storage,
            sessions,
            session_cookie: "sid".into(),
            active: ActiveProfiles::default(),
            memory: MemoryProbe::new(),
            retrieval_registered: AtomicBool::new(false),
        }
    }

    pub fn with_session_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.session_cookie = cookie.into();
        self
    }

    /// Shares the registry with a [`collector::ClockworkLayer`].
    pub fn with_active_profiles(mut self, active: ActiveProfiles) -> Self {
        self.active = active;
        self
    }

    pub fn register_retrieval_route(&self) {
        self.retrieval_registered.store(true, Ordering::Relaxed);
    }

    pub fn retrieval_route_registered(&self) -> bool {
        self.retrieval_registered.load(Ordering::Relaxed)
    }
}
