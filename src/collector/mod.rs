//! Per-request profile aggregation.
//!
//! A [`ProfileCollector`] moves through three states: idle until the
//! request is activated, collecting while the handler runs, finalized once
//! the profile has been assembled. Anything arriving outside the collecting
//! state is rejected with a [`CollectorError`].
//!
//! Producers never see the collector directly; they get a cloneable
//! [`Clockwork`] handle from the request extensions.

pub mod bridge;
pub mod context;
pub mod controller;
pub mod format;
pub mod memory;

use std::cell::Cell;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use indexmap::IndexMap;
use parking_lot::Mutex;
use rand::Rng;
use serde_json::Value;

use crate::error::CollectorError;
use crate::events::{unix_now, Fields, LogEvent, TimerEvent};
use crate::profile::{
    non_empty, LogEntry, Profile, RequestData, Timeline, TimelineEntry, TimelineGroup,
    TOTAL_EXECUTION_TIME,
};

pub use bridge::ClockworkLayer;
pub use context::RequestContext;
pub use controller::Handler;
pub use memory::MemoryProbe;

/// Keys computed by the collector; event data cannot override them.
const RESERVED_TIMELINE_KEYS: [&str; 3] = ["start", "end", "duration"];

/// `uniqid`-style id: hex seconds, hex microseconds, then random entropy.
pub fn generate_id() -> String {
    let now = Utc::now();
    let entropy: u32 = rand::thread_rng().gen_range(0..0x0100_0000);
    format!(
        "{:08x}{:05x}{:06x}",
        now.timestamp(),
        now.timestamp_subsec_micros(),
        entropy
    )
}

// ─── Collector state machine ─────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Idle,
    Collecting { id: String },
    Finalized,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Idle => "idle",
            State::Collecting { .. } => "collecting",
            State::Finalized => "finalized",
        }
    }
}

#[derive(Debug)]
pub struct ProfileCollector {
    state: State,
    timeline: IndexMap<String, IndexMap<String, Vec<TimelineEntry>>>,
    log: Vec<LogEntry>,
    uploads: Fields,
}

impl Default for ProfileCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileCollector {
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            timeline: IndexMap::new(),
            log: Vec::new(),
            uploads: Fields::new(),
        }
    }

    /// Idle → Collecting. The id is fixed for the collector's lifetime.
    pub fn activate(&mut self, id: impl Into<String>) -> Result<(), CollectorError> {
        match self.state {
            State::Idle => {
                self.state = State::Collecting { id: id.into() };
                Ok(())
            }
            State::Finalized => Err(CollectorError::AlreadyFinalized),
            State::Collecting { .. } => Err(CollectorError::NotCollecting("collecting")),
        }
    }

    pub fn id(&self) -> Option<&str> {
        match &self.state {
            State::Collecting { id } => Some(id),
            _ => None,
        }
    }

    pub fn is_collecting(&self) -> bool {
        matches!(self.state, State::Collecting { .. })
    }

    fn ensure_collecting(&self) -> Result<(), CollectorError> {
        match self.state {
            State::Collecting { .. } => Ok(()),
            State::Finalized => Err(CollectorError::AlreadyFinalized),
            ref other => Err(CollectorError::NotCollecting(other.name())),
        }
    }

    /// Appends to `timeline[Namespace][Type]`; repeated timers accumulate.
    pub fn on_timer_event(&mut self, event: &TimerEvent) -> Result<(), CollectorError> {
        self.ensure_collecting()?;

        let mut data = event.data().clone();
        for key in RESERVED_TIMELINE_KEYS {
            data.remove(key);
        }
        let entry = TimelineEntry {
            start: event.start(),
            end: event.start() + event.duration(),
            duration: event.duration() * 1000.0,
            data,
        };

        self.timeline
            .entry(format::capitalize(event.namespace()))
            .or_default()
            .entry(format::capitalize(event.kind()))
            .or_default()
            .push(entry);
        Ok(())
    }

    pub fn on_log_event(&mut self, event: &LogEvent) -> Result<(), CollectorError> {
        self.ensure_collecting()?;

        self.log.push(LogEntry {
            time: event.timestamp(),
            level: event.level(),
            message: format::render_log_message(event.message(), event.context()),
        });
        Ok(())
    }

    /// Records an upload reported by a handler under its form field name.
    pub fn record_upload(
        &mut self,
        field: impl Into<String>,
        metadata: Value,
    ) -> Result<(), CollectorError> {
        self.ensure_collecting()?;
        self.uploads.insert(field.into(), metadata);
        Ok(())
    }

    /// Assembles the profile, ending the request now.
    pub fn finalize(&mut self, ctx: RequestContext) -> Result<Profile, CollectorError> {
        self.finalize_at(ctx, unix_now())
    }

    /// Assembles the profile with an explicit end time (unix seconds).
    ///
    /// Collecting → Finalized happens on the first call whatever the
    /// outcome, so a failed finalize can never be followed by a write.
    pub fn finalize_at(
        &mut self,
        ctx: RequestContext,
        end: f64,
    ) -> Result<Profile, CollectorError> {
        let id = match std::mem::replace(&mut self.state, State::Finalized) {
            State::Collecting { id } => id,
            State::Finalized => return Err(CollectorError::AlreadyFinalized),
            State::Idle => {
                self.state = State::Idle;
                return Err(CollectorError::NotCollecting("idle"));
            }
        };

        let start = ctx
            .started_at
            .ok_or(CollectorError::IncompleteContext("request start time"))?;
        if ctx.method.is_empty() {
            return Err(CollectorError::IncompleteContext("request method"));
        }

        let duration_ms = (end - start) * 1000.0;

        let mut timeline_data = Timeline::with_capacity(self.timeline.len() + 1);
        timeline_data.insert(
            TOTAL_EXECUTION_TIME.to_string(),
            TimelineGroup::Entries(vec![TimelineEntry {
                start,
                end,
                duration: duration_ms,
                data: Fields::new(),
            }]),
        );
        for (namespace, types) in std::mem::take(&mut self.timeline) {
            if namespace == TOTAL_EXECUTION_TIME {
                tracing::warn!(
                    clockwork.profile = %id,
                    timers = types.values().map(Vec::len).sum::<usize>(),
                    "timers in the reserved total namespace dropped"
                );
                continue;
            }
            timeline_data.insert(namespace, TimelineGroup::Types(types));
        }

        let request = RequestData {
            cookies: non_empty(ctx.cookies),
            request_headers: non_empty(ctx.request_headers),
            response_headers: non_empty(ctx.response_headers),
            query: non_empty(ctx.query),
            post_body: non_empty(ctx.post_body),
            uploaded_files: non_empty(std::mem::take(&mut self.uploads)),
            server_vars: non_empty(ctx.server_vars),
            session: ctx
                .session
                .as_ref()
                .and_then(|data| non_empty(context::snapshot_session(data))),
        };

        Ok(Profile {
            id,
            time: start,
            response_time: end,
            response_duration: duration_ms,
            response_status: ctx.response_status,
            method: ctx.method,
            uri: ctx.uri,
            controller_name: ctx.controller.map(|handler| handler.to_string()),
            memory_peak_bytes: ctx.memory_peak_bytes,
            request,
            timeline_data,
            log: std::mem::take(&mut self.log),
        })
    }
}

// ─── Request handle ──────────────────────────────────────────────

thread_local! {
    /// Address of the collector this thread currently holds locked, or 0.
    static HELD_COLLECTOR: Cell<usize> = const { Cell::new(0) };
}

/// Marks the current thread as inside one collector until dropped.
struct HeldMark {
    previous: usize,
}

impl HeldMark {
    fn enter(collector: usize) -> Self {
        Self {
            previous: HELD_COLLECTOR.with(|held| held.replace(collector)),
        }
    }
}

impl Drop for HeldMark {
    fn drop(&mut self) {
        HELD_COLLECTOR.with(|held| held.set(self.previous));
    }
}

/// Shared handle to one request's collector, placed in request extensions
/// for activated requests only.
#[derive(Clone)]
pub struct Clockwork {
    id: Arc<str>,
    collector: Arc<Mutex<ProfileCollector>>,
}

impl std::fmt::Debug for Clockwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clockwork").field("id", &self.id).finish()
    }
}

impl Clockwork {
    /// A collector already in the collecting state.
    pub fn start(id: impl Into<String>) -> Self {
        let id: String = id.into();
        let mut collector = ProfileCollector::new();
        // a fresh collector is always idle
        let _ = collector.activate(id.clone());
        Self {
            id: id.into(),
            collector: Arc::new(Mutex::new(collector)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    fn address(&self) -> usize {
        Arc::as_ptr(&self.collector) as usize
    }

    /// Runs `f` with the collector locked, marking this thread as inside it.
    fn with_collector<T>(&self, f: impl FnOnce(&mut ProfileCollector) -> T) -> T {
        let mut collector = self.collector.lock();
        let _mark = HeldMark::enter(self.address());
        f(&mut collector)
    }

    pub fn is_collecting(&self) -> bool {
        self.with_collector(|collector| collector.is_collecting())
    }

    pub fn timer(&self, event: TimerEvent) -> Result<(), CollectorError> {
        self.with_collector(|collector| collector.on_timer_event(&event))
    }

    pub fn log(&self, event: LogEvent) -> Result<(), CollectorError> {
        self.with_collector(|collector| collector.on_log_event(&event))
    }

    /// Like [`log`](Self::log), but `None` when called from a thread that
    /// is already inside this collector, e.g. for an event emitted while
    /// finalizing. Other threads wait for the lock.
    pub fn try_log(&self, event: LogEvent) -> Option<Result<(), CollectorError>> {
        if HELD_COLLECTOR.with(Cell::get) == self.address() {
            return None;
        }
        Some(self.log(event))
    }

    pub fn record_upload(
        &self,
        field: impl Into<String>,
        metadata: Value,
    ) -> Result<(), CollectorError> {
        self.with_collector(|collector| collector.record_upload(field, metadata))
    }

    /// Starts measuring now; the timer is emitted when the guard finishes
    /// or drops.
    pub fn start_timer(
        &self,
        namespace: impl Into<String>,
        kind: impl Into<String>,
    ) -> TimerGuard {
        TimerGuard {
            clockwork: self.clone(),
            namespace: namespace.into(),
            kind: kind.into(),
            started_at: unix_now(),
            clock: Instant::now(),
            data: Fields::new(),
            emitted: false,
        }
    }

    /// Times one async operation.
    pub async fn time<F>(
        &self,
        namespace: impl Into<String>,
        kind: impl Into<String>,
        data: Fields,
        operation: F,
    ) -> F::Output
    where
        F: Future,
    {
        let mut guard = self.start_timer(namespace, kind);
        guard.data = data;
        let output = operation.await;
        if let Err(err) = guard.finish() {
            tracing::error!(
                clockwork.profile = %self.id,
                error = %err,
                "timer emitted outside collection"
            );
        }
        output
    }

    pub fn finalize(&self, ctx: RequestContext) -> Result<Profile, CollectorError> {
        self.with_collector(|collector| collector.finalize(ctx))
    }

    pub fn finalize_at(&self, ctx: RequestContext, end: f64) -> Result<Profile, CollectorError> {
        self.with_collector(|collector| collector.finalize_at(ctx, end))
    }
}

/// Running timer. Emits exactly once.
pub struct TimerGuard {
    clockwork: Clockwork,
    namespace: String,
    kind: String,
    started_at: f64,
    clock: Instant,
    data: Fields,
    emitted: bool,
}

impl TimerGuard {
    pub fn add_data(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn finish(mut self) -> Result<(), CollectorError> {
        self.emit()
    }

    fn emit(&mut self) -> Result<(), CollectorError> {
        self.emitted = true;
        let event = TimerEvent::new(
            std::mem::take(&mut self.namespace),
            std::mem::take(&mut self.kind),
            self.started_at,
            self.clock.elapsed().as_secs_f64(),
        )
        .with_fields(std::mem::take(&mut self.data));
        self.clockwork.timer(event)
    }
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        if self.emitted {
            return;
        }
        if let Err(err) = self.emit() {
            tracing::error!(
                clockwork.profile = %self.clockwork.id,
                error = %err,
                "timer dropped outside collection"
            );
        }
    }
}
