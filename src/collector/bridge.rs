//! Forwards `tracing` events into the active request's profile log.
//!
//! The clockwork middleware registers each activated request's handle in
//! [`ActiveProfiles`] and runs the handler inside a span named
//! [`SPAN_NAME`] carrying the profile id. [`ClockworkLayer`] attaches the
//! handle to that span, and every event emitted underneath it becomes a
//! [`LogEvent`] in the profile.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

use super::Clockwork;
use crate::events::{Fields, LogContext, LogEvent, LogLevel};

pub const SPAN_NAME: &str = "clockwork";
pub const PROFILE_FIELD: &str = "clockwork.id";

/// Handles of requests currently collecting, by profile id.
#[derive(Clone, Default)]
pub struct ActiveProfiles {
    inner: Arc<DashMap<String, Clockwork>>,
}

impl ActiveProfiles {
    pub fn register(&self, clockwork: &Clockwork) {
        self.inner.insert(clockwork.id().to_string(), clockwork.clone());
    }

    pub fn release(&self, id: &str) {
        self.inner.remove(id);
    }

    pub fn get(&self, id: &str) -> Option<Clockwork> {
        self.inner.get(id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

struct SpanProfile(Clockwork);

pub struct ClockworkLayer {
    active: ActiveProfiles,
}

impl ClockworkLayer {
    pub fn new(active: ActiveProfiles) -> Self {
        Self { active }
    }
}

impl<S> Layer<S> for ClockworkLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        if attrs.metadata().name() != SPAN_NAME {
            return;
        }
        let mut visitor = ProfileIdVisitor(None);
        attrs.record(&mut visitor);
        let Some(clockwork) = visitor.0.and_then(|profile| self.active.get(&profile)) else {
            return;
        };
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(SpanProfile(clockwork));
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        if self.active.is_empty() {
            return;
        }
        let Some(scope) = ctx.event_scope(event) else {
            return;
        };
        let Some(clockwork) = scope
            .into_iter()
            .find_map(|span| span.extensions().get::<SpanProfile>().map(|p| p.0.clone()))
        else {
            return;
        };

        let mut visitor = LogFieldVisitor::default();
        event.record(&mut visitor);

        let level = LogLevel::from(event.metadata().level());
        let log =
            LogEvent::new(level, visitor.message).with_context(LogContext::Map(visitor.fields));
        // Events raised while this thread is inside the collector, or after
        // finalize, are dropped; a layer cannot report them.
        let _ = clockwork.try_log(log);
    }
}

struct ProfileIdVisitor(Option<String>);

impl Visit for ProfileIdVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == PROFILE_FIELD {
            self.0 = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == PROFILE_FIELD {
            self.0 = Some(format!("{:?}", value));
        }
    }
}

#[derive(Default)]
struct LogFieldVisitor {
    message: String,
    fields: Fields,
}

impl LogFieldVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        self.fields.insert(field.name().to_string(), value);
    }
}

impl Visit for LogFieldVisitor {
    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, value.into());
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.insert(field, value.into());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let formatted = format!("{:?}", value);
        if field.name() == "message" {
            self.message = formatted;
        } else {
            self.insert(field, formatted.into());
        }
    }
}
