//! Event shapes emitted by instrumented code while a request is handled.
//!
//! Both event types are immutable once built: producers construct them with
//! the builder methods and hand them to the request's [`Clockwork`] handle.
//!
//! [`Clockwork`]: crate::collector::Clockwork

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form key/value payload, insertion ordered.
pub type Fields = Map<String, Value>;

/// Current wall-clock time as fractional unix seconds.
pub fn unix_now() -> f64 {
    to_unix(Utc::now())
}

pub fn to_unix(t: DateTime<Utc>) -> f64 {
    t.timestamp_micros() as f64 / 1_000_000.0
}

// ─── Timer events ────────────────────────────────────────────────

/// One measured span of work, e.g. `db` / `query`.
#[derive(Debug, Clone, PartialEq)]
pub struct TimerEvent {
    namespace: String,
    kind: String,
    start: f64,
    duration: f64,
    data: Fields,
}

impl TimerEvent {
    /// `start` is unix seconds, `duration` is seconds.
    pub fn new(
        namespace: impl Into<String>,
        kind: impl Into<String>,
        start: f64,
        duration: f64,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            kind: kind.into(),
            start,
            duration,
            data: Fields::new(),
        }
    }

    /// Builds an event from a dotted name such as `http.request`.
    /// A name without a dot uses the whole name as namespace and `default`
    /// as type.
    pub fn from_name(name: &str, start: f64, duration: f64) -> Self {
        match name.split_once('.') {
            Some((namespace, kind)) => Self::new(namespace, kind, start, duration),
            None => Self::new(name, "default", start, duration),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_fields(mut self, fields: Fields) -> Self {
        self.data.extend(fields);
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn data(&self) -> &Fields {
        &self.data
    }
}

// ─── Log events ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
    Emergency,
}

impl From<&tracing::Level> for LogLevel {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE | tracing::Level::DEBUG => Self::Debug,
            tracing::Level::INFO => Self::Info,
            tracing::Level::WARN => Self::Warning,
            tracing::Level::ERROR => Self::Error,
        }
    }
}

/// Structured context attached to a log record.
#[derive(Debug, Clone, PartialEq)]
pub enum LogContext {
    /// Named entries, rendered one bracket per entry.
    Map(Fields),
    /// Positional values, rendered as a single `Context:` bracket.
    List(Vec<Value>),
}

impl Default for LogContext {
    fn default() -> Self {
        Self::Map(Fields::new())
    }
}

impl LogContext {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Map(fields) => fields.is_empty(),
            Self::List(values) => values.is_empty(),
        }
    }
}

impl From<Fields> for LogContext {
    /// An object whose keys are exactly `"0"..n` is positional.
    fn from(fields: Fields) -> Self {
        let sequential = !fields.is_empty()
            && fields
                .keys()
                .enumerate()
                .all(|(i, key)| *key == i.to_string());
        if sequential {
            Self::List(fields.into_iter().map(|(_, v)| v).collect())
        } else {
            Self::Map(fields)
        }
    }
}

impl From<Vec<Value>> for LogContext {
    fn from(values: Vec<Value>) -> Self {
        Self::List(values)
    }
}

impl From<Value> for LogContext {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(fields) => fields.into(),
            Value::Array(values) => Self::List(values),
            Value::Null => Self::default(),
            scalar => Self::List(vec![scalar]),
        }
    }
}

/// One log record produced during the request.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    timestamp: f64,
    level: LogLevel,
    message: String,
    context: LogContext,
}

impl LogEvent {
    /// Stamped with the current time.
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: unix_now(),
            level,
            message: message.into(),
            context: LogContext::default(),
        }
    }

    pub fn at(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_context(mut self, context: impl Into<LogContext>) -> Self {
        self.context = context.into();
        self
    }

    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &LogContext {
        &self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn dotted_name_splits_into_namespace_and_type() {
        let event = TimerEvent::from_name("http.request", 1.0, 0.5);
        assert_eq!(event.namespace(), "http");
        assert_eq!(event.kind(), "request");

        let event = TimerEvent::from_name("render", 1.0, 0.5);
        assert_eq!(event.namespace(), "render");
        assert_eq!(event.kind(), "default");
    }

    #[test]
    fn object_with_sequential_keys_is_positional() {
        let ctx = LogContext::from(json!({"0": "a", "1": "b"}));
        assert_eq!(ctx, LogContext::List(vec![json!("a"), json!("b")]));

        let ctx = LogContext::from(json!({"1": "a", "0": "b"}));
        assert!(matches!(ctx, LogContext::Map(_)));

        let ctx = LogContext::from(json!({"user_id": 42}));
        assert!(matches!(ctx, LogContext::Map(_)));
    }

    #[rstest]
    #[case(json!({"00": "a", "1": "b"}))]
    #[case(json!({"+0": "a", "1": "b"}))]
    #[case(json!({"0": "a", "01": "b"}))]
    fn padded_or_signed_indices_stay_associative(#[case] context: Value) {
        assert!(matches!(LogContext::from(context), LogContext::Map(_)));
    }

    #[test]
    fn null_context_is_empty() {
        assert!(LogContext::from(Value::Null).is_empty());
        assert!(!LogContext::from(json!([1])).is_empty());
    }

    #[test]
    fn tracing_levels_map_to_log_levels() {
        assert_eq!(LogLevel::from(&tracing::Level::TRACE), LogLevel::Debug);
        assert_eq!(LogLevel::from(&tracing::Level::WARN), LogLevel::Warning);
        assert_eq!(
            serde_json::to_value(LogLevel::Warning).unwrap(),
            json!("warning")
        );
    }
}
