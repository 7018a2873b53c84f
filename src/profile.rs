//! The persisted record of one instrumented request.
//!
//! Field names on the wire are camelCase and match what inspection clients
//! read: `timelineData`, `responseDuration`, `memoryPeakBytes`, ...

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::events::{Fields, LogLevel};

/// Key of the synthetic entry spanning the whole request.
pub const TOTAL_EXECUTION_TIME: &str = "Total execution time";

/// One measured span. Times are unix seconds, `duration` is milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub start: f64,
    pub end: f64,
    pub duration: f64,
    #[serde(flatten)]
    pub data: Fields,
}

/// A timeline namespace: either type buckets, or (for the synthetic total)
/// a bare list of entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimelineGroup {
    Entries(Vec<TimelineEntry>),
    Types(IndexMap<String, Vec<TimelineEntry>>),
}

impl TimelineGroup {
    /// Entries recorded under `kind`, if this group is bucketed by type.
    pub fn bucket(&self, kind: &str) -> Option<&[TimelineEntry]> {
        match self {
            Self::Types(types) => types.get(kind).map(Vec::as_slice),
            Self::Entries(_) => None,
        }
    }

    pub fn entries(&self) -> Option<&[TimelineEntry]> {
        match self {
            Self::Entries(entries) => Some(entries),
            Self::Types(_) => None,
        }
    }
}

/// namespace → (type → entries), in first-seen order.
pub type Timeline = IndexMap<String, TimelineGroup>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub time: f64,
    pub level: LogLevel,
    pub message: String,
}

/// Request/response snapshot. Empty sections are omitted entirely.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookies: Option<Fields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_headers: Option<Fields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_headers: Option<Fields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Fields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_body: Option<Fields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_files: Option<Fields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_vars: Option<Fields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<Fields>,
}

/// Keeps a section only when it has at least one entry.
pub fn non_empty(fields: Fields) -> Option<Fields> {
    (!fields.is_empty()).then_some(fields)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub time: f64,
    pub response_time: f64,
    /// Milliseconds.
    pub response_duration: f64,
    pub response_status: u16,
    pub method: String,
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_name: Option<String>,
    pub memory_peak_bytes: u64,
    #[serde(default)]
    pub request: RequestData,
    #[serde(default)]
    pub timeline_data: Timeline,
    #[serde(default)]
    pub log: Vec<LogEntry>,
}
