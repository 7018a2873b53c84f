//! Request/response facts handed to the collector at finalize time.

use axum::http::HeaderMap;
use serde_json::Value;

use super::controller::Handler;
use crate::events::Fields;
use crate::session::SessionData;
use crate::storage::SESSION_SLOT;

/// Everything `finalize` reads besides the collected events.
///
/// `started_at` must be captured when the request arrives; a context
/// without it cannot produce a profile.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub started_at: Option<f64>,
    pub method: String,
    pub uri: String,
    pub controller: Option<Handler>,
    pub response_status: u16,
    pub memory_peak_bytes: u64,
    pub cookies: Fields,
    pub request_headers: Fields,
    pub response_headers: Fields,
    pub query: Fields,
    pub post_body: Fields,
    pub server_vars: Fields,
    pub session: Option<SessionData>,
}

/// Folds `(key, value)` pairs into a map; a repeated key collects its
/// values into an array.
pub fn pairs_to_fields<I>(pairs: I) -> Fields
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut fields = Fields::new();
    for (key, value) in pairs {
        match fields.get_mut(&key) {
            Some(Value::Array(values)) => values.push(value.into()),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value.into()]);
            }
            None => {
                fields.insert(key, value.into());
            }
        }
    }
    fields
}

pub fn headers_to_fields(headers: &HeaderMap) -> Fields {
    pairs_to_fields(headers.iter().map(|(name, value)| {
        (
            name.as_str().to_string(),
            String::from_utf8_lossy(value.as_bytes()).into_owned(),
        )
    }))
}

/// Parses an urlencoded string (`a=1&b=2`). Malformed input yields an
/// empty map.
pub fn urlencoded_to_fields(raw: &str) -> Fields {
    serde_urlencoded::from_str::<Vec<(String, String)>>(raw)
        .map(pairs_to_fields)
        .unwrap_or_default()
}

/// Session contents as they appear in a profile: objects replaced by their
/// tagged documents, the profile slot removed.
pub fn snapshot_session(data: &SessionData) -> Fields {
    data.iter()
        .filter(|(key, _)| key.as_str() != SESSION_SLOT)
        .map(|(key, entry)| (key.clone(), entry.to_document()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SerdeObject, SessionEntry};
    use axum::http::HeaderValue;
    use serde_json::json;

    #[test]
    fn repeated_keys_collect_into_arrays() {
        let fields = urlencoded_to_fields("tag=a&page=2&tag=b&tag=c");
        assert_eq!(
            Value::Object(fields),
            json!({"tag": ["a", "b", "c"], "page": "2"})
        );
    }

    #[test]
    fn header_names_are_lowercase() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Clockwork", HeaderValue::from_static("1"));
        headers.append("accept", HeaderValue::from_static("text/html"));
        headers.append("accept", HeaderValue::from_static("application/json"));
        assert_eq!(
            Value::Object(headers_to_fields(&headers)),
            json!({"x-clockwork": "1", "accept": ["text/html", "application/json"]})
        );
    }

    #[test]
    fn session_snapshot_drops_slot_and_tags_objects() {
        let mut data = SessionData::new();
        data.insert("user".into(), SessionEntry::Value(json!(7)));
        data.insert(SESSION_SLOT.into(), SessionEntry::Value(json!({"x": {}})));
        data.insert(
            "cart".into(),
            SessionEntry::object(SerdeObject::new("Cart", json!({"items": 2}))),
        );

        assert_eq!(
            Value::Object(snapshot_session(&data)),
            json!({"user": 7, "cart": {"_className": "Cart", "items": 2}})
        );
    }
}
