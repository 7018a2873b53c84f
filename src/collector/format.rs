use serde_json::Value;

use crate::events::LogContext;

/// Upper-cases the first character, leaves the rest alone.
pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// `USER_ID` and `user_id` both label as `User_id`.
fn context_label(key: &str) -> String {
    capitalize(&key.to_lowercase())
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Appends the bracketed context to `message`.
///
/// Named context renders as `msg [Key: value] [Other: value]`; positional
/// context renders as `msg [Context: <json>]`. Empty context leaves the
/// message unchanged.
pub fn render_log_message(message: &str, context: &LogContext) -> String {
    if context.is_empty() {
        return message.to_string();
    }

    let rendered = match context {
        LogContext::Map(fields) => fields
            .iter()
            .map(|(key, value)| format!("{}: {}", context_label(key), render_value(value)))
            .collect::<Vec<_>>()
            .join("] ["),
        LogContext::List(values) => {
            format!("Context: {}", Value::Array(values.clone()))
        }
    };

    format!("{message} [{rendered}]")
}
