use axum::http::{HeaderMap, HeaderName};

use crate::error::ConfigError;

pub const DEFAULT_ACTIVATION_HEADER: &str = "X-Clockwork";

/// Decides from one request header whether a request is instrumented.
#[derive(Debug, Clone)]
pub struct ActivationGate {
    header: HeaderName,
}

impl Default for ActivationGate {
    fn default() -> Self {
        Self::new(HeaderName::from_static("x-clockwork"))
    }
}

impl ActivationGate {
    pub fn new(header: HeaderName) -> Self {
        Self { header }
    }

    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        HeaderName::try_from(name)
            .map(Self::new)
            .map_err(|_| ConfigError::Header(name.to_string()))
    }

    pub fn header(&self) -> &HeaderName {
        &self.header
    }

    /// True when the header is present with a truthy value. Empty, `0`,
    /// `false`, `off` and `no` count as absent.
    pub fn should_activate(&self, headers: &HeaderMap) -> bool {
        headers
            .get(&self.header)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .is_some_and(|value| {
                !value.is_empty()
                    && value != "0"
                    && !["false", "off", "no"]
                        .iter()
                        .any(|falsy| value.eq_ignore_ascii_case(falsy))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use rstest::rstest;

    #[rstest]
    #[case(Some("1"), true)]
    #[case(Some("true"), true)]
    #[case(Some(" yes "), true)]
    #[case(Some("0"), false)]
    #[case(Some(""), false)]
    #[case(Some("False"), false)]
    #[case(Some("off"), false)]
    #[case(None, false)]
    fn activation(#[case] value: Option<&'static str>, #[case] expected: bool) {
        let mut headers = HeaderMap::new();
        if let Some(value) = value {
            headers.insert("x-clockwork", HeaderValue::from_static(value));
        }
        assert_eq!(ActivationGate::default().should_activate(&headers), expected);
    }

    #[test]
    fn custom_header_names_are_case_insensitive() {
        let gate = ActivationGate::from_name("X-Profile-Me").unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-profile-me", HeaderValue::from_static("1"));
        assert!(gate.should_activate(&headers));
        assert!(ActivationGate::from_name("bad header").is_err());
    }
}
