use std::fmt;

/// Display label for whatever handled the request.
///
/// Handlers attach one to their response via
/// `response.extensions_mut().insert(Handler::method("Users", "show"))`.
/// Labels are diagnostic only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handler {
    /// Already formatted, e.g. `Users::show` or a route path.
    Named(String),
    /// A method on a type.
    Method { owner: String, method: String },
    /// An anonymous handler, labelled by its call site.
    Closure { owner: String, label: String },
}

impl Handler {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    pub fn method(owner: impl Into<String>, method: impl Into<String>) -> Self {
        Self::Method {
            owner: owner.into(),
            method: method.into(),
        }
    }

    pub fn closure(owner: impl Into<String>, label: impl Into<String>) -> Self {
        Self::Closure {
            owner: owner.into(),
            label: label.into(),
        }
    }

    /// Labels an anonymous handler with the line it was created on.
    #[track_caller]
    pub fn closure_here(owner: impl Into<String>) -> Self {
        let location = std::panic::Location::caller();
        Self::closure(owner, format!("{}:{}", location.line(), location.line()))
    }
}

impl fmt::Display for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Named(name) => f.write_str(name),
            Handler::Method { owner, method } => write!(f, "{owner}::{method}"),
            Handler::Closure { owner, label } => write!(f, "{owner}::closure[{label}]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels() {
        assert_eq!(Handler::named("Home::index").to_string(), "Home::index");
        assert_eq!(Handler::method("Users", "show").to_string(), "Users::show");
        assert_eq!(
            Handler::closure("Routes", "12:18").to_string(),
            "Routes::closure[12:18]"
        );
    }

    #[test]
    fn closure_here_uses_call_site_line() {
        let line = line!() + 1;
        let handler = Handler::closure_here("Routes");
        assert_eq!(handler.to_string(), format!("Routes::closure[{line}:{line}]"));
    }
}
