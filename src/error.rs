use thiserror::Error;

/// Misuse of the per-request collector. These are integration bugs and
/// are surfaced to the caller instead of being swallowed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CollectorError {
    #[error("collector is not collecting (state: {0})")]
    NotCollecting(&'static str),
    #[error("profile has already been finalized")]
    AlreadyFinalized,
    #[error("incomplete request context: missing {0}")]
    IncompleteContext(&'static str),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("session: {0}")]
    Session(#[from] SessionError),
    #[error("session storage selected but the request carries no session")]
    NoSession,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("invalid activation header name: {0}")]
    Header(String),
    #[error("{0} driver is redis but no redis connection was configured")]
    RedisRequired(&'static str),
}
