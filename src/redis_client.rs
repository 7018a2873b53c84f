use redis::aio::ConnectionManager;

use crate::error::ConfigError;

/// Creates a single `ConnectionManager` that auto-reconnects on failure.
///
/// `ConnectionManager` is cheaply cloneable; every clone shares the same
/// underlying multiplexed TCP connection, so the cache backend and the
/// session store can both hold one.
pub async fn connect(url: &str) -> Result<ConnectionManager, ConfigError> {
    let client = redis::Client::open(url)?;
    Ok(ConnectionManager::new(client).await?)
}
