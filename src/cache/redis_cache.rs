//! Redis-backed cache using a multiplexed [`ConnectionManager`].
//!
//! The manager reconnects on its own after a dropped connection, so a
//! single instance is created at startup and cloned per command.

use std::time::Duration;

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::info;

use super::{CacheError, CacheFuture, CacheResult, ExternalCache};

pub struct RedisCache {
    manager: ConnectionManager,
}

impl RedisCache {
    /// Opens a connection to the Redis server at `url`.
    ///
    /// # Errors
    ///
    /// - [`CacheError::Connection`] if the URL is malformed or the server
    ///   refuses the connection.
    /// - [`CacheError::Timeout`] if no connection is established within
    ///   `connect_timeout`.
    pub async fn connect(url: &str, connect_timeout: Duration) -> CacheResult<Self> {
        let client =
            redis::Client::open(url).map_err(|e| CacheError::Connection(e.to_string()))?;

        let manager = tokio::time::timeout(connect_timeout, client.get_connection_manager())
            .await
            .map_err(|_| CacheError::Timeout {
                operation: "connect",
                after: connect_timeout,
            })?
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        let info = client.get_connection_info();
        info!(host = %info.addr, db = info.redis.db, "redis cache connected");
        Ok(Self { manager })
    }
}

impl ExternalCache for RedisCache {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn get<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Option<String>> {
        let mut conn = self.manager.clone();
        Box::pin(async move {
            conn.get::<_, Option<String>>(key)
                .await
                .map_err(|e| CacheError::Command(e.to_string()))
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> CacheFuture<'a, ()> {
        let mut conn = self.manager.clone();
        Box::pin(async move {
            conn.set::<_, _, ()>(key, value)
                .await
                .map_err(|e| CacheError::Command(e.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn malformed_url_is_a_connection_error() {
        let result = RedisCache::connect("not a redis url", Duration::from_millis(100)).await;
        assert!(matches!(result, Err(CacheError::Connection(_))));
    }

    #[tokio::test]
    async fn unsupported_scheme_is_a_connection_error() {
        let result = RedisCache::connect("http://localhost:6379", Duration::from_millis(100)).await;
        assert!(matches!(result, Err(CacheError::Connection(_))));
    }
}
