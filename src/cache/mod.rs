//! External result cache shared across service instances.
//!
//! The lookup layer talks to the cache through the [`ExternalCache`] trait.
//! Three backends are provided:
//!
//! | Backend         | Use                                              |
//! |-----------------|--------------------------------------------------|
//! | [`RedisCache`]  | Production; shared by every instance             |
//! | [`MemoryCache`] | Single process; tests and local runs             |
//! | [`NoopCache`]   | Cache disabled or unreachable; always misses     |
//!
//! Entries are stored under `magic-math:<n>` as the decimal string of the
//! result. That format is part of the persisted contract: any instance,
//! whatever its version, must be able to read what another one wrote.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::CacheConfig;

mod memory;
mod noop;
mod redis_cache;

pub use memory::MemoryCache;
pub use noop::NoopCache;
pub use redis_cache::RedisCache;

/// Prefix of every key this service writes.
pub const KEY_PREFIX: &str = "magic-math";

/// Returns the external cache key for input `n`.
///
/// ```
/// assert_eq!(magic_math::cache::cache_key(5), "magic-math:5");
/// ```
pub fn cache_key(n: i64) -> String {
    format!("{KEY_PREFIX}:{n}")
}

/// Errors raised by an external cache backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("cache connection failed: {0}")]
    Connection(String),

    #[error("cache command failed: {0}")]
    Command(String),

    #[error("cache {operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Boxed future returned by [`ExternalCache`] operations.
pub type CacheFuture<'a, T> = Pin<Box<dyn Future<Output = CacheResult<T>> + Send + 'a>>;

/// A string key-value store consulted before computing and written after.
///
/// Implementations must be `Send + Sync`: one instance is shared by every
/// request task.
pub trait ExternalCache: Send + Sync {
    /// Short backend name used in log fields.
    fn name(&self) -> &'static str;

    /// Fetches the value stored under `key`, `Ok(None)` on a miss.
    fn get<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> CacheFuture<'a, ()>;
}

/// What the lookup does when the external cache errors or times out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CachePolicy {
    /// Treat failures as misses and keep serving from the engine.
    #[default]
    FailOpen,
    /// Fail the request.
    FailFast,
}

impl CachePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FailOpen => "fail-open",
            Self::FailFast => "fail-fast",
        }
    }
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CachePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail-open" | "fail_open" | "open" => Ok(Self::FailOpen),
            "fail-fast" | "fail_fast" | "fast" => Ok(Self::FailFast),
            other => Err(format!(
                "unknown cache policy `{other}` (expected `fail-open` or `fail-fast`)"
            )),
        }
    }
}

/// Opens the external cache described by `config`.
///
/// A disabled cache yields [`NoopCache`]. When Redis cannot be reached, the
/// fail-open policy also yields [`NoopCache`] (after a warning) while
/// fail-fast returns the error so startup aborts.
pub async fn connect(config: &CacheConfig) -> CacheResult<Arc<dyn ExternalCache>> {
    if !config.enabled {
        info!("external cache disabled");
        return Ok(Arc::new(NoopCache));
    }

    match RedisCache::connect(&config.url, config.timeout()).await {
        Ok(cache) => Ok(Arc::new(cache)),
        Err(e) if config.policy == CachePolicy::FailOpen => {
            warn!(error = %e, "redis unavailable, serving without external cache");
            Ok(Arc::new(NoopCache))
        }
        Err(e) => Err(e),
    }
}
