//! Cache-fronted lookup: external cache first, engine on a miss.
//!
//! ```text
//! lookup(n) ── GET magic-math:<n> ──► hit ──────────────► value
//!                    │
//!                    └─► miss ─► engine.compute(n) ─► SET magic-math:<n>
//! ```
//!
//! Every cache call is bounded by a timeout. What happens on a cache error or
//! timeout depends on the configured [`CachePolicy`].

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{CacheError, CacheFuture, CachePolicy, ExternalCache, cache_key};
use crate::engine::{EngineError, MAX_INPUT, RecurrenceEngine};

/// Default bound on a single external cache call.
pub const DEFAULT_CACHE_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Where a looked-up value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    ExternalCache,
    Computed,
}

/// The outcome of a successful lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lookup {
    pub value: u64,
    pub source: Source,
}

/// Orchestrates the external cache and the [`RecurrenceEngine`].
///
/// Cheap to share: wrap it in an [`Arc`] and hand a clone to every request.
pub struct CacheFrontedLookup {
    engine: Arc<RecurrenceEngine>,
    cache: Arc<dyn ExternalCache>,
    policy: CachePolicy,
    timeout: Duration,
}

impl CacheFrontedLookup {
    /// Creates a lookup with the fail-open policy and the default timeout.
    pub fn new(engine: Arc<RecurrenceEngine>, cache: Arc<dyn ExternalCache>) -> Self {
        Self {
            engine,
            cache,
            policy: CachePolicy::default(),
            timeout: DEFAULT_CACHE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn engine(&self) -> &RecurrenceEngine {
        &self.engine
    }

    /// Returns `f(n)`, preferring a value already in the external cache.
    ///
    /// # Errors
    ///
    /// - [`LookupError::Engine`] for negative or oversized input.
    /// - [`LookupError::Cache`] only under [`CachePolicy::FailFast`].
    pub async fn lookup(&self, n: i64) -> Result<Lookup, LookupError> {
        if n < 0 {
            return Err(EngineError::InvalidInput { n }.into());
        }
        if n > MAX_INPUT {
            return Err(EngineError::Overflow { n }.into());
        }

        let key = cache_key(n);

        if let Some(value) = self.read_cached(&key).await? {
            info!(n, cache = self.cache.name(), "cache hit");
            return Ok(Lookup {
                value,
                source: Source::ExternalCache,
            });
        }

        let value = self.engine.compute(n)?;
        self.write_back(&key, value).await?;

        info!(n, result = value, "calculated magic-math value");
        Ok(Lookup {
            value,
            source: Source::Computed,
        })
    }

    async fn read_cached(&self, key: &str) -> Result<Option<u64>, CacheError> {
        let raw = match self.bounded("get", self.cache.get(key)).await {
            Ok(raw) => raw,
            Err(e) => return self.degrade(key, e).map(|()| None),
        };

        let Some(raw) = raw else {
            debug!(key, "cache miss");
            return Ok(None);
        };

        match raw.trim().parse::<u64>() {
            Ok(value) => Ok(Some(value)),
            Err(_) => {
                warn!(key, value = %raw, "discarding unparsable cache entry");
                Ok(None)
            }
        }
    }

    async fn write_back(&self, key: &str, value: u64) -> Result<(), CacheError> {
        let encoded = value.to_string();
        match self.bounded("set", self.cache.set(key, &encoded)).await {
            Ok(()) => Ok(()),
            Err(e) => self.degrade(key, e),
        }
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: CacheFuture<'_, T>,
    ) -> Result<T, CacheError> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout {
                operation,
                after: self.timeout,
            }),
        }
    }

    fn degrade(&self, key: &str, error: CacheError) -> Result<(), CacheError> {
        match self.policy {
            CachePolicy::FailOpen => {
                warn!(key, cache = self.cache.name(), error = %error, "external cache degraded, continuing without it");
                Ok(())
            }
            CachePolicy::FailFast => Err(error),
        }
    }
}
