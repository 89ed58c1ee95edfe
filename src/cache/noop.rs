//! Always-miss backend used when the external cache is disabled.

use super::{CacheFuture, ExternalCache};

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

impl ExternalCache for NoopCache {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn get<'a>(&'a self, _key: &'a str) -> CacheFuture<'a, Option<String>> {
        Box::pin(async { Ok(None) })
    }

    fn set<'a>(&'a self, _key: &'a str, _value: &'a str) -> CacheFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn never_stores() {
        let cache = NoopCache;
        cache.set("magic-math:1", "1").await.unwrap();
        assert_eq!(cache.get("magic-math:1").await, Ok(None));
    }
}
