//! In-process cache backend.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::{CacheFuture, ExternalCache};

/// A [`HashMap`]-backed cache living inside the current process.
///
/// Useful for local runs without Redis and as the observable cache in tests.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the value stored under `key`.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    /// Inserts a value directly, bypassing the async interface.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.write().insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl ExternalCache for MemoryCache {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Option<String>> {
        let value = self.peek(key);
        Box::pin(async move { Ok(value) })
    }

    fn set<'a>(&'a self, key: &'a str, value: &'a str) -> CacheFuture<'a, ()> {
        self.insert(key, value);
        Box::pin(async { Ok(()) })
    }
}
