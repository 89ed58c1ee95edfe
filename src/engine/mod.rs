//! Memoized evaluation of the Magic Math recurrence.
//!
//! ```text
//! f(0) = 0
//! f(1) = 1
//! f(n) = f(n - 1) + f(n - 2) + n      (n >= 2)
//! ```
//!
//! [`RecurrenceEngine`] owns its memo table, so two engines never share
//! results. The table is guarded by a [`RwLock`] that is never held across a
//! recursive call; concurrent callers racing on the same `n` insert the same
//! value, which leaves the table unchanged.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use thiserror::Error;

/// Largest input whose result fits in a `u64`.
///
/// `f(89) = 12_200_160_415_121_876_646`; `f(90)` exceeds `u64::MAX`.
pub const MAX_INPUT: i64 = 89;

/// Errors produced by [`RecurrenceEngine::compute`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("input must be a non-negative integer, got {n}")]
    InvalidInput { n: i64 },

    #[error("result for n = {n} does not fit in 64 bits (maximum input is {MAX_INPUT})")]
    Overflow { n: i64 },
}

/// Computes the Magic Math recurrence with an instance-owned memo table.
///
/// # Examples
///
/// ```
/// use magic_math::engine::RecurrenceEngine;
///
/// let engine = RecurrenceEngine::new();
/// assert_eq!(engine.compute(4), Ok(14));
/// assert_eq!(engine.compute(10), Ok(364));
/// assert!(engine.compute(-1).is_err());
/// ```
#[derive(Debug, Default)]
pub struct RecurrenceEngine {
    memo: RwLock<HashMap<u64, u64>>,
    evaluations: AtomicU64,
}

impl RecurrenceEngine {
    /// Creates an engine with an empty memo table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `f(n)`.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidInput`] if `n` is negative.
    /// - [`EngineError::Overflow`] if `n > MAX_INPUT`.
    pub fn compute(&self, n: i64) -> Result<u64, EngineError> {
        if n < 0 {
            return Err(EngineError::InvalidInput { n });
        }
        if n > MAX_INPUT {
            return Err(EngineError::Overflow { n });
        }
        self.eval(n as u64).ok_or(EngineError::Overflow { n })
    }

    /// Number of recurrence bodies evaluated so far (memo misses for `n >= 2`).
    pub fn evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }

    /// Number of entries currently memoized.
    pub fn memo_len(&self) -> usize {
        self.memo.read().len()
    }

    // `None` signals overflow; the range check in `compute` means this only
    // fires if `MAX_INPUT` is ever raised past what `u64` can hold.
    fn eval(&self, n: u64) -> Option<u64> {
        match n {
            0 => return Some(0),
            1 => return Some(1),
            _ => {}
        }

        if let Some(&cached) = self.memo.read().get(&n) {
            return Some(cached);
        }

        self.evaluations.fetch_add(1, Ordering::Relaxed);
        let value = self
            .eval(n - 1)?
            .checked_add(self.eval(n - 2)?)?
            .checked_add(n)?;

        self.memo.write().insert(n, value);
        Some(value)
    }
}
