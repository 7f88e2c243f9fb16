// src/engine/backoff.rs

//! Redeploy backoff policy.
//!
//! A counter starts at 1. Each automatic redeploy takes the current value
//! as its delay and doubles the counter; once the doubled value exceeds the
//! ceiling the counter wraps back to 1. With a ceiling of 64 the delays run
//! 1, 2, 4, 8, 16, 32, 64, 1, 2, ...
//!
//! An externally triggered restart resets the counter to 1.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::sync::lock_or_recover;
use crate::types::BackoffScope;

pub const DEFAULT_BACKOFF_CEILING: u64 = 64;

/// One lock-free backoff counter.
#[derive(Debug)]
pub struct Backoff {
    current: AtomicU64,
    ceiling: u64,
}

impl Backoff {
    pub fn new(ceiling: u64) -> Self {
        Self {
            current: AtomicU64::new(1),
            ceiling: ceiling.max(1),
        }
    }

    /// Return the delay to use now and advance the counter.
    ///
    /// Concurrent callers each observe a distinct value; no doubling is lost.
    pub fn next_delay(&self) -> u64 {
        let mut seen = self.current.load(Ordering::Acquire);
        loop {
            let doubled = seen.saturating_mul(2);
            let next = if doubled > self.ceiling { 1 } else { doubled };
            match self
                .current
                .compare_exchange_weak(seen, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return seen,
                Err(actual) => seen = actual,
            }
        }
    }

    pub fn reset(&self) {
        self.current.store(1, Ordering::Release);
    }

    /// Delay the next call to [`next_delay`](Self::next_delay) will return.
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF_CEILING)
    }
}

/// Backoff counters for all deployments, either one shared counter or one
/// per watched path.
#[derive(Debug)]
pub struct BackoffTable {
    scope: BackoffScope,
    ceiling: u64,
    global: Arc<Backoff>,
    per_path: Mutex<HashMap<PathBuf, Arc<Backoff>>>,
}

impl BackoffTable {
    pub fn new(scope: BackoffScope, ceiling: u64) -> Self {
        Self {
            scope,
            ceiling,
            global: Arc::new(Backoff::new(ceiling)),
            per_path: Mutex::new(HashMap::new()),
        }
    }

    pub fn scope(&self) -> BackoffScope {
        self.scope
    }

    /// Counter governing deployments watching `path`.
    pub fn counter(&self, path: &Path) -> Arc<Backoff> {
        match self.scope {
            BackoffScope::Global => Arc::clone(&self.global),
            BackoffScope::PerPath => {
                let mut table = lock_or_recover(&self.per_path);
                Arc::clone(
                    table
                        .entry(path.to_path_buf())
                        .or_insert_with(|| Arc::new(Backoff::new(self.ceiling))),
                )
            }
        }
    }

    pub fn next_delay(&self, path: &Path) -> u64 {
        self.counter(path).next_delay()
    }

    pub fn reset(&self, path: &Path) {
        self.counter(path).reset();
    }

    pub fn current(&self, path: &Path) -> u64 {
        self.counter(path).current()
    }
}
