//! Advisory counters.
//!
//! Handles are cheap to clone and share one value; there is no global
//! registry, the owner of a node creates one [`StorageMetrics`] and hands
//! it to every transfer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicU64>);

impl Counter {
    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    /// Saturates at zero.
    pub fn sub(&self, n: u64) {
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(n)));
    }

    #[must_use]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Default)]
pub struct StorageMetrics {
    /// Streamed keys found outside the locally owned ranges.
    pub total_ops_for_invalid_token: Counter,
    /// Bytes of segments accepted on this node.
    pub load: Counter,
}

impl StorageMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}
