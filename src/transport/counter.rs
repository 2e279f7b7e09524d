//! Physical-attempt counter shared by every call in a run.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic count of physical HTTP attempts, retries included.
///
/// Cloning shares the same underlying count.
#[derive(Debug, Clone, Default)]
pub struct OperationCounter {
    count: Arc<AtomicU64>,
}

impl OperationCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one physical attempt.
    pub fn increment(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Current number of attempts.
    pub fn get(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Zero the count at the start of a run.
    pub fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
    }
}
