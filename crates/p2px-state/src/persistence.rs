//! # Persistence Requests
//!
//! Stores signal "my contents changed, please write them out" and return
//! immediately. Durability mechanics live elsewhere; failures there are
//! logged by the implementation and never reach the caller.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Fire-and-forget persistence signal.
pub trait RequestPersistence: Send + Sync {
    /// Ask for the owning store to be persisted at the next opportunity.
    fn request_persistence(&self);
}

/// Discards every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPersistence;

impl RequestPersistence for NoopPersistence {
    fn request_persistence(&self) {}
}

/// Counts requests. Clones share the counter.
#[derive(Debug, Clone, Default)]
pub struct PersistenceCounter {
    count: Arc<AtomicUsize>,
}

impl PersistenceCounter {
    /// Create a counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of requests observed so far.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Number of requests since the last call to `take`, resetting to zero.
    pub fn take(&self) -> usize {
        self.count.swap(0, Ordering::SeqCst)
    }
}

impl RequestPersistence for PersistenceCounter {
    fn request_persistence(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}
