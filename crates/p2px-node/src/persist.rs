//! # Deferred Persistence
//!
//! Persistence requests from the registry and the dispute store only raise a
//! [`DirtyFlag`]. The node loop calls [`Persister::flush`] after each event,
//! which writes whichever snapshots are dirty. Write failures are logged and
//! never reach the protocol; the failed snapshot is marked dirty again so the
//! next flush retries it.
//!
//! Flushing runs on the node task between events, so a snapshot always
//! matches the state after the event that dirtied it. Snapshots hold one
//! entry per live trade and dispute and are written with blocking `std::fs`
//! calls on that task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use p2px_state::{InMemoryTradeRegistry, RequestPersistence};
use p2px_support::DisputeStore;

use crate::snapshot::JsonSnapshotStore;

/// A persistence request that has not been written yet. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct DirtyFlag(Arc<AtomicBool>);

impl DirtyFlag {
    /// Create a clean flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a request is outstanding.
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Clear the flag, returning whether it was set.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

impl RequestPersistence for DirtyFlag {
    fn request_persistence(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Writes dirty snapshots. Without a store, requests are dropped after being
/// cleared, which is what replay and tests want.
#[derive(Debug, Clone, Default)]
pub struct Persister {
    store: Option<JsonSnapshotStore>,
    trades: DirtyFlag,
    disputes: DirtyFlag,
}

impl Persister {
    /// Persist into `store`.
    pub fn new(store: JsonSnapshotStore) -> Self {
        Self {
            store: Some(store),
            ..Self::default()
        }
    }

    /// A persister that writes nothing.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// The signal to hand to the trade registry.
    pub fn trades_signal(&self) -> Arc<dyn RequestPersistence> {
        Arc::new(self.trades.clone())
    }

    /// The signal to hand to the dispute store.
    pub fn disputes_signal(&self) -> Arc<dyn RequestPersistence> {
        Arc::new(self.disputes.clone())
    }

    /// Write every dirty snapshot. Returns how many were written.
    pub fn flush(&self, registry: &InMemoryTradeRegistry, disputes: &DisputeStore) -> usize {
        let mut written = 0;
        if self.trades.take() {
            if let Some(store) = &self.store {
                match store.save_trades(&registry.snapshot()) {
                    Ok(()) => written += 1,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to persist trade book");
                        self.trades.request_persistence();
                    }
                }
            }
        }
        if self.disputes.take() {
            if let Some(store) = &self.store {
                match store.save_disputes(&disputes.snapshot()) {
                    Ok(()) => written += 1,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to persist disputes");
                        self.disputes.request_persistence();
                    }
                }
            }
        }
        written
    }
}
