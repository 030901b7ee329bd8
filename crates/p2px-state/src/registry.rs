//! # Trade Registry
//!
//! Lookup of live trades and still-open offers by id, plus the few state
//! operations the mediation protocol consumes. Disputed trades that reach a
//! terminal dispute state move from the live map to the closed map; they are
//! still visible to [`TradeRegistry::find_trade`] so late messages can be
//! matched, but closing them again is a no-op.
//!
//! [`InMemoryTradeRegistry`] is a thread-safe, cloneable handle. The lock is
//! `parking_lot` and never held across a listener call or an `.await`.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use p2px_core::TradeId;

use crate::dispute_state::DisputeState;
use crate::offer::OpenOffer;
use crate::persistence::{NoopPersistence, RequestPersistence};
use crate::trade::{PayoutTx, Trade, TradePhase};

/// Operations on live trades and open offers consumed by the mediation engine.
pub trait TradeRegistry: Send + Sync {
    /// Look up a trade (live or closed) by id.
    fn find_trade(&self, id: &TradeId) -> Option<Trade>;

    /// Mutate a live trade in place. Returns the updated trade, or `None` if
    /// no live trade has this id.
    fn update_trade(&self, id: &TradeId, f: &mut dyn FnMut(&mut Trade)) -> Option<Trade>;

    /// Look up an open offer by id.
    fn find_open_offer(&self, id: &TradeId) -> Option<OpenOffer>;

    /// Close the open offer with this id. Returns `false` if there is none or
    /// it cannot be closed.
    fn close_open_offer(&self, id: &TradeId) -> bool;

    /// Set the trade's terminal dispute state and move it to the closed
    /// trades. Returns `false` if the trade is unknown, already closed, or the
    /// transition is invalid.
    fn close_disputed_trade(&self, id: &TradeId, state: DisputeState) -> bool;

    /// Fire-and-forget persistence request for the trade book.
    fn request_persistence(&self);
}

/// Observer of trade phase changes.
pub trait TradePhaseListener: Send + Sync {
    /// Called after `trade` moved from `previous` to `trade.phase`.
    fn on_phase_changed(&self, trade: &Trade, previous: TradePhase);
}

/// Serializable snapshot of the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeBook {
    /// Live trades.
    pub trades: Vec<Trade>,
    /// Trades closed after a dispute.
    pub closed_trades: Vec<Trade>,
    /// Untaken offers.
    pub open_offers: Vec<OpenOffer>,
}

#[derive(Debug, Default)]
struct Inner {
    trades: BTreeMap<TradeId, Trade>,
    closed: BTreeMap<TradeId, Trade>,
    offers: BTreeMap<TradeId, OpenOffer>,
}

/// In-memory [`TradeRegistry`]. Clones share state.
#[derive(Clone)]
pub struct InMemoryTradeRegistry {
    inner: Arc<RwLock<Inner>>,
    listeners: Arc<RwLock<Vec<Arc<dyn TradePhaseListener>>>>,
    persistence: Arc<dyn RequestPersistence>,
}

impl std::fmt::Debug for InMemoryTradeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("InMemoryTradeRegistry")
            .field("trades", &inner.trades.len())
            .field("closed", &inner.closed.len())
            .field("offers", &inner.offers.len())
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

impl Default for InMemoryTradeRegistry {
    fn default() -> Self {
        Self::new(Arc::new(NoopPersistence))
    }
}

impl InMemoryTradeRegistry {
    /// Create an empty registry reporting persistence requests to `persistence`.
    pub fn new(persistence: Arc<dyn RequestPersistence>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            listeners: Arc::new(RwLock::new(Vec::new())),
            persistence,
        }
    }

    /// Restore a registry from a snapshot.
    pub fn from_book(book: TradeBook, persistence: Arc<dyn RequestPersistence>) -> Self {
        let registry = Self::new(persistence);
        {
            let mut inner = registry.inner.write();
            inner.trades = book.trades.into_iter().map(|t| (t.id.clone(), t)).collect();
            inner.closed = book
                .closed_trades
                .into_iter()
                .map(|t| (t.id.clone(), t))
                .collect();
            inner.offers = book
                .open_offers
                .into_iter()
                .map(|o| (o.id.clone(), o))
                .collect();
        }
        registry
    }

    /// Register a phase listener.
    pub fn add_phase_listener(&self, listener: Arc<dyn TradePhaseListener>) {
        self.listeners.write().push(listener);
    }

    /// Insert a live trade, returning the previous one with the same id.
    pub fn add_trade(&self, trade: Trade) -> Option<Trade> {
        self.inner.write().trades.insert(trade.id.clone(), trade)
    }

    /// Insert an open offer, returning the previous one with the same id.
    pub fn add_open_offer(&self, offer: OpenOffer) -> Option<OpenOffer> {
        self.inner.write().offers.insert(offer.id.clone(), offer)
    }

    /// Move a live trade to `phase` and notify listeners. Returns `false` if
    /// there is no live trade with this id.
    pub fn set_phase(&self, id: &TradeId, phase: TradePhase) -> bool {
        let changed = {
            let mut inner = self.inner.write();
            match inner.trades.get_mut(id) {
                Some(trade) if trade.phase != phase => {
                    let previous = trade.phase;
                    trade.phase = phase;
                    Some((trade.clone(), previous))
                }
                Some(_) => return true,
                None => None,
            }
        };
        match changed {
            Some((trade, previous)) => {
                tracing::info!(trade_id = %id, from = %previous, to = %phase, "trade phase changed");
                self.notify(&trade, previous);
                true
            }
            None => false,
        }
    }

    /// Record the published payout transaction and move the trade to
    /// [`TradePhase::PayoutPublished`].
    pub fn set_payout_tx(&self, id: &TradeId, payout_tx: PayoutTx) -> bool {
        let found = self
            .inner
            .write()
            .trades
            .get_mut(id)
            .map(|trade| trade.payout_tx = Some(payout_tx))
            .is_some();
        found && self.set_phase(id, TradePhase::PayoutPublished)
    }

    /// Whether the trade with this id has been moved to the closed trades.
    pub fn is_closed(&self, id: &TradeId) -> bool {
        self.inner.read().closed.contains_key(id)
    }

    /// Snapshot every trade and offer.
    pub fn snapshot(&self) -> TradeBook {
        let inner = self.inner.read();
        TradeBook {
            trades: inner.trades.values().cloned().collect(),
            closed_trades: inner.closed.values().cloned().collect(),
            open_offers: inner.offers.values().cloned().collect(),
        }
    }

    fn notify(&self, trade: &Trade, previous: TradePhase) {
        let listeners: Vec<_> = self.listeners.read().iter().cloned().collect();
        for listener in listeners {
            listener.on_phase_changed(trade, previous);
        }
    }
}

impl TradeRegistry for InMemoryTradeRegistry {
    fn find_trade(&self, id: &TradeId) -> Option<Trade> {
        let inner = self.inner.read();
        inner
            .trades
            .get(id)
            .or_else(|| inner.closed.get(id))
            .cloned()
    }

    fn update_trade(&self, id: &TradeId, f: &mut dyn FnMut(&mut Trade)) -> Option<Trade> {
        let mut inner = self.inner.write();
        let trade = inner.trades.get_mut(id)?;
        f(trade);
        Some(trade.clone())
    }

    fn find_open_offer(&self, id: &TradeId) -> Option<OpenOffer> {
        self.inner.read().offers.get(id).cloned()
    }

    fn close_open_offer(&self, id: &TradeId) -> bool {
        let mut inner = self.inner.write();
        let Some(offer) = inner.offers.get_mut(id) else {
            return false;
        };
        match offer.close() {
            Ok(()) => {
                tracing::info!(offer_id = %id, "open offer closed");
                true
            }
            Err(e) => {
                tracing::warn!(offer_id = %id, error = %e, "open offer not closed");
                false
            }
        }
    }

    fn close_disputed_trade(&self, id: &TradeId, state: DisputeState) -> bool {
        let mut inner = self.inner.write();
        if inner.closed.contains_key(id) {
            tracing::debug!(trade_id = %id, "disputed trade already closed");
            return false;
        }
        let Some(mut trade) = inner.trades.remove(id) else {
            return false;
        };
        if let Err(e) = trade.advance_dispute_state(state) {
            tracing::warn!(trade_id = %id, error = %e, "disputed trade not closed");
            inner.trades.insert(id.clone(), trade);
            return false;
        }
        tracing::info!(trade_id = %id, dispute_state = %state, "disputed trade closed");
        inner.closed.insert(id.clone(), trade);
        true
    }

    fn request_persistence(&self) {
        self.persistence.request_persistence();
    }
}
