//! # Dispute Store
//!
//! Disputes of one support type keyed by trade id. The engine owns the store
//! and is its only writer; every mutation goes through a method here so the
//! dispute invariants (append-only deduplicated chat, closed flag never reset)
//! hold regardless of caller.

use std::collections::BTreeMap;
use std::sync::Arc;

use p2px_core::TradeId;
use p2px_state::{NoopPersistence, RequestPersistence};

use crate::chat::ChatMessage;
use crate::dispute::{Dispute, DisputeResult};

/// Outcome of [`DisputeStore::append_chat_message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The message was appended.
    Appended,
    /// An equal message was already present; nothing changed.
    Duplicate,
    /// No dispute exists for the message's trade.
    NoDispute,
}

/// Disputes keyed by trade id.
pub struct DisputeStore {
    disputes: BTreeMap<TradeId, Dispute>,
    persistence: Arc<dyn RequestPersistence>,
}

impl std::fmt::Debug for DisputeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisputeStore")
            .field("disputes", &self.disputes.len())
            .finish()
    }
}

impl Default for DisputeStore {
    fn default() -> Self {
        Self::new(Arc::new(NoopPersistence))
    }
}

impl DisputeStore {
    /// Create an empty store.
    pub fn new(persistence: Arc<dyn RequestPersistence>) -> Self {
        Self {
            disputes: BTreeMap::new(),
            persistence,
        }
    }

    /// Restore a store from previously persisted disputes.
    pub fn from_disputes(
        disputes: impl IntoIterator<Item = Dispute>,
        persistence: Arc<dyn RequestPersistence>,
    ) -> Self {
        Self {
            disputes: disputes
                .into_iter()
                .map(|d| (d.trade_id.clone(), d))
                .collect(),
            persistence,
        }
    }

    /// Add a dispute. Returns `false` and leaves the store unchanged if one
    /// already exists for the trade.
    pub fn add(&mut self, dispute: Dispute) -> bool {
        if self.disputes.contains_key(&dispute.trade_id) {
            return false;
        }
        self.disputes.insert(dispute.trade_id.clone(), dispute);
        true
    }

    /// Look up the dispute for a trade.
    pub fn find_by_trade_id(&self, trade_id: &TradeId) -> Option<&Dispute> {
        self.disputes.get(trade_id)
    }

    /// Look up the dispute a result refers to.
    pub fn find_by_result(&self, result: &DisputeResult) -> Option<&Dispute> {
        self.find_by_trade_id(&result.trade_id)
    }

    /// Append a chat message to the dispute of `message.trade_id` unless an
    /// equal message is already present.
    pub fn append_chat_message(&mut self, message: ChatMessage) -> AppendOutcome {
        match self.disputes.get_mut(&message.trade_id) {
            None => AppendOutcome::NoDispute,
            Some(dispute) => {
                if dispute.add_chat_message(message) {
                    AppendOutcome::Appended
                } else {
                    AppendOutcome::Duplicate
                }
            }
        }
    }

    /// Mark the dispute for `trade_id` closed. Returns `false` if there is none.
    pub fn mark_closed(&mut self, trade_id: &TradeId) -> bool {
        self.disputes
            .get_mut(trade_id)
            .map(Dispute::set_closed)
            .is_some()
    }

    /// Attach a result to the dispute it refers to, replacing any previous
    /// result. Returns `false` if there is no such dispute.
    pub fn attach_result(&mut self, result: DisputeResult) -> bool {
        match self.disputes.get_mut(&result.trade_id) {
            Some(dispute) => {
                dispute.set_dispute_result(result);
                true
            }
            None => false,
        }
    }

    /// Fire-and-forget persistence request.
    pub fn request_persistence(&self) {
        self.persistence.request_persistence();
    }

    /// Iterate over all disputes in trade id order.
    pub fn iter(&self) -> impl Iterator<Item = &Dispute> {
        self.disputes.values()
    }

    /// Trade ids of all stored disputes.
    pub fn trade_ids(&self) -> Vec<TradeId> {
        self.disputes.keys().cloned().collect()
    }

    /// Number of stored disputes.
    pub fn len(&self) -> usize {
        self.disputes.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.disputes.is_empty()
    }

    /// Clone every dispute, for persistence.
    pub fn snapshot(&self) -> Vec<Dispute> {
        self.disputes.values().cloned().collect()
    }
}
