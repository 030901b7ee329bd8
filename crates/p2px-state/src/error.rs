//! # State Transition Errors

use thiserror::Error;

/// Errors from trade-side state machines.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// The dispute state cannot move from `from` to `to`.
    #[error("invalid dispute state transition from {from} to {to} for trade {trade_id}")]
    InvalidDisputeTransition {
        /// The trade whose state was being changed.
        trade_id: String,
        /// The current state name.
        from: String,
        /// The attempted target state name.
        to: String,
    },

    /// The offer is not in a state that allows closing.
    #[error("open offer {offer_id} cannot be closed in state {state}")]
    OfferNotClosable {
        /// The offer identifier.
        offer_id: String,
        /// The current offer state name.
        state: String,
    },
}
