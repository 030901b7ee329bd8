//! # Open Offers
//!
//! An offer still resting in the order book. A dispute can concern an offer
//! that was never taken into a trade; when its result arrives there is no
//! trade to update and the offer is closed instead.

use serde::{Deserialize, Serialize};

use p2px_core::TradeId;

use crate::error::TransitionError;

/// State of an offer in the book.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpenOfferState {
    /// Published and takeable.
    #[default]
    Available,
    /// A taker is in the middle of taking the offer.
    Reserved,
    /// Closed. Terminal state.
    Closed,
    /// Withdrawn by the maker. Terminal state.
    Canceled,
    /// Temporarily removed from the book by the maker.
    Deactivated,
}

impl OpenOfferState {
    /// The canonical state name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "AVAILABLE",
            Self::Reserved => "RESERVED",
            Self::Closed => "CLOSED",
            Self::Canceled => "CANCELED",
            Self::Deactivated => "DEACTIVATED",
        }
    }

    /// Whether this state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Canceled)
    }
}

impl std::fmt::Display for OpenOfferState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An untaken offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOffer {
    /// Offer id; equal to the id a trade taken from it would carry.
    pub id: TradeId,
    /// Current book state.
    pub state: OpenOfferState,
}

impl OpenOffer {
    /// Create an available offer.
    pub fn new(id: TradeId) -> Self {
        Self {
            id,
            state: OpenOfferState::Available,
        }
    }

    /// Close the offer. Closing an already closed offer is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::OfferNotClosable`] for a canceled offer.
    pub fn close(&mut self) -> Result<(), TransitionError> {
        match self.state {
            OpenOfferState::Closed => Ok(()),
            OpenOfferState::Canceled => Err(TransitionError::OfferNotClosable {
                offer_id: self.id.to_string(),
                state: self.state.as_str().to_string(),
            }),
            _ => {
                self.state = OpenOfferState::Closed;
                Ok(())
            }
        }
    }
}
