//! # Trade Aggregate
//!
//! The live aggregate representing an in-progress peer-to-peer exchange.
//! The mediation protocol touches only [`Trade::dispute_state`],
//! [`Trade::mediation_result_state`], the two mediation payout fields of the
//! [`ProcessModel`], and reads [`Trade::payout_tx`]. Everything else is here
//! for the registry, persistence and the trade-phase journal.

use serde::{Deserialize, Serialize};

use p2px_core::{Coin, NodeAddress, PubKeyRing, Timestamp, TradeId};

use crate::dispute_state::{DisputeState, MediationResultState};
use crate::error::TransitionError;

/// Coarse lifecycle phase of a trade, as observed by UI and notification glue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradePhase {
    /// Trade created, nothing published yet.
    #[default]
    Init,
    /// Taker fee transaction published.
    TakerFeePublished,
    /// Deposit transaction published.
    DepositPublished,
    /// Deposit transaction confirmed.
    DepositConfirmed,
    /// Buyer reported the fiat payment as sent.
    FiatSent,
    /// Seller confirmed fiat receipt.
    FiatReceived,
    /// Payout transaction published; funds are settled on-chain.
    PayoutPublished,
    /// Funds withdrawn from the trade wallet.
    Withdrawn,
}

impl TradePhase {
    /// The canonical phase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::TakerFeePublished => "TAKER_FEE_PUBLISHED",
            Self::DepositPublished => "DEPOSIT_PUBLISHED",
            Self::DepositConfirmed => "DEPOSIT_CONFIRMED",
            Self::FiatSent => "FIAT_SENT",
            Self::FiatReceived => "FIAT_RECEIVED",
            Self::PayoutPublished => "PAYOUT_PUBLISHED",
            Self::Withdrawn => "WITHDRAWN",
        }
    }
}

impl std::fmt::Display for TradePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Price of one whole base coin in the counter currency's smallest unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    /// Price value in the counter currency's smallest unit.
    pub value: i64,
    /// ISO 4217 or crypto currency code (e.g., "EUR").
    pub currency_code: String,
}

/// Economic terms of a trade, fixed when the offer was taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeTerms {
    /// When the offer was taken.
    pub take_offer_date: Timestamp,
    /// Whether the underlying offer is a buy offer.
    pub is_buy_offer: bool,
    /// Whether the underlying offer was created by this node.
    pub is_my_offer: bool,
    /// Trade amount in base units.
    pub amount: Coin,
    /// Agreed price.
    pub price: Price,
    /// Counter-currency volume, if it could be computed.
    pub volume: Option<i64>,
    /// Maker fee.
    pub maker_fee: Coin,
    /// Whether the maker fee was paid in the base currency.
    pub is_currency_for_maker_fee_btc: bool,
    /// Miner fee of the maker fee transaction.
    pub maker_tx_fee: Coin,
    /// Taker fee.
    pub taker_fee: Coin,
    /// Whether the taker fee was paid in the base currency.
    pub is_currency_for_taker_fee_btc: bool,
    /// Miner fee of the trade transactions.
    pub trade_tx_fee: Coin,
}

/// What this node knows about its trading peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradingPeer {
    /// The peer's network address.
    pub node_address: NodeAddress,
    /// The peer's key ring.
    pub pub_key_ring: PubKeyRing,
    /// The peer's signature over the mediated payout transaction, once received.
    pub mediated_payout_tx_signature: Option<Vec<u8>>,
}

/// Mutable per-trade scratch state consumed by later settlement steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessModel {
    /// Buyer payout proposed by the mediator.
    pub buyer_payout_amount_from_mediation: Coin,
    /// Seller payout proposed by the mediator.
    pub seller_payout_amount_from_mediation: Coin,
    /// The trading peer.
    pub trade_peer: TradingPeer,
}

impl ProcessModel {
    /// Create a process model with no mediation payouts recorded.
    pub fn new(trade_peer: TradingPeer) -> Self {
        Self {
            buyer_payout_amount_from_mediation: Coin::ZERO,
            seller_payout_amount_from_mediation: Coin::ZERO,
            trade_peer,
        }
    }

    /// Record the mediator's proposed payouts.
    pub fn set_mediation_payouts(&mut self, buyer: Coin, seller: Coin) {
        self.buyer_payout_amount_from_mediation = buyer;
        self.seller_payout_amount_from_mediation = seller;
    }
}

/// Reference to the published payout transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutTx {
    /// Transaction id (hex).
    pub txid: String,
}

/// A live trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    /// Trade identifier (equal to the offer id it was taken from).
    pub id: TradeId,
    /// Economic terms.
    pub terms: TradeTerms,
    /// Current lifecycle phase.
    pub phase: TradePhase,
    /// Dispute track.
    pub dispute_state: DisputeState,
    /// This side's verdict on the mediation result.
    pub mediation_result_state: MediationResultState,
    /// Scratch state used by settlement.
    pub process_model: ProcessModel,
    /// Published payout transaction. Present means settled on-chain.
    pub payout_tx: Option<PayoutTx>,
}

impl Trade {
    /// Create a trade in [`TradePhase::Init`] with no dispute.
    pub fn new(id: TradeId, terms: TradeTerms, trade_peer: TradingPeer) -> Self {
        Self {
            id,
            terms,
            phase: TradePhase::Init,
            dispute_state: DisputeState::NoDispute,
            mediation_result_state: MediationResultState::Neutral,
            process_model: ProcessModel::new(trade_peer),
            payout_tx: None,
        }
    }

    /// Advance the dispute track.
    ///
    /// Moving to the current state is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::InvalidDisputeTransition`] if `to` is not a
    /// valid forward step from the current state.
    pub fn advance_dispute_state(&mut self, to: DisputeState) -> Result<(), TransitionError> {
        if self.dispute_state == to {
            return Ok(());
        }
        if !self.dispute_state.can_transition_to(to) {
            return Err(TransitionError::InvalidDisputeTransition {
                trade_id: self.id.to_string(),
                from: self.dispute_state.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        self.dispute_state = to;
        Ok(())
    }

    /// Whether the peer's signature over the mediated payout has arrived.
    pub fn has_peer_mediated_payout_signature(&self) -> bool {
        self.process_model
            .trade_peer
            .mediated_payout_tx_signature
            .is_some()
    }

    /// Whether the payout transaction is published.
    pub fn is_payout_published(&self) -> bool {
        self.payout_tx.is_some()
    }
}
