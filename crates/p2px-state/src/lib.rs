//! # p2px-state: Trade-Side State Machines
//!
//! The mediation protocol reads and writes two fields of the trade aggregate
//! and never owns the trade itself. This crate defines that aggregate and the
//! contracts the protocol consumes:
//!
//! - **Dispute state** ([`dispute_state`]): the per-trade dispute track
//!   (`NoDispute → MediationRequested | MediationStartedByPeer →
//!   MediationClosed → …`) and the local [`MediationResultState`].
//!
//! - **Trade** ([`trade`]): the [`Trade`] aggregate, its [`ProcessModel`]
//!   scratch state, the [`TradingPeer`] record and [`TradePhase`].
//!
//! - **Offer** ([`offer`]): [`OpenOffer`], an offer still resting in the book.
//!
//! - **Registry** ([`registry`]): the [`TradeRegistry`] contract and the
//!   in-memory [`InMemoryTradeRegistry`].
//!
//! - **Persistence** ([`persistence`]): the fire-and-forget
//!   [`RequestPersistence`] contract.

pub mod dispute_state;
pub mod error;
pub mod offer;
pub mod persistence;
pub mod registry;
pub mod trade;

pub use dispute_state::{DisputeState, MediationResultState};
pub use error::TransitionError;
pub use offer::{OpenOffer, OpenOfferState};
pub use persistence::{NoopPersistence, PersistenceCounter, RequestPersistence};
pub use registry::{InMemoryTradeRegistry, TradeBook, TradePhaseListener, TradeRegistry};
pub use trade::{PayoutTx, Price, ProcessModel, Trade, TradePhase, TradeTerms, TradingPeer};
