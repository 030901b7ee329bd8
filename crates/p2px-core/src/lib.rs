#![deny(missing_docs)]

//! # p2px-core: Foundational Types for the P2PX Mediation Stack
//!
//! Every other crate in the workspace depends on this one. It has no internal
//! crate dependencies, only `serde`, `serde_json`, `thiserror`, `chrono` and
//! `uuid` from the external ecosystem.
//!
//! ## Design Principles
//!
//! 1. **Newtype wrappers for domain primitives.** A [`TradeId`] is not a
//!    [`MessageUid`], and neither is a bare `String`. String-based identifiers
//!    validate at construction *and* at deserialization.
//!
//! 2. **Integer amounts only.** [`Coin`] counts the smallest unit of the base
//!    currency. No floating point ever touches a payout.
//!
//! 3. **[`P2pxError`] hierarchy.** Structured errors with `thiserror`, no
//!    `.unwrap()` outside tests.

pub mod amount;
pub mod error;
pub mod identity;
pub mod temporal;

pub use amount::Coin;
pub use error::{P2pxError, ValidationError};
pub use identity::{MessageUid, NodeAddress, PubKeyRing, TradeId};
pub use temporal::Timestamp;
