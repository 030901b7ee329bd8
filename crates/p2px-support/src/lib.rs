//! # p2px-support: Mediation Protocol
//!
//! The message-driven workflow by which two traders and a mediator agree on,
//! propagate and finalize the resolution of a stalled trade.
//!
//! - **Messages** ([`message`], [`chat`]): the support message variants and
//!   dispute chat messages.
//!
//! - **Disputes** ([`dispute`], [`store`]): dispute records, mediator results
//!   and the [`DisputeStore`].
//!
//! - **Collaborators** ([`ack`], [`gate`], [`scheduler`], [`payout`]): the
//!   acknowledgement channel, the pre-dispatch gate, the one-shot retry
//!   scheduler and the payout signing sub-protocol.
//!
//! - **Engine** ([`manager`]): [`MediationManager`], configured by
//!   [`MediationConfig`] and [`DisputeTexts`].
//!
//! ## Threading
//!
//! The engine is `&mut self` throughout and expects every event on one
//! logical thread. Retries and payout completions come back as
//! [`EngineEvent`]s rather than callbacks into shared state.

pub mod ack;
pub mod chat;
pub mod config;
pub mod dispute;
pub mod error;
pub mod gate;
pub mod manager;
pub mod message;
pub mod payout;
pub mod scheduler;
pub mod store;

pub use ack::{AckMessage, AckMessageSourceType, AckSender, LoggingAckSender, RecordingAckSender};
pub use chat::{ChatMessage, SupportType};
pub use config::{DisputeTexts, MediationConfig, DEFAULT_RETRY_DELAY};
pub use dispute::{Dispute, DisputeParties, DisputeResult};
pub use error::MediationError;
pub use gate::{MessageGate, SupportTypeGate};
pub use manager::{Collaborators, EngineEvent, MediationManager};
pub use message::{
    DisputeResultMessage, OpenNewDisputeMessage, PeerOpenedDisputeMessage, SupportMessage,
};
pub use payout::{
    AcceptanceTicket, CompletionSink, OutcomeQueue, PayoutCall, PayoutCallLog, PayoutCompletion,
    PayoutOutcome, PayoutProtocol, PayoutStep, ScriptedOutcome, ScriptedPayoutProtocol,
};
pub use scheduler::{DeferredTask, ManualScheduler, RetryScheduler, TimerHandle};
pub use store::{AppendOutcome, DisputeStore};
