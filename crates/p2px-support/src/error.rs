//! # Mediation Error Types
//!
//! Only caller errors surface as `Err`. Races, duplicates, unsupported or
//! unauthorised messages and payout failures are handled inside the engine
//! (logs, a single retry, or the caller's failure callback) and never reach
//! this type.

use thiserror::Error;

use p2px_core::{MessageUid, TradeId};

/// Precondition violations raised by the mediation engine.
///
/// These abort the operation before any state is touched. They are not
/// retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediationError {
    /// A dispute result message arrived without its closing chat message.
    #[error("dispute result message {uid} for trade {trade_id} carries no chat message")]
    MissingChatMessage {
        /// The offending message uid.
        uid: MessageUid,
        /// The trade the result refers to.
        trade_id: TradeId,
    },

    /// Acceptance was requested but no dispute with an attached result exists.
    #[error("no dispute result available for trade {trade_id}")]
    NoDisputeResult {
        /// The trade the acceptance was requested for.
        trade_id: TradeId,
    },

    /// The trade the caller referred to is not known to the registry.
    #[error("trade {trade_id} not found")]
    TradeNotFound {
        /// The unknown trade id.
        trade_id: TradeId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_chat_message_names_trade_and_uid() {
        let uid = MessageUid::new();
        let err = MediationError::MissingChatMessage {
            uid,
            trade_id: TradeId::new("T1").unwrap(),
        };
        let msg = err.to_string();
        assert!(msg.contains("T1"));
        assert!(msg.contains(&uid.to_string()));
    }

    #[test]
    fn no_dispute_result_display() {
        let err = MediationError::NoDisputeResult {
            trade_id: TradeId::new("T9").unwrap(),
        };
        assert_eq!(err.to_string(), "no dispute result available for trade T9");
    }
}
