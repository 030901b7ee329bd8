//! # Support Chat Messages
//!
//! Every dispute carries an append-only chat log. The mediator's closing
//! message travels inside the dispute result and is appended to that log
//! exactly once, however many times the result is delivered.

use serde::{Deserialize, Serialize};

use p2px_core::{MessageUid, NodeAddress, Timestamp, TradeId};

/// The dispute track a message or dispute belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SupportType {
    /// Mediation: a mediator proposes a payout both traders must accept.
    #[default]
    Mediation,
    /// Arbitration: an arbitrator decides and pays out.
    Arbitration,
    /// Refund agent escalation.
    Refund,
    /// Direct trader-to-trader chat.
    Trade,
}

impl SupportType {
    /// The canonical type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mediation => "MEDIATION",
            Self::Arbitration => "ARBITRATION",
            Self::Refund => "REFUND",
            Self::Trade => "TRADE",
        }
    }
}

impl std::fmt::Display for SupportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chat message in a dispute.
///
/// Equality is structural: two messages are duplicates only if identity and
/// content both match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Unique message id.
    pub uid: MessageUid,
    /// The trade the dispute concerns.
    pub trade_id: TradeId,
    /// Dispute track.
    pub support_type: SupportType,
    /// Whether a trader (rather than the agent) wrote the message.
    pub sender_is_trader: bool,
    /// Network address of the sender.
    pub sender_node_address: NodeAddress,
    /// Message body.
    pub message: String,
    /// When the message was written.
    pub date: Timestamp,
    /// Whether the message was generated locally rather than typed by a person.
    #[serde(default)]
    pub system_message: bool,
}

impl ChatMessage {
    /// Create a locally generated system message.
    pub fn system(
        trade_id: TradeId,
        support_type: SupportType,
        sender_node_address: NodeAddress,
        message: String,
    ) -> Self {
        Self {
            uid: MessageUid::new(),
            trade_id,
            support_type,
            sender_is_trader: false,
            sender_node_address,
            message,
            date: Timestamp::now(),
            system_message: true,
        }
    }
}
