//! # Support Protocol Messages
//!
//! The closed set of inbound messages the mediation engine dispatches on.
//! Only fields and delivery semantics matter here; the JSON shape is what the
//! replay tooling reads and is not a wire format.
//!
//! A message type this build does not know deserializes to
//! [`SupportMessage::Unsupported`] and is dropped by the dispatcher.

use serde::{Deserialize, Serialize};

use p2px_core::{MessageUid, NodeAddress, TradeId};

use crate::chat::{ChatMessage, SupportType};
use crate::dispute::{Dispute, DisputeResult};

/// The trader who opened a dispute sends it to the mediator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenNewDisputeMessage {
    /// Message uid.
    pub uid: MessageUid,
    /// The dispute as the opener sees it.
    pub dispute: Dispute,
    /// The sender's address.
    pub sender_node_address: NodeAddress,
}

/// The mediator tells the other trader that a dispute was opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerOpenedDisputeMessage {
    /// Message uid.
    pub uid: MessageUid,
    /// The dispute from the receiving trader's point of view.
    pub dispute: Dispute,
    /// The sender's address.
    pub sender_node_address: NodeAddress,
}

/// The mediator's payout decision, delivered to both traders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeResultMessage {
    /// Message uid. Duplicate deliveries carry the same uid.
    pub uid: MessageUid,
    /// Dispute track.
    pub support_type: SupportType,
    /// The decision.
    pub dispute_result: DisputeResult,
    /// The sender's address.
    pub sender_node_address: NodeAddress,
}

impl DisputeResultMessage {
    /// The trade the result applies to.
    pub fn trade_id(&self) -> &TradeId {
        &self.dispute_result.trade_id
    }
}

/// Inbound support message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SupportMessage {
    /// A trader opened a dispute.
    OpenNewDispute(OpenNewDisputeMessage),
    /// The counterparty opened a dispute.
    PeerOpenedDispute(PeerOpenedDisputeMessage),
    /// A chat message for an existing dispute.
    Chat(ChatMessage),
    /// The mediator's result.
    DisputeResult(DisputeResultMessage),
    /// A message type this node does not handle.
    #[serde(other)]
    Unsupported,
}

impl SupportMessage {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OpenNewDispute(_) => "OpenNewDisputeMessage",
            Self::PeerOpenedDispute(_) => "PeerOpenedDisputeMessage",
            Self::Chat(_) => "ChatMessage",
            Self::DisputeResult(_) => "DisputeResultMessage",
            Self::Unsupported => "UnsupportedMessage",
        }
    }

    /// The message uid.
    pub fn uid(&self) -> Option<MessageUid> {
        match self {
            Self::OpenNewDispute(m) => Some(m.uid),
            Self::PeerOpenedDispute(m) => Some(m.uid),
            Self::Chat(m) => Some(m.uid),
            Self::DisputeResult(m) => Some(m.uid),
            Self::Unsupported => None,
        }
    }

    /// The trade the message concerns.
    pub fn trade_id(&self) -> Option<&TradeId> {
        match self {
            Self::OpenNewDispute(m) => Some(&m.dispute.trade_id),
            Self::PeerOpenedDispute(m) => Some(&m.dispute.trade_id),
            Self::Chat(m) => Some(&m.trade_id),
            Self::DisputeResult(m) => Some(m.trade_id()),
            Self::Unsupported => None,
        }
    }

    /// The dispute track the message belongs to.
    pub fn support_type(&self) -> Option<SupportType> {
        match self {
            Self::OpenNewDispute(m) => Some(m.dispute.support_type),
            Self::PeerOpenedDispute(m) => Some(m.dispute.support_type),
            Self::Chat(m) => Some(m.support_type),
            Self::DisputeResult(m) => Some(m.support_type),
            Self::Unsupported => None,
        }
    }
}
