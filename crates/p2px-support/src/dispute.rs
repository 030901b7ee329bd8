//! # Disputes and Dispute Results
//!
//! A [`Dispute`] is one trader's view of a mediation case: the parties, the
//! chat log, a closed flag and the mediator's [`DisputeResult`] once issued.
//!
//! ## Invariants
//!
//! - The chat log is append-only and never holds two equal messages.
//! - `is_closed` only ever moves from `false` to `true`. There is no API to
//!   reopen a dispute.
//! - The attached result is last-writer-wins.

use serde::{Deserialize, Serialize};

use p2px_core::{Coin, NodeAddress, PubKeyRing, Timestamp, TradeId};

use crate::chat::{ChatMessage, SupportType};

/// The participants of a dispute as seen from the local trader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeParties {
    /// The local trader's key ring.
    pub trader_pub_key_ring: PubKeyRing,
    /// The mediator's key ring. Acknowledgements are addressed here.
    pub agent_pub_key_ring: PubKeyRing,
    /// The mediator's network address, taken from the trade contract.
    pub agent_node_address: Option<NodeAddress>,
    /// The trading peer's network address.
    pub peer_node_address: NodeAddress,
}

/// A mediator-issued payout decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeResult {
    /// The trade the result applies to.
    pub trade_id: TradeId,
    /// The mediator's closing chat message. Always present on the wire.
    pub chat_message: Option<ChatMessage>,
    /// Proposed buyer payout.
    pub buyer_payout_amount: Coin,
    /// Proposed seller payout.
    pub seller_payout_amount: Coin,
    /// Free-form summary written by the mediator.
    #[serde(default)]
    pub summary_notes: String,
    /// When the mediator closed the case.
    pub close_date: Timestamp,
}

/// A mediation case for one trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispute {
    /// The disputed trade.
    pub trade_id: TradeId,
    /// Dispute track.
    pub support_type: SupportType,
    /// Whether the local trader is the buyer.
    pub is_buyer: bool,
    /// Participants.
    pub parties: DisputeParties,
    /// When the dispute was opened.
    pub opening_date: Timestamp,
    chat_messages: Vec<ChatMessage>,
    is_closed: bool,
    dispute_result: Option<DisputeResult>,
}

impl Dispute {
    /// Create an open dispute with an empty chat log.
    pub fn new(
        trade_id: TradeId,
        support_type: SupportType,
        is_buyer: bool,
        parties: DisputeParties,
        opening_date: Timestamp,
    ) -> Self {
        Self {
            trade_id,
            support_type,
            is_buyer,
            parties,
            opening_date,
            chat_messages: Vec::new(),
            is_closed: false,
            dispute_result: None,
        }
    }

    /// The chat log, oldest first.
    pub fn chat_messages(&self) -> &[ChatMessage] {
        &self.chat_messages
    }

    /// Whether an equal message is already in the chat log.
    pub fn contains_chat_message(&self, message: &ChatMessage) -> bool {
        self.chat_messages.contains(message)
    }

    /// Whether the dispute is closed.
    pub fn is_closed(&self) -> bool {
        self.is_closed
    }

    /// The attached result, if the mediator issued one.
    pub fn dispute_result(&self) -> Option<&DisputeResult> {
        self.dispute_result.as_ref()
    }

    /// The mediator's key ring.
    pub fn agent_pub_key_ring(&self) -> &PubKeyRing {
        &self.parties.agent_pub_key_ring
    }

    /// The mediator's network address, if the contract names one.
    pub fn agent_node_address(&self) -> Option<&NodeAddress> {
        self.parties.agent_node_address.as_ref()
    }

    /// Append `message` unless an equal one is present. Returns whether it
    /// was appended.
    pub(crate) fn add_chat_message(&mut self, message: ChatMessage) -> bool {
        if self.contains_chat_message(&message) {
            return false;
        }
        self.chat_messages.push(message);
        true
    }

    pub(crate) fn set_closed(&mut self) {
        self.is_closed = true;
    }

    pub(crate) fn set_dispute_result(&mut self, result: DisputeResult) {
        self.dispute_result = Some(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p2px_core::MessageUid;

    fn dispute() -> Dispute {
        Dispute::new(
            TradeId::new("T1").unwrap(),
            SupportType::Mediation,
            true,
            DisputeParties {
                trader_pub_key_ring: PubKeyRing::new("aa").unwrap(),
                agent_pub_key_ring: PubKeyRing::new("bb").unwrap(),
                agent_node_address: Some(NodeAddress::new("mediator.onion:9999").unwrap()),
                peer_node_address: NodeAddress::new("peer.onion:9999").unwrap(),
            },
            Timestamp::from_millis(1_000),
        )
    }

    fn chat(text: &str) -> ChatMessage {
        ChatMessage {
            uid: MessageUid::new(),
            trade_id: TradeId::new("T1").unwrap(),
            support_type: SupportType::Mediation,
            sender_is_trader: false,
            sender_node_address: NodeAddress::new("mediator.onion:9999").unwrap(),
            message: text.to_string(),
            date: Timestamp::from_millis(2_000),
            system_message: false,
        }
    }

    #[test]
    fn new_dispute_is_open_and_empty() {
        let d = dispute();
        assert!(!d.is_closed());
        assert!(d.chat_messages().is_empty());
        assert!(d.dispute_result().is_none());
    }

    #[test]
    fn add_chat_message_rejects_equal_message() {
        let mut d = dispute();
        let m = chat("closing");
        assert!(d.add_chat_message(m.clone()));
        assert!(!d.add_chat_message(m.clone()));
        assert_eq!(d.chat_messages(), &[m]);
    }

    #[test]
    fn same_text_different_uid_is_not_a_duplicate() {
        let mut d = dispute();
        assert!(d.add_chat_message(chat("hi")));
        assert!(d.add_chat_message(chat("hi")));
        assert_eq!(d.chat_messages().len(), 2);
    }

    #[test]
    fn result_is_last_writer_wins() {
        let mut d = dispute();
        let mut r = DisputeResult {
            trade_id: TradeId::new("T1").unwrap(),
            chat_message: None,
            buyer_payout_amount: Coin::from_sat(1),
            seller_payout_amount: Coin::from_sat(2),
            summary_notes: String::new(),
            close_date: Timestamp::from_millis(0),
        };
        d.set_dispute_result(r.clone());
        r.buyer_payout_amount = Coin::from_sat(3);
        d.set_dispute_result(r);
        assert_eq!(
            d.dispute_result().unwrap().buyer_payout_amount,
            Coin::from_sat(3)
        );
    }

    #[test]
    fn serde_preserves_private_state() {
        let mut d = dispute();
        d.add_chat_message(chat("x"));
        d.set_closed();
        let json = serde_json::to_string(&d).unwrap();
        let back: Dispute = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
        assert!(back.is_closed());
    }
}
