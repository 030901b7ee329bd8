//! Builders shared by the integration tests.

#![allow(dead_code)]

use p2px_core::{Coin, MessageUid, NodeAddress, PubKeyRing, Timestamp, TradeId};
use p2px_state::{DisputeState, Price, Trade, TradeTerms, TradingPeer};
use p2px_support::{
    ChatMessage, Dispute, DisputeParties, DisputeResult, DisputeResultMessage,
    PeerOpenedDisputeMessage, SupportMessage, SupportType,
};

pub const TRADER_KEY: &str = "a1a1";
pub const MEDIATOR_KEY: &str = "b2b2";

pub fn tid(s: &str) -> TradeId {
    TradeId::new(s).unwrap()
}

pub fn addr(s: &str) -> NodeAddress {
    NodeAddress::new(s).unwrap()
}

pub fn mediator() -> NodeAddress {
    addr("mediator.onion:9999")
}

pub fn trade(id: &str, state: DisputeState) -> Trade {
    let mut t = Trade::new(
        tid(id),
        TradeTerms {
            take_offer_date: Timestamp::from_millis(1_700_000_000_000),
            is_buy_offer: true,
            is_my_offer: false,
            amount: Coin::from_sat(1_000_000),
            price: Price {
                value: 300_000_000,
                currency_code: "EUR".into(),
            },
            volume: Some(30_000),
            maker_fee: Coin::from_sat(1_500),
            is_currency_for_maker_fee_btc: true,
            maker_tx_fee: Coin::from_sat(400),
            taker_fee: Coin::from_sat(3_000),
            is_currency_for_taker_fee_btc: true,
            trade_tx_fee: Coin::from_sat(400),
        },
        TradingPeer {
            node_address: addr("peer.onion:9999"),
            pub_key_ring: PubKeyRing::new("c3c3").unwrap(),
            mediated_payout_tx_signature: None,
        },
    );
    t.dispute_state = state;
    t
}

pub fn dispute(id: &str) -> Dispute {
    Dispute::new(
        tid(id),
        SupportType::Mediation,
        true,
        DisputeParties {
            trader_pub_key_ring: PubKeyRing::new(TRADER_KEY).unwrap(),
            agent_pub_key_ring: PubKeyRing::new(MEDIATOR_KEY).unwrap(),
            agent_node_address: Some(mediator()),
            peer_node_address: addr("peer.onion:9999"),
        },
        Timestamp::from_millis(1_700_000_100_000),
    )
}

pub fn peer_opened(id: &str) -> SupportMessage {
    SupportMessage::PeerOpenedDispute(PeerOpenedDisputeMessage {
        uid: MessageUid::new(),
        dispute: dispute(id),
        sender_node_address: mediator(),
    })
}

pub fn result_message(id: &str, buyer: u64, seller: u64) -> DisputeResultMessage {
    DisputeResultMessage {
        uid: MessageUid::new(),
        support_type: SupportType::Mediation,
        dispute_result: DisputeResult {
            trade_id: tid(id),
            chat_message: Some(ChatMessage {
                uid: MessageUid::new(),
                trade_id: tid(id),
                support_type: SupportType::Mediation,
                sender_is_trader: false,
                sender_node_address: mediator(),
                message: format!("Proposed payout: buyer {buyer}, seller {seller}"),
                date: Timestamp::from_millis(1_700_000_200_000),
                system_message: false,
            }),
            buyer_payout_amount: Coin::from_sat(buyer),
            seller_payout_amount: Coin::from_sat(seller),
            summary_notes: "Seller unresponsive".into(),
            close_date: Timestamp::from_millis(1_700_000_200_000),
        },
        sender_node_address: mediator(),
    }
}

pub fn closing_uid(message: &DisputeResultMessage) -> MessageUid {
    message
        .dispute_result
        .chat_message
        .as_ref()
        .map(|c| c.uid)
        .unwrap()
}
