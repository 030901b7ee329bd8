//! # Mediation Engine
//!
//! [`MediationManager`] is the mediation protocol's state machine. It is a
//! plain `&mut self` object: the node runs it inside one task and feeds it
//! [`EngineEvent`]s in order, so disputes, trades and the retry map are never
//! mutated concurrently.
//!
//! ## Result application
//!
//! A dispute result may overtake the dispute it refers to. The first such
//! miss schedules one retry after [`MediationConfig::retry_delay`] and
//! records it under the message uid. A redelivery while that retry is pending
//! is dropped. When the retry fires and the dispute is still missing, the
//! message is dead-lettered with a warning and its retry entry removed. At
//! most one retry entry exists per uid.
//!
//! Applying a result is idempotent. A second delivery finds the closing chat
//! message already stored and the trade already in
//! [`DisputeState::MediationClosed`], so its only effect is a second
//! acknowledgement.
//!
//! ## Acceptance
//!
//! Accepting a result starts the payout signing exchange. The engine keeps
//! the caller's callbacks under an [`AcceptanceTicket`] and runs exactly one
//! of them when the matching [`EngineEvent::PayoutCompleted`] arrives.

use std::collections::HashMap;
use std::sync::Arc;

use p2px_core::{Coin, MessageUid, NodeAddress, PubKeyRing, TradeId};
use p2px_state::{DisputeState, MediationResultState, TradeRegistry};

use crate::ack::{AckMessage, AckSender};
use crate::chat::ChatMessage;
use crate::config::{DisputeTexts, MediationConfig};
use crate::dispute::{Dispute, DisputeResult};
use crate::error::MediationError;
use crate::gate::MessageGate;
use crate::message::{
    DisputeResultMessage, OpenNewDisputeMessage, PeerOpenedDisputeMessage, SupportMessage,
};
use crate::payout::{
    AcceptanceTicket, CompletionSink, PayoutCompletion, PayoutOutcome, PayoutProtocol,
};
use crate::scheduler::{DeferredTask, RetryScheduler, TimerHandle};
use crate::store::{AppendOutcome, DisputeStore};

// ---------------------------------------------------------------------------
// Events and wiring
// ---------------------------------------------------------------------------

/// Everything that can re-enter the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// An inbound support message from the transport.
    Support(SupportMessage),
    /// A continuation scheduled by the engine itself.
    Deferred(DeferredTask),
    /// A resolved payout invocation.
    PayoutCompleted(PayoutOutcome),
}

/// The engine's external collaborators.
pub struct Collaborators {
    /// Live trades and open offers.
    pub trades: Arc<dyn TradeRegistry>,
    /// One-shot continuation scheduler.
    pub scheduler: Box<dyn RetryScheduler>,
    /// Acknowledgement channel.
    pub acks: Box<dyn AckSender>,
    /// Payout signing sub-protocol.
    pub payout: Box<dyn PayoutProtocol>,
    /// Pre-dispatch capability check.
    pub gate: Box<dyn MessageGate>,
    /// Where payout completions are delivered.
    pub completions: Arc<dyn CompletionSink>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Delivery,
    Retry,
}

type SuccessHandler = Box<dyn FnOnce() + Send>;
type FailureHandler = Box<dyn FnOnce(String) + Send>;

struct PendingAcceptance {
    trade_id: TradeId,
    on_success: SuccessHandler,
    on_failure: FailureHandler,
}

// ---------------------------------------------------------------------------
// MediationManager
// ---------------------------------------------------------------------------

/// The mediation protocol engine.
pub struct MediationManager {
    config: MediationConfig,
    texts: DisputeTexts,
    node_address: NodeAddress,
    disputes: DisputeStore,
    trades: Arc<dyn TradeRegistry>,
    scheduler: Box<dyn RetryScheduler>,
    acks: Box<dyn AckSender>,
    payout: Box<dyn PayoutProtocol>,
    gate: Box<dyn MessageGate>,
    completions: Arc<dyn CompletionSink>,
    retries: HashMap<MessageUid, TimerHandle>,
    acceptances: HashMap<AcceptanceTicket, PendingAcceptance>,
    next_ticket: u64,
}

impl std::fmt::Debug for MediationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediationManager")
            .field("config", &self.config)
            .field("node_address", &self.node_address)
            .field("disputes", &self.disputes)
            .field("retries", &self.retries.len())
            .field("acceptances", &self.acceptances.len())
            .finish()
    }
}

impl MediationManager {
    /// Create an engine. `node_address` is this node's own address, used as
    /// the sender of locally generated system messages.
    pub fn new(
        config: MediationConfig,
        texts: DisputeTexts,
        node_address: NodeAddress,
        disputes: DisputeStore,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            config,
            texts,
            node_address,
            disputes,
            trades: collaborators.trades,
            scheduler: collaborators.scheduler,
            acks: collaborators.acks,
            payout: collaborators.payout,
            gate: collaborators.gate,
            completions: collaborators.completions,
            retries: HashMap::new(),
            acceptances: HashMap::new(),
            next_ticket: 0,
        }
    }

    /// The engine's configuration.
    pub fn config(&self) -> &MediationConfig {
        &self.config
    }

    /// The dispute store.
    pub fn disputes(&self) -> &DisputeStore {
        &self.disputes
    }

    /// Whether a retry is outstanding for `uid`.
    pub fn has_pending_retry(&self, uid: &MessageUid) -> bool {
        self.retries.contains_key(uid)
    }

    /// Number of outstanding retries.
    pub fn pending_retries(&self) -> usize {
        self.retries.len()
    }

    /// Number of acceptances waiting for their payout to complete.
    pub fn pending_acceptances(&self) -> usize {
        self.acceptances.len()
    }

    /// Single entry point for everything delivered on the engine's thread.
    ///
    /// # Errors
    ///
    /// Propagates precondition violations from the dispatched operation.
    pub fn handle(&mut self, event: EngineEvent) -> Result<(), MediationError> {
        match event {
            EngineEvent::Support(message) => self.on_support_message(message),
            EngineEvent::Deferred(DeferredTask::RetryDisputeResult(message)) => {
                self.apply_dispute_result(message, Attempt::Retry)
            }
            EngineEvent::PayoutCompleted(outcome) => {
                self.on_payout_completed(outcome);
                Ok(())
            }
        }
    }

    // -- Dispatch -------------------------------------------------------------

    /// Dispatch an inbound support message.
    ///
    /// Messages rejected by the gate and unsupported variants are logged and
    /// dropped without touching any state.
    ///
    /// # Errors
    ///
    /// Returns [`MediationError::MissingChatMessage`] for a dispute result
    /// without its closing chat message.
    pub fn on_support_message(&mut self, message: SupportMessage) -> Result<(), MediationError> {
        if !self.gate.can_process(&message) {
            tracing::warn!(
                kind = message.kind(),
                trade_id = ?message.trade_id(),
                uid = ?message.uid(),
                support_type = ?message.support_type(),
                "message rejected by gate"
            );
            return Ok(());
        }
        tracing::info!(
            kind = message.kind(),
            trade_id = ?message.trade_id(),
            uid = ?message.uid(),
            "received support message"
        );
        match message {
            SupportMessage::OpenNewDispute(m) => self.on_open_new_dispute(m),
            SupportMessage::PeerOpenedDispute(m) => self.on_peer_opened_dispute(m),
            SupportMessage::Chat(m) => self.on_chat_message(m),
            SupportMessage::DisputeResult(m) => return self.on_dispute_result_message(m),
            SupportMessage::Unsupported => {
                tracing::warn!("unsupported support message dropped");
            }
        }
        Ok(())
    }

    // -- Dispute results ------------------------------------------------------

    /// Apply a mediator's result delivered by the transport.
    ///
    /// # Errors
    ///
    /// Returns [`MediationError::MissingChatMessage`] if the result carries no
    /// closing chat message. Nothing is mutated and no retry is scheduled.
    pub fn on_dispute_result_message(
        &mut self,
        message: DisputeResultMessage,
    ) -> Result<(), MediationError> {
        self.apply_dispute_result(message, Attempt::Delivery)
    }

    fn apply_dispute_result(
        &mut self,
        message: DisputeResultMessage,
        attempt: Attempt,
    ) -> Result<(), MediationError> {
        let uid = message.uid;
        let trade_id = message.trade_id().clone();
        let Some(chat_message) = message.dispute_result.chat_message.clone() else {
            return Err(MediationError::MissingChatMessage { uid, trade_id });
        };

        let agent = match self.disputes.find_by_result(&message.dispute_result) {
            Some(dispute) => dispute.agent_pub_key_ring().clone(),
            None => {
                self.on_dispute_missing(message, attempt);
                return Ok(());
            }
        };

        if let Some(handle) = self.retries.remove(&uid) {
            tracing::debug!(trade_id = %trade_id, uid = %uid, timer = %handle, "retry entry cleared");
        }

        match self.disputes.append_chat_message(chat_message.clone()) {
            AppendOutcome::Appended => {}
            AppendOutcome::Duplicate => {
                tracing::info!(trade_id = %trade_id, uid = %chat_message.uid, "closing chat message already stored");
            }
            AppendOutcome::NoDispute => {}
        }
        self.disputes.mark_closed(&trade_id);

        let DisputeResult {
            buyer_payout_amount,
            seller_payout_amount,
            ..
        } = message.dispute_result;
        self.disputes.attach_result(message.dispute_result);

        self.apply_result_to_trade(&trade_id, buyer_payout_amount, seller_payout_amount);

        self.send_ack(&chat_message, agent, true, None);
        self.disputes.request_persistence();
        Ok(())
    }

    fn on_dispute_missing(&mut self, message: DisputeResultMessage, attempt: Attempt) {
        let uid = message.uid;
        let trade_id = message.trade_id().clone();
        match attempt {
            Attempt::Delivery if !self.retries.contains_key(&uid) => {
                tracing::warn!(
                    trade_id = %trade_id,
                    uid = %uid,
                    delay_ms = self.config.retry_delay.as_millis() as u64,
                    "dispute result arrived before its dispute, retrying after delay"
                );
                let handle = self.scheduler.run_after(
                    self.config.retry_delay,
                    DeferredTask::RetryDisputeResult(message),
                );
                self.retries.insert(uid, handle);
            }
            Attempt::Delivery => {
                tracing::warn!(trade_id = %trade_id, uid = %uid, "dispute result redelivered while its retry is pending, dropped");
            }
            Attempt::Retry => {
                self.retries.remove(&uid);
                tracing::warn!(
                    trade_id = %trade_id,
                    uid = %uid,
                    buyer_payout = %message.dispute_result.buyer_payout_amount,
                    seller_payout = %message.dispute_result.seller_payout_amount,
                    "dead letter: dispute still missing after retry, dispute result dropped"
                );
            }
        }
    }

    fn apply_result_to_trade(&mut self, trade_id: &TradeId, buyer: Coin, seller: Coin) {
        if self.trades.find_trade(trade_id).is_none() {
            if self.trades.find_open_offer(trade_id).is_some() {
                if self.trades.close_open_offer(trade_id) {
                    self.trades.request_persistence();
                }
            } else {
                tracing::debug!(trade_id = %trade_id, "no trade or open offer for dispute result");
            }
            return;
        }

        let mut previous = None;
        let mut applied = false;
        self.trades.update_trade(trade_id, &mut |trade| {
            previous = Some(trade.dispute_state);
            if trade.dispute_state.is_mediation_open() {
                trade.process_model.set_mediation_payouts(buyer, seller);
                trade.dispute_state = DisputeState::MediationClosed;
                applied = true;
            }
        });

        if applied {
            tracing::info!(
                trade_id = %trade_id,
                buyer_payout = %buyer,
                seller_payout = %seller,
                "mediation result applied to trade"
            );
            self.trades.request_persistence();
        } else {
            tracing::info!(
                trade_id = %trade_id,
                dispute_state = ?previous,
                "trade not awaiting a mediation result, left untouched"
            );
        }
    }

    // -- Acceptance and rejection ---------------------------------------------

    /// Accept the mediator's result for `trade_id` and start the payout.
    ///
    /// When the peer's signature has not arrived, this side signs first;
    /// otherwise it finalizes with the peer's signature. Exactly one callback
    /// runs later, when the payout completion re-enters the engine. On
    /// success, a trade whose payout is published is closed with
    /// [`DisputeState::MediationClosed`] before `on_success` runs.
    ///
    /// # Errors
    ///
    /// - [`MediationError::NoDisputeResult`] if there is no dispute with an
    ///   attached result.
    /// - [`MediationError::TradeNotFound`] if the trade is not live.
    ///
    /// In both cases nothing is mutated and neither callback runs.
    pub fn on_accept_mediation_result(
        &mut self,
        trade_id: &TradeId,
        on_success: impl FnOnce() + Send + 'static,
        on_failure: impl FnOnce(String) + Send + 'static,
    ) -> Result<AcceptanceTicket, MediationError> {
        let result = self
            .disputes
            .find_by_trade_id(trade_id)
            .and_then(Dispute::dispute_result)
            .ok_or_else(|| MediationError::NoDisputeResult {
                trade_id: trade_id.clone(),
            })?;
        let (buyer, seller) = (result.buyer_payout_amount, result.seller_payout_amount);

        let trade = self
            .trades
            .update_trade(trade_id, &mut |trade| {
                trade.process_model.set_mediation_payouts(buyer, seller);
                trade.mediation_result_state = MediationResultState::MediationResultAccepted;
            })
            .ok_or_else(|| MediationError::TradeNotFound {
                trade_id: trade_id.clone(),
            })?;
        self.trades.request_persistence();

        self.next_ticket += 1;
        let ticket = AcceptanceTicket::new(self.next_ticket);
        self.acceptances.insert(
            ticket,
            PendingAcceptance {
                trade_id: trade_id.clone(),
                on_success: Box::new(on_success),
                on_failure: Box::new(on_failure),
            },
        );
        let completion = PayoutCompletion::new(ticket, trade_id.clone(), Arc::clone(&self.completions));

        if trade.has_peer_mediated_payout_signature() {
            tracing::info!(trade_id = %trade_id, %ticket, "mediation result accepted, finalizing payout with peer signature");
            self.payout.finalize_with_peer_signature(&trade, completion);
        } else {
            tracing::info!(trade_id = %trade_id, %ticket, "mediation result accepted, sending own payout signature");
            self.payout.accept_and_send_signature(&trade, completion);
        }
        Ok(ticket)
    }

    fn on_payout_completed(&mut self, outcome: PayoutOutcome) {
        let Some(pending) = self.acceptances.remove(&outcome.ticket) else {
            tracing::warn!(trade_id = %outcome.trade_id, ticket = %outcome.ticket, "payout completion for unknown acceptance ignored");
            return;
        };
        match outcome.result {
            Ok(()) => {
                let published = self
                    .trades
                    .find_trade(&pending.trade_id)
                    .is_some_and(|trade| trade.is_payout_published());
                if published
                    && self
                        .trades
                        .close_disputed_trade(&pending.trade_id, DisputeState::MediationClosed)
                {
                    self.trades.request_persistence();
                }
                tracing::info!(trade_id = %pending.trade_id, published, "mediated payout completed");
                (pending.on_success)();
            }
            Err(error) => {
                tracing::warn!(trade_id = %pending.trade_id, error = %error, "mediated payout failed");
                (pending.on_failure)(error);
            }
        }
    }

    /// Reject the mediator's result for `trade_id`.
    ///
    /// Only the trade's mediation result state changes; escalation is up to
    /// the user.
    ///
    /// # Errors
    ///
    /// Returns [`MediationError::TradeNotFound`] if the trade is not live.
    pub fn reject_mediation_result(&mut self, trade_id: &TradeId) -> Result<(), MediationError> {
        self.trades
            .update_trade(trade_id, &mut |trade| {
                trade.mediation_result_state = MediationResultState::MediationResultRejected;
            })
            .ok_or_else(|| MediationError::TradeNotFound {
                trade_id: trade_id.clone(),
            })?;
        tracing::info!(trade_id = %trade_id, "mediation result rejected");
        self.trades.request_persistence();
        Ok(())
    }

    /// Close every disputed trade whose payout is already published.
    ///
    /// Returns the number of trades closed by this sweep.
    pub fn cleanup_disputes(&mut self) -> usize {
        let mut closed = 0;
        for trade_id in self.disputes.trade_ids() {
            let published = self
                .trades
                .find_trade(&trade_id)
                .is_some_and(|trade| trade.is_payout_published());
            if published
                && self
                    .trades
                    .close_disputed_trade(&trade_id, DisputeState::MediationClosed)
            {
                closed += 1;
            }
        }
        if closed > 0 {
            tracing::info!(closed, "disputed trades closed by cleanup");
            self.trades.request_persistence();
        }
        closed
    }

    // -- Opening disputes and chat --------------------------------------------

    /// Open a dispute on behalf of the local trader.
    ///
    /// Returns `false` if a dispute for the trade already exists, in which
    /// case nothing changes.
    pub fn open_dispute(&mut self, dispute: Dispute) -> bool {
        let trade_id = dispute.trade_id.clone();
        let text = self
            .texts
            .intro_for_creator(&self.texts.dispute_info(&dispute));
        if !self.disputes.add(dispute) {
            tracing::warn!(trade_id = %trade_id, "dispute already exists, not opened again");
            return false;
        }
        tracing::info!(trade_id = %trade_id, "dispute opened");
        self.append_system_message(&trade_id, text);
        self.enter_dispute_state(&trade_id, self.config.requested_state);
        self.disputes.request_persistence();
        true
    }

    fn on_open_new_dispute(&mut self, message: OpenNewDisputeMessage) {
        let OpenNewDisputeMessage { uid, dispute, .. } = message;
        let trade_id = dispute.trade_id.clone();
        let recipient = dispute.parties.trader_pub_key_ring.clone();
        let text = self.texts.dispute_info(&dispute);

        let error = if self.disputes.add(dispute) {
            self.append_system_message(&trade_id, text);
            self.disputes.request_persistence();
            None
        } else {
            tracing::info!(trade_id = %trade_id, uid = %uid, "dispute already stored");
            Some(format!("dispute for trade {trade_id} already exists"))
        };
        self.ack(uid, &trade_id, recipient, error);
    }

    fn on_peer_opened_dispute(&mut self, message: PeerOpenedDisputeMessage) {
        let PeerOpenedDisputeMessage { uid, dispute, .. } = message;
        let trade_id = dispute.trade_id.clone();
        let recipient = dispute.agent_pub_key_ring().clone();
        let text = self
            .texts
            .intro_for_peer(&self.texts.dispute_info(&dispute));

        let error = if self.disputes.add(dispute) {
            self.append_system_message(&trade_id, text);
            self.enter_dispute_state(&trade_id, self.config.started_by_peer_state);
            self.disputes.request_persistence();
            None
        } else {
            tracing::info!(trade_id = %trade_id, uid = %uid, "dispute opened by peer already stored");
            Some(format!("dispute for trade {trade_id} already exists"))
        };
        self.ack(uid, &trade_id, recipient, error);
    }

    fn on_chat_message(&mut self, message: ChatMessage) {
        let Some(recipient) = self
            .disputes
            .find_by_trade_id(&message.trade_id)
            .map(|d| d.agent_pub_key_ring().clone())
        else {
            tracing::warn!(trade_id = %message.trade_id, uid = %message.uid, "chat message for unknown dispute dropped");
            return;
        };
        match self.disputes.append_chat_message(message.clone()) {
            AppendOutcome::Appended => self.disputes.request_persistence(),
            AppendOutcome::Duplicate => {
                tracing::info!(trade_id = %message.trade_id, uid = %message.uid, "chat message already stored");
            }
            AppendOutcome::NoDispute => {}
        }
        self.send_ack(&message, recipient, true, None);
    }

    fn append_system_message(&mut self, trade_id: &TradeId, text: String) {
        let message = ChatMessage::system(
            trade_id.clone(),
            self.config.support_type,
            self.node_address.clone(),
            text,
        );
        self.disputes.append_chat_message(message);
    }

    fn enter_dispute_state(&mut self, trade_id: &TradeId, state: DisputeState) {
        let mut entered = false;
        self.trades.update_trade(trade_id, &mut |trade| {
            if trade.dispute_state == DisputeState::NoDispute {
                trade.dispute_state = state;
                entered = true;
            }
        });
        if entered {
            tracing::info!(trade_id = %trade_id, dispute_state = %state, "trade entered dispute");
            self.trades.request_persistence();
        }
    }

    // -- Acknowledgements -----------------------------------------------------

    fn send_ack(
        &mut self,
        message: &ChatMessage,
        recipient: PubKeyRing,
        success: bool,
        error_message: Option<String>,
    ) {
        self.acks.send_ack(AckMessage {
            source_type: self.config.ack_source,
            source_uid: message.uid,
            trade_id: message.trade_id.clone(),
            recipient,
            success,
            error_message,
        });
    }

    fn ack(
        &mut self,
        uid: MessageUid,
        trade_id: &TradeId,
        recipient: PubKeyRing,
        error: Option<String>,
    ) {
        self.acks.send_ack(AckMessage {
            source_type: self.config.ack_source,
            source_uid: uid,
            trade_id: trade_id.clone(),
            recipient,
            success: error.is_none(),
            error_message: error,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use p2px_core::Timestamp;
    use p2px_state::{
        InMemoryTradeRegistry, OpenOffer, OpenOfferState, PayoutTx, PersistenceCounter, Price,
        Trade, TradeTerms, TradingPeer,
    };
    use parking_lot::Mutex;
    use proptest::prelude::*;

    use crate::ack::RecordingAckSender;
    use crate::chat::SupportType;
    use crate::dispute::DisputeParties;
    use crate::gate::SupportTypeGate;
    use crate::payout::{
        OutcomeQueue, PayoutCallLog, PayoutStep, ScriptedOutcome, ScriptedPayoutProtocol,
    };
    use crate::scheduler::ManualScheduler;

    const MEDIATOR_KEY: &str = "bb";

    fn id(s: &str) -> TradeId {
        TradeId::new(s).unwrap()
    }

    fn mediator() -> NodeAddress {
        NodeAddress::new("mediator.onion:9999").unwrap()
    }

    fn trade(trade_id: &str, state: DisputeState) -> Trade {
        let mut t = Trade::new(
            id(trade_id),
            TradeTerms {
                take_offer_date: Timestamp::from_millis(0),
                is_buy_offer: true,
                is_my_offer: true,
                amount: Coin::from_sat(1_000_000),
                price: Price {
                    value: 60_000,
                    currency_code: "EUR".into(),
                },
                volume: Some(600),
                maker_fee: Coin::from_sat(1_500),
                is_currency_for_maker_fee_btc: true,
                maker_tx_fee: Coin::from_sat(300),
                taker_fee: Coin::from_sat(1_500),
                is_currency_for_taker_fee_btc: true,
                trade_tx_fee: Coin::from_sat(300),
            },
            TradingPeer {
                node_address: NodeAddress::new("peer.onion:9999").unwrap(),
                pub_key_ring: PubKeyRing::new("cc").unwrap(),
                mediated_payout_tx_signature: None,
            },
        );
        t.dispute_state = state;
        t
    }

    fn dispute(trade_id: &str) -> Dispute {
        Dispute::new(
            id(trade_id),
            SupportType::Mediation,
            true,
            DisputeParties {
                trader_pub_key_ring: PubKeyRing::new("aa").unwrap(),
                agent_pub_key_ring: PubKeyRing::new(MEDIATOR_KEY).unwrap(),
                agent_node_address: Some(mediator()),
                peer_node_address: NodeAddress::new("peer.onion:9999").unwrap(),
            },
            Timestamp::from_millis(0),
        )
    }

    fn closing_chat(trade_id: &str) -> ChatMessage {
        ChatMessage {
            uid: MessageUid::new(),
            trade_id: id(trade_id),
            support_type: SupportType::Mediation,
            sender_is_trader: false,
            sender_node_address: mediator(),
            message: "Payout proposed".into(),
            date: Timestamp::from_millis(10_000),
            system_message: false,
        }
    }

    fn result_message(trade_id: &str, buyer: u64, seller: u64) -> DisputeResultMessage {
        DisputeResultMessage {
            uid: MessageUid::new(),
            support_type: SupportType::Mediation,
            dispute_result: DisputeResult {
                trade_id: id(trade_id),
                chat_message: Some(closing_chat(trade_id)),
                buyer_payout_amount: Coin::from_sat(buyer),
                seller_payout_amount: Coin::from_sat(seller),
                summary_notes: String::new(),
                close_date: Timestamp::from_millis(10_000),
            },
            sender_node_address: mediator(),
        }
    }

    struct Harness {
        engine: MediationManager,
        trades: InMemoryTradeRegistry,
        clock: ManualScheduler,
        acks: RecordingAckSender,
        payouts: PayoutCallLog,
        outcomes: OutcomeQueue,
        trade_writes: PersistenceCounter,
        dispute_writes: PersistenceCounter,
    }

    impl Harness {
        fn new(outcome: ScriptedOutcome) -> Self {
            let trade_writes = PersistenceCounter::new();
            let dispute_writes = PersistenceCounter::new();
            let trades = InMemoryTradeRegistry::new(Arc::new(trade_writes.clone()));
            let clock = ManualScheduler::new();
            let acks = RecordingAckSender::new();
            let payouts = PayoutCallLog::new();
            let outcomes = OutcomeQueue::new();

            let publisher = trades.clone();
            let protocol = ScriptedPayoutProtocol::new(outcome, payouts.clone()).on_success(
                move |trade_id, step| {
                    if step == PayoutStep::FinalizeWithPeerSignature {
                        publisher.set_payout_tx(trade_id, PayoutTx { txid: "feed".into() });
                    }
                },
            );

            let engine = MediationManager::new(
                MediationConfig::default(),
                DisputeTexts::default(),
                NodeAddress::new("me.onion:9999").unwrap(),
                DisputeStore::new(Arc::new(dispute_writes.clone())),
                Collaborators {
                    trades: Arc::new(trades.clone()),
                    scheduler: Box::new(clock.clone()),
                    acks: Box::new(acks.clone()),
                    payout: Box::new(protocol),
                    gate: Box::new(SupportTypeGate::new(SupportType::Mediation)),
                    completions: Arc::new(outcomes.clone()),
                },
            );
            Self {
                engine,
                trades,
                clock,
                acks,
                payouts,
                outcomes,
                trade_writes,
                dispute_writes,
            }
        }

        fn with_dispute(self, trade_id: &str) -> Self {
            let mut h = self;
            h.engine.disputes.add(dispute(trade_id));
            h
        }

        fn deliver(&mut self, message: DisputeResultMessage) {
            self.engine
                .handle(EngineEvent::Support(SupportMessage::DisputeResult(message)))
                .unwrap();
        }

        fn advance(&mut self, by: Duration) {
            for task in self.clock.advance(by) {
                self.engine.handle(EngineEvent::Deferred(task)).unwrap();
            }
        }

        fn pump(&mut self) {
            for outcome in self.outcomes.drain() {
                self.engine
                    .handle(EngineEvent::PayoutCompleted(outcome))
                    .unwrap();
            }
        }

        fn trade(&self, trade_id: &str) -> Trade {
            self.trades.find_trade(&id(trade_id)).unwrap()
        }

        fn chat_count(&self, trade_id: &str) -> usize {
            self.engine
                .disputes()
                .find_by_trade_id(&id(trade_id))
                .map_or(0, |d| d.chat_messages().len())
        }
    }

    #[derive(Clone, Default)]
    struct Callbacks {
        successes: Arc<AtomicUsize>,
        failures: Arc<Mutex<Vec<String>>>,
    }

    impl Callbacks {
        fn accept(&self, h: &mut Harness, trade_id: &str) -> Result<AcceptanceTicket, MediationError> {
            let successes = Arc::clone(&self.successes);
            let failures = Arc::clone(&self.failures);
            h.engine.on_accept_mediation_result(
                &id(trade_id),
                move || {
                    successes.fetch_add(1, Ordering::SeqCst);
                },
                move |e| failures.lock().push(e),
            )
        }

        fn successes(&self) -> usize {
            self.successes.load(Ordering::SeqCst)
        }

        fn failures(&self) -> Vec<String> {
            self.failures.lock().clone()
        }
    }

    // -- Result application ---------------------------------------------------

    #[test]
    fn result_closes_mediation_and_copies_payouts() {
        let mut h = Harness::new(ScriptedOutcome::Succeed).with_dispute("T1");
        h.trades.add_trade(trade("T1", DisputeState::MediationRequested));
        let msg = result_message("T1", 950_000, 40_000);
        let chat_uid = msg.dispute_result.chat_message.as_ref().unwrap().uid;

        h.deliver(msg);

        let t = h.trade("T1");
        assert_eq!(t.dispute_state, DisputeState::MediationClosed);
        assert_eq!(
            t.process_model.buyer_payout_amount_from_mediation,
            Coin::from_sat(950_000)
        );
        assert_eq!(
            t.process_model.seller_payout_amount_from_mediation,
            Coin::from_sat(40_000)
        );
        let d = h.engine.disputes().find_by_trade_id(&id("T1")).unwrap();
        assert!(d.is_closed());
        assert!(d.dispute_result().is_some());
        assert_eq!(d.chat_messages().len(), 1);

        let acks = h.acks.sent();
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].source_uid, chat_uid);
        assert_eq!(acks[0].recipient, PubKeyRing::new(MEDIATOR_KEY).unwrap());
        assert!(acks[0].success);
        assert_eq!(h.trade_writes.count(), 1);
        assert_eq!(h.dispute_writes.count(), 1);
    }

    #[test]
    fn peer_started_mediation_is_also_closed() {
        let mut h = Harness::new(ScriptedOutcome::Succeed).with_dispute("T1");
        h.trades
            .add_trade(trade("T1", DisputeState::MediationStartedByPeer));
        h.deliver(result_message("T1", 1, 2));
        assert_eq!(h.trade("T1").dispute_state, DisputeState::MediationClosed);
    }

    #[test]
    fn duplicate_result_only_reacknowledges() {
        let mut h = Harness::new(ScriptedOutcome::Succeed).with_dispute("T1");
        h.trades.add_trade(trade("T1", DisputeState::MediationRequested));
        let msg = result_message("T1", 950_000, 40_000);

        h.deliver(msg.clone());
        h.deliver(msg);

        assert_eq!(h.chat_count("T1"), 1);
        assert_eq!(h.trade_writes.count(), 1);
        assert_eq!(h.acks.sent().len(), 2);
        assert_eq!(h.trade("T1").dispute_state, DisputeState::MediationClosed);
    }

    #[test]
    fn missing_chat_message_aborts_without_mutation() {
        let mut h = Harness::new(ScriptedOutcome::Succeed).with_dispute("T1");
        h.trades.add_trade(trade("T1", DisputeState::MediationRequested));
        let mut msg = result_message("T1", 5, 5);
        msg.dispute_result.chat_message = None;
        let uid = msg.uid;

        let err = h
            .engine
            .handle(EngineEvent::Support(SupportMessage::DisputeResult(msg)))
            .unwrap_err();

        assert_eq!(
            err,
            MediationError::MissingChatMessage {
                uid,
                trade_id: id("T1")
            }
        );
        assert!(!h
            .engine
            .disputes()
            .find_by_trade_id(&id("T1"))
            .unwrap()
            .is_closed());
        assert_eq!(h.trade("T1").dispute_state, DisputeState::MediationRequested);
        assert!(h.acks.sent().is_empty());
        assert_eq!(h.clock.scheduled(), 0);
    }

    #[test]
    fn closed_trade_keeps_its_payouts() {
        let mut h = Harness::new(ScriptedOutcome::Succeed).with_dispute("T1");
        let mut t = trade("T1", DisputeState::MediationClosed);
        t.process_model
            .set_mediation_payouts(Coin::from_sat(700), Coin::from_sat(300));
        h.trades.add_trade(t);

        h.deliver(result_message("T1", 999, 1));

        let t = h.trade("T1");
        assert_eq!(t.process_model.buyer_payout_amount_from_mediation, Coin::from_sat(700));
        assert_eq!(t.process_model.seller_payout_amount_from_mediation, Coin::from_sat(300));
        assert_eq!(h.trade_writes.count(), 0);
        assert_eq!(h.acks.sent().len(), 1);
    }

    #[test]
    fn escalated_trade_is_left_untouched() {
        let mut h = Harness::new(ScriptedOutcome::Succeed).with_dispute("T1");
        h.trades.add_trade(trade("T1", DisputeState::RefundRequested));
        h.deliver(result_message("T1", 1, 1));
        assert_eq!(h.trade("T1").dispute_state, DisputeState::RefundRequested);
    }

    #[test]
    fn result_for_untaken_offer_closes_the_offer() {
        let mut h = Harness::new(ScriptedOutcome::Succeed).with_dispute("O1");
        h.trades.add_open_offer(OpenOffer::new(id("O1")));

        h.deliver(result_message("O1", 0, 0));

        assert_eq!(
            h.trades.find_open_offer(&id("O1")).unwrap().state,
            OpenOfferState::Closed
        );
        assert_eq!(h.acks.sent().len(), 1);
        assert_eq!(h.dispute_writes.count(), 1);
    }

    #[test]
    fn result_without_trade_or_offer_is_still_acknowledged() {
        let mut h = Harness::new(ScriptedOutcome::Succeed).with_dispute("T1");
        h.deliver(result_message("T1", 0, 0));
        assert_eq!(h.acks.sent().len(), 1);
        assert!(h
            .engine
            .disputes()
            .find_by_trade_id(&id("T1"))
            .unwrap()
            .is_closed());
    }

    // -- Retry ------------------------------------------------------------------

    #[test]
    fn result_before_dispute_is_applied_by_the_retry() {
        let mut h = Harness::new(ScriptedOutcome::Succeed);
        h.trades.add_trade(trade("T1", DisputeState::MediationRequested));
        let msg = result_message("T1", 950_000, 40_000);
        let uid = msg.uid;
        let chat_uid = msg.dispute_result.chat_message.as_ref().unwrap().uid;

        h.deliver(msg);
        assert!(h.engine.has_pending_retry(&uid));
        assert_eq!(h.clock.scheduled(), 1);
        assert!(h.acks.sent().is_empty());

        h.engine.disputes.add(dispute("T1"));
        h.advance(Duration::from_secs(1));
        assert_eq!(h.trade("T1").dispute_state, DisputeState::MediationRequested);

        h.advance(Duration::from_secs(1));
        let t = h.trade("T1");
        assert_eq!(t.dispute_state, DisputeState::MediationClosed);
        assert_eq!(
            t.process_model.buyer_payout_amount_from_mediation,
            Coin::from_sat(950_000)
        );
        assert_eq!(
            t.process_model.seller_payout_amount_from_mediation,
            Coin::from_sat(40_000)
        );
        assert_eq!(h.chat_count("T1"), 1);
        assert_eq!(h.acks.sent_for(chat_uid).len(), 1);
        assert!(!h.engine.has_pending_retry(&uid));
    }

    #[test]
    fn missing_dispute_is_retried_exactly_once() {
        let mut h = Harness::new(ScriptedOutcome::Succeed);
        let msg = result_message("T1", 1, 1);
        let uid = msg.uid;

        h.deliver(msg);
        h.advance(Duration::from_secs(2));
        h.advance(Duration::from_secs(60));

        assert_eq!(h.clock.scheduled(), 1);
        assert_eq!(h.clock.pending(), 0);
        assert!(!h.engine.has_pending_retry(&uid));
        assert_eq!(h.engine.pending_retries(), 0);
        assert!(h.acks.sent().is_empty());
        assert_eq!(h.dispute_writes.count(), 0);
    }

    #[test]
    fn redelivery_while_retry_pending_is_dropped() {
        let mut h = Harness::new(ScriptedOutcome::Succeed);
        let msg = result_message("T1", 1, 1);
        let uid = msg.uid;

        h.deliver(msg.clone());
        h.deliver(msg);

        assert_eq!(h.clock.scheduled(), 1);
        assert!(h.engine.has_pending_retry(&uid));
        assert_eq!(h.engine.pending_retries(), 1);
    }

    #[test]
    fn distinct_messages_get_their_own_retry() {
        let mut h = Harness::new(ScriptedOutcome::Succeed);
        h.deliver(result_message("T1", 1, 1));
        h.deliver(result_message("T2", 1, 1));
        assert_eq!(h.clock.scheduled(), 2);
        assert_eq!(h.engine.pending_retries(), 2);
    }

    // -- Dispatch ---------------------------------------------------------------

    #[test]
    fn gate_rejects_other_support_types_without_mutation() {
        let mut h = Harness::new(ScriptedOutcome::Succeed).with_dispute("T1");
        h.trades.add_trade(trade("T1", DisputeState::MediationRequested));
        let mut msg = result_message("T1", 1, 1);
        msg.support_type = SupportType::Arbitration;

        h.deliver(msg);

        assert_eq!(h.trade("T1").dispute_state, DisputeState::MediationRequested);
        assert_eq!(h.chat_count("T1"), 0);
        assert!(h.acks.sent().is_empty());
    }

    #[test]
    fn unsupported_message_is_dropped() {
        let mut h = Harness::new(ScriptedOutcome::Succeed);
        assert!(h
            .engine
            .handle(EngineEvent::Support(SupportMessage::Unsupported))
            .is_ok());
        assert!(h.acks.sent().is_empty());
    }

    // -- Acceptance -------------------------------------------------------------

    #[test]
    fn first_acceptor_sends_own_signature() {
        let mut h = Harness::new(ScriptedOutcome::Succeed).with_dispute("T1");
        h.trades.add_trade(trade("T1", DisputeState::MediationRequested));
        h.deliver(result_message("T1", 950_000, 40_000));
        let cb = Callbacks::default();

        cb.accept(&mut h, "T1").unwrap();
        assert_eq!(cb.successes(), 0);
        h.pump();

        assert_eq!(h.payouts.count(PayoutStep::AcceptAndSendSignature), 1);
        assert_eq!(h.payouts.count(PayoutStep::FinalizeWithPeerSignature), 0);
        assert_eq!(cb.successes(), 1);
        assert!(cb.failures().is_empty());
        assert_eq!(
            h.trade("T1").mediation_result_state,
            MediationResultState::MediationResultAccepted
        );
        assert!(!h.trades.is_closed(&id("T1")));
        assert_eq!(h.engine.pending_acceptances(), 0);
    }

    #[test]
    fn second_acceptor_finalizes_and_closes_the_trade() {
        let mut h = Harness::new(ScriptedOutcome::Succeed).with_dispute("T1");
        let mut t = trade("T1", DisputeState::MediationRequested);
        t.process_model.trade_peer.mediated_payout_tx_signature = Some(vec![0x30, 0x44]);
        h.trades.add_trade(t);
        h.deliver(result_message("T1", 950_000, 40_000));
        let cb = Callbacks::default();

        cb.accept(&mut h, "T1").unwrap();
        h.pump();

        assert_eq!(h.payouts.count(PayoutStep::FinalizeWithPeerSignature), 1);
        assert_eq!(h.payouts.count(PayoutStep::AcceptAndSendSignature), 0);
        assert_eq!(cb.successes(), 1);
        assert!(h.trades.is_closed(&id("T1")));
        assert_eq!(h.trade("T1").dispute_state, DisputeState::MediationClosed);
    }

    #[test]
    fn payout_failure_reaches_caller_verbatim() {
        let mut h =
            Harness::new(ScriptedOutcome::Fail("peer signature invalid".into())).with_dispute("T1");
        h.trades.add_trade(trade("T1", DisputeState::MediationRequested));
        h.deliver(result_message("T1", 1, 1));
        let cb = Callbacks::default();

        cb.accept(&mut h, "T1").unwrap();
        h.pump();

        assert_eq!(cb.failures(), vec!["peer signature invalid".to_string()]);
        assert_eq!(cb.successes(), 0);
        assert!(!h.trades.is_closed(&id("T1")));
    }

    #[test]
    fn acceptance_waits_for_completion() {
        let mut h = Harness::new(ScriptedOutcome::Hold).with_dispute("T1");
        h.trades.add_trade(trade("T1", DisputeState::MediationRequested));
        h.deliver(result_message("T1", 1, 1));
        let cb = Callbacks::default();

        cb.accept(&mut h, "T1").unwrap();
        h.pump();
        assert_eq!(cb.successes(), 0);
        assert!(cb.failures().is_empty());
        assert_eq!(h.engine.pending_acceptances(), 1);

        h.payouts.release_success();
        h.pump();
        assert_eq!(cb.successes(), 1);
        assert_eq!(h.engine.pending_acceptances(), 0);
    }

    #[test]
    fn acceptance_without_result_is_a_precondition_error() {
        let mut h = Harness::new(ScriptedOutcome::Succeed).with_dispute("T1");
        h.trades.add_trade(trade("T1", DisputeState::MediationRequested));
        let cb = Callbacks::default();

        let err = cb.accept(&mut h, "T1").unwrap_err();
        h.pump();

        assert_eq!(err, MediationError::NoDisputeResult { trade_id: id("T1") });
        assert!(h.payouts.calls().is_empty());
        assert_eq!(cb.successes(), 0);
        assert!(cb.failures().is_empty());
        assert_eq!(
            h.trade("T1").mediation_result_state,
            MediationResultState::Neutral
        );
    }

    #[test]
    fn unknown_completion_is_ignored() {
        let mut h = Harness::new(ScriptedOutcome::Succeed);
        h.engine
            .handle(EngineEvent::PayoutCompleted(PayoutOutcome {
                ticket: AcceptanceTicket::new(42),
                trade_id: id("T1"),
                result: Ok(()),
            }))
            .unwrap();
    }

    // -- Rejection and cleanup --------------------------------------------------

    #[test]
    fn rejection_sets_state_and_persists_once() {
        let mut h = Harness::new(ScriptedOutcome::Succeed).with_dispute("T1");
        h.trades.add_trade(trade("T1", DisputeState::MediationClosed));
        let before = h.engine.disputes().snapshot();

        h.engine.reject_mediation_result(&id("T1")).unwrap();

        let t = h.trade("T1");
        assert_eq!(
            t.mediation_result_state,
            MediationResultState::MediationResultRejected
        );
        assert_eq!(t.dispute_state, DisputeState::MediationClosed);
        assert_eq!(h.trade_writes.count(), 1);
        assert_eq!(h.engine.disputes().snapshot(), before);
        assert_eq!(h.dispute_writes.count(), 0);
    }

    #[test]
    fn rejection_of_unknown_trade_fails() {
        let mut h = Harness::new(ScriptedOutcome::Succeed);
        assert_eq!(
            h.engine.reject_mediation_result(&id("T404")),
            Err(MediationError::TradeNotFound { trade_id: id("T404") })
        );
    }

    #[test]
    fn cleanup_closes_paid_out_trades_once() {
        let mut h = Harness::new(ScriptedOutcome::Succeed)
            .with_dispute("T1")
            .with_dispute("T2");
        h.trades.add_trade(trade("T1", DisputeState::MediationClosed));
        h.trades.add_trade(trade("T2", DisputeState::MediationRequested));
        h.trades.set_payout_tx(&id("T1"), PayoutTx { txid: "aa".into() });

        assert_eq!(h.engine.cleanup_disputes(), 1);
        assert!(h.trades.is_closed(&id("T1")));
        assert!(!h.trades.is_closed(&id("T2")));
        assert_eq!(h.engine.cleanup_disputes(), 0);
    }

    // -- Opening and chat -------------------------------------------------------

    #[test]
    fn open_dispute_requests_mediation() {
        let mut h = Harness::new(ScriptedOutcome::Succeed);
        h.trades.add_trade(trade("T1", DisputeState::NoDispute));

        assert!(h.engine.open_dispute(dispute("T1")));
        assert!(!h.engine.open_dispute(dispute("T1")));

        assert_eq!(h.trade("T1").dispute_state, DisputeState::MediationRequested);
        let d = h.engine.disputes().find_by_trade_id(&id("T1")).unwrap();
        assert_eq!(d.chat_messages().len(), 1);
        assert!(d.chat_messages()[0].system_message);
        assert!(d.chat_messages()[0].message.starts_with("You opened"));
    }

    #[test]
    fn peer_opened_dispute_marks_trade_and_acks_mediator() {
        let mut h = Harness::new(ScriptedOutcome::Succeed);
        h.trades.add_trade(trade("T1", DisputeState::NoDispute));
        let uid = MessageUid::new();
        let msg = SupportMessage::PeerOpenedDispute(PeerOpenedDisputeMessage {
            uid,
            dispute: dispute("T1"),
            sender_node_address: mediator(),
        });

        h.engine.handle(EngineEvent::Support(msg.clone())).unwrap();
        h.engine.handle(EngineEvent::Support(msg)).unwrap();

        assert_eq!(
            h.trade("T1").dispute_state,
            DisputeState::MediationStartedByPeer
        );
        assert_eq!(h.chat_count("T1"), 1);
        let acks = h.acks.sent_for(uid);
        assert_eq!(acks.len(), 2);
        assert!(acks[0].success);
        assert!(!acks[1].success);
        assert_eq!(acks[0].recipient, PubKeyRing::new(MEDIATOR_KEY).unwrap());
    }

    #[test]
    fn open_new_dispute_acks_the_trader() {
        let mut h = Harness::new(ScriptedOutcome::Succeed);
        let uid = MessageUid::new();
        h.engine
            .handle(EngineEvent::Support(SupportMessage::OpenNewDispute(
                OpenNewDisputeMessage {
                    uid,
                    dispute: dispute("T1"),
                    sender_node_address: NodeAddress::new("trader.onion:1").unwrap(),
                },
            )))
            .unwrap();
        let acks = h.acks.sent_for(uid);
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].recipient, PubKeyRing::new("aa").unwrap());
        assert!(acks[0].success);
        assert_eq!(h.chat_count("T1"), 1);
    }

    #[test]
    fn chat_is_appended_once_and_always_acked() {
        let mut h = Harness::new(ScriptedOutcome::Succeed).with_dispute("T1");
        let chat = closing_chat("T1");
        h.engine
            .handle(EngineEvent::Support(SupportMessage::Chat(chat.clone())))
            .unwrap();
        h.engine
            .handle(EngineEvent::Support(SupportMessage::Chat(chat.clone())))
            .unwrap();
        assert_eq!(h.chat_count("T1"), 1);
        assert_eq!(h.acks.sent_for(chat.uid).len(), 2);
    }

    #[test]
    fn chat_for_unknown_dispute_is_dropped() {
        let mut h = Harness::new(ScriptedOutcome::Succeed);
        h.engine
            .handle(EngineEvent::Support(SupportMessage::Chat(closing_chat("T1"))))
            .unwrap();
        assert!(h.acks.sent().is_empty());
    }

    proptest! {
        #[test]
        fn any_number_of_deliveries_applies_once(deliveries in 1usize..8) {
            let mut h = Harness::new(ScriptedOutcome::Succeed).with_dispute("T1");
            h.trades.add_trade(trade("T1", DisputeState::MediationRequested));
            let msg = result_message("T1", 950_000, 40_000);
            for _ in 0..deliveries {
                h.deliver(msg.clone());
            }
            prop_assert_eq!(h.chat_count("T1"), 1);
            prop_assert_eq!(h.trade_writes.count(), 1);
            prop_assert_eq!(h.acks.sent().len(), deliveries);
        }
    }
}
