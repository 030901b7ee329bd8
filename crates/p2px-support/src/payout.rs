//! # Trade Payout Protocol
//!
//! The two-phase signing exchange that produces the mediated payout
//! transaction. Whichever trader accepts the result first signs and sends its
//! signature; the second one finalizes with the peer's signature and
//! publishes. The engine picks the half based on what has already arrived.
//!
//! ## Completion
//!
//! Each invocation receives a [`PayoutCompletion`]. It resolves exactly once:
//! [`PayoutCompletion::succeed`] and [`PayoutCompletion::fail`] consume it,
//! and dropping it unresolved reports a failure. The outcome is delivered to
//! a [`CompletionSink`], which in the node is the engine's own event queue,
//! so completion always re-enters on the engine's thread.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use p2px_core::TradeId;
use p2px_state::Trade;

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

/// Identifies one pending acceptance inside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AcceptanceTicket(u64);

impl AcceptanceTicket {
    /// Wrap a raw ticket value.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for AcceptanceTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "acceptance-{}", self.0)
    }
}

/// The resolved result of one payout invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutOutcome {
    /// The acceptance this outcome belongs to.
    pub ticket: AcceptanceTicket,
    /// The trade being paid out.
    pub trade_id: TradeId,
    /// `Err` carries the sub-protocol's error message verbatim.
    pub result: Result<(), String>,
}

/// Receives resolved payout outcomes.
pub trait CompletionSink: Send + Sync {
    /// Deliver `outcome` to the engine.
    fn deliver(&self, outcome: PayoutOutcome);
}

/// Error reported when a completion is dropped without being resolved.
pub const DROPPED_COMPLETION: &str = "payout protocol dropped its completion without a result";

/// Single-shot completion signal handed to the payout protocol.
pub struct PayoutCompletion {
    ticket: AcceptanceTicket,
    trade_id: TradeId,
    sink: Option<Arc<dyn CompletionSink>>,
}

impl std::fmt::Debug for PayoutCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayoutCompletion")
            .field("ticket", &self.ticket)
            .field("trade_id", &self.trade_id)
            .field("resolved", &self.sink.is_none())
            .finish()
    }
}

impl PayoutCompletion {
    /// Create a completion that reports to `sink`.
    pub fn new(ticket: AcceptanceTicket, trade_id: TradeId, sink: Arc<dyn CompletionSink>) -> Self {
        Self {
            ticket,
            trade_id,
            sink: Some(sink),
        }
    }

    /// The acceptance ticket.
    pub fn ticket(&self) -> AcceptanceTicket {
        self.ticket
    }

    /// The trade being paid out.
    pub fn trade_id(&self) -> &TradeId {
        &self.trade_id
    }

    /// Report success.
    pub fn succeed(mut self) {
        self.resolve(Ok(()));
    }

    /// Report failure with `error`.
    pub fn fail(mut self, error: impl Into<String>) {
        self.resolve(Err(error.into()));
    }

    fn resolve(&mut self, result: Result<(), String>) {
        if let Some(sink) = self.sink.take() {
            sink.deliver(PayoutOutcome {
                ticket: self.ticket,
                trade_id: self.trade_id.clone(),
                result,
            });
        }
    }
}

impl Drop for PayoutCompletion {
    fn drop(&mut self) {
        if self.sink.is_some() {
            tracing::warn!(trade_id = %self.trade_id, ticket = %self.ticket, "payout completion dropped unresolved");
            self.resolve(Err(DROPPED_COMPLETION.to_string()));
        }
    }
}

/// Queues outcomes for the caller to feed back into the engine. Clones share
/// the queue.
#[derive(Debug, Clone, Default)]
pub struct OutcomeQueue {
    queue: Arc<Mutex<VecDeque<PayoutOutcome>>>,
}

impl OutcomeQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return every queued outcome, oldest first.
    pub fn drain(&self) -> Vec<PayoutOutcome> {
        self.queue.lock().drain(..).collect()
    }

    /// Number of queued outcomes.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

impl CompletionSink for OutcomeQueue {
    fn deliver(&self, outcome: PayoutOutcome) {
        self.queue.lock().push_back(outcome);
    }
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// The payout signing sub-protocol.
///
/// Implementations may complete synchronously or later; the engine makes no
/// assumption either way.
pub trait PayoutProtocol: Send {
    /// Sign the mediated payout and send the signature to the peer.
    fn accept_and_send_signature(&mut self, trade: &Trade, completion: PayoutCompletion);

    /// Sign, combine with the peer's signature, and publish the payout.
    fn finalize_with_peer_signature(&mut self, trade: &Trade, completion: PayoutCompletion);
}

// ---------------------------------------------------------------------------
// Scripted implementation
// ---------------------------------------------------------------------------

/// Which half of the signing exchange was invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStep {
    /// First signer.
    AcceptAndSendSignature,
    /// Second signer.
    FinalizeWithPeerSignature,
}

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutCall {
    /// The invoked half.
    pub step: PayoutStep,
    /// The trade it was invoked for.
    pub trade_id: TradeId,
}

/// How a [`ScriptedPayoutProtocol`] resolves each invocation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptedOutcome {
    /// Resolve successfully at once.
    #[default]
    Succeed,
    /// Fail at once with this message.
    Fail(String),
    /// Keep the completion until the log releases it.
    Hold,
}

/// Shared record of a scripted protocol's invocations and held completions.
#[derive(Debug, Clone, Default)]
pub struct PayoutCallLog {
    calls: Arc<Mutex<Vec<PayoutCall>>>,
    held: Arc<Mutex<Vec<PayoutCompletion>>>,
}

impl PayoutCallLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every invocation so far.
    pub fn calls(&self) -> Vec<PayoutCall> {
        self.calls.lock().clone()
    }

    /// Number of invocations of `step`.
    pub fn count(&self, step: PayoutStep) -> usize {
        self.calls.lock().iter().filter(|c| c.step == step).count()
    }

    /// Number of held completions.
    pub fn held(&self) -> usize {
        self.held.lock().len()
    }

    /// Resolve every held completion successfully.
    pub fn release_success(&self) {
        let held: Vec<_> = self.held.lock().drain(..).collect();
        for completion in held {
            completion.succeed();
        }
    }

    /// Fail every held completion with `error`.
    pub fn release_failure(&self, error: &str) {
        let held: Vec<_> = self.held.lock().drain(..).collect();
        for completion in held {
            completion.fail(error);
        }
    }
}

type PublishHook = Box<dyn FnMut(&TradeId, PayoutStep) + Send>;

/// A payout protocol that resolves according to a fixed script.
pub struct ScriptedPayoutProtocol {
    outcome: ScriptedOutcome,
    log: PayoutCallLog,
    on_success: Option<PublishHook>,
}

impl std::fmt::Debug for ScriptedPayoutProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedPayoutProtocol")
            .field("outcome", &self.outcome)
            .field("log", &self.log)
            .finish()
    }
}

impl ScriptedPayoutProtocol {
    /// Create a protocol recording into `log`.
    pub fn new(outcome: ScriptedOutcome, log: PayoutCallLog) -> Self {
        Self {
            outcome,
            log,
            on_success: None,
        }
    }

    /// Run `hook` right before each immediate success, e.g. to publish the
    /// payout transaction.
    pub fn on_success(mut self, hook: impl FnMut(&TradeId, PayoutStep) + Send + 'static) -> Self {
        self.on_success = Some(Box::new(hook));
        self
    }

    fn run(&mut self, step: PayoutStep, trade: &Trade, completion: PayoutCompletion) {
        tracing::info!(trade_id = %trade.id, ?step, "payout protocol invoked");
        self.log.calls.lock().push(PayoutCall {
            step,
            trade_id: trade.id.clone(),
        });
        match &self.outcome {
            ScriptedOutcome::Succeed => {
                if let Some(hook) = self.on_success.as_mut() {
                    hook(&trade.id, step);
                }
                completion.succeed();
            }
            ScriptedOutcome::Fail(error) => completion.fail(error.clone()),
            ScriptedOutcome::Hold => self.log.held.lock().push(completion),
        }
    }
}

impl PayoutProtocol for ScriptedPayoutProtocol {
    fn accept_and_send_signature(&mut self, trade: &Trade, completion: PayoutCompletion) {
        self.run(PayoutStep::AcceptAndSendSignature, trade, completion);
    }

    fn finalize_with_peer_signature(&mut self, trade: &Trade, completion: PayoutCompletion) {
        self.run(PayoutStep::FinalizeWithPeerSignature, trade, completion);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completion(queue: &OutcomeQueue, n: u64) -> PayoutCompletion {
        PayoutCompletion::new(
            AcceptanceTicket::new(n),
            TradeId::new("T1").unwrap(),
            Arc::new(queue.clone()),
        )
    }

    #[test]
    fn succeed_delivers_once() {
        let queue = OutcomeQueue::new();
        completion(&queue, 1).succeed();
        let out = queue.drain();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].result, Ok(()));
        assert!(queue.is_empty());
    }

    #[test]
    fn fail_carries_message_verbatim() {
        let queue = OutcomeQueue::new();
        completion(&queue, 2).fail("wallet locked");
        assert_eq!(queue.drain()[0].result, Err("wallet locked".to_string()));
    }

    #[test]
    fn dropped_completion_reports_failure() {
        let queue = OutcomeQueue::new();
        drop(completion(&queue, 3));
        let out = queue.drain();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].ticket, AcceptanceTicket::new(3));
        assert_eq!(out[0].result, Err(DROPPED_COMPLETION.to_string()));
    }

    #[test]
    fn held_completions_release_later() {
        let queue = OutcomeQueue::new();
        let log = PayoutCallLog::new();
        log.held.lock().push(completion(&queue, 4));
        assert!(queue.is_empty());
        assert_eq!(log.held(), 1);
        log.release_failure("timeout");
        assert_eq!(queue.drain()[0].result, Err("timeout".to_string()));
        assert_eq!(log.held(), 0);
    }
}
