//! # Scenario Replay
//!
//! Drives a [`Node`] through a scripted sequence of deliveries and user
//! actions with a virtual clock, then reports the resulting state. Retry
//! timers run on a [`ManualScheduler`] and only fire on an `advance` step,
//! so a replay is deterministic.
//!
//! Scenarios are JSON documents:
//!
//! ```json
//! {
//!   "node_address": "me.onion:9999",
//!   "trades": [ ... ],
//!   "steps": [
//!     { "action": "deliver", "message": { "type": "dispute_result", ... } },
//!     { "action": "advance", "millis": 2000 },
//!     { "action": "accept", "trade_id": "T1" }
//!   ]
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use p2px_core::{NodeAddress, TradeId};
use p2px_state::{InMemoryTradeRegistry, OpenOffer, PayoutTx, Trade, TradeBook, TradePhase};
use p2px_support::{
    AckMessage, Dispute, DisputeStore, DisputeTexts, EngineEvent, ManualScheduler,
    MediationConfig, PayoutCall, PayoutCallLog, PayoutStep, RecordingAckSender, ScriptedOutcome,
    ScriptedPayoutProtocol, SupportMessage, DEFAULT_RETRY_DELAY,
};

use crate::error::NodeError;
use crate::node::{Node, NodeHandle, NodeParts, TradeUpdate};
use crate::persist::Persister;

/// One scripted step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScenarioStep {
    /// Deliver an inbound support message.
    Deliver { message: SupportMessage },
    /// Move the virtual clock forward and fire due retries.
    Advance { millis: u64 },
    /// Open a dispute for the local trader.
    OpenDispute { dispute: Dispute },
    /// Accept the mediator's result.
    Accept { trade_id: TradeId },
    /// Reject the mediator's result.
    Reject { trade_id: TradeId },
    /// Resolve every held payout completion.
    ReleasePayout {
        /// Fail with this message instead of succeeding.
        #[serde(default)]
        error: Option<String>,
    },
    /// Close disputed trades whose payout is published.
    Cleanup,
    /// Move a trade to a new phase.
    SetPhase { trade_id: TradeId, phase: TradePhase },
    /// Record a published payout transaction.
    SetPayoutTx { trade_id: TradeId, txid: String },
    /// Store the peer's mediated payout signature.
    SetPeerSignature { trade_id: TradeId, signature: Vec<u8> },
}

impl ScenarioStep {
    fn name(&self) -> &'static str {
        match self {
            Self::Deliver { .. } => "deliver",
            Self::Advance { .. } => "advance",
            Self::OpenDispute { .. } => "open_dispute",
            Self::Accept { .. } => "accept",
            Self::Reject { .. } => "reject",
            Self::ReleasePayout { .. } => "release_payout",
            Self::Cleanup => "cleanup",
            Self::SetPhase { .. } => "set_phase",
            Self::SetPayoutTx { .. } => "set_payout_tx",
            Self::SetPeerSignature { .. } => "set_peer_signature",
        }
    }
}

fn default_node_address() -> NodeAddress {
    crate::config::NodeConfig::default().node_address
}

/// A replayable scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    /// This node's address.
    #[serde(default = "default_node_address")]
    pub node_address: NodeAddress,
    /// Live trades at the start.
    #[serde(default)]
    pub trades: Vec<Trade>,
    /// Open offers at the start.
    #[serde(default)]
    pub open_offers: Vec<OpenOffer>,
    /// Disputes already stored at the start.
    #[serde(default)]
    pub disputes: Vec<Dispute>,
    /// How the payout protocol resolves.
    #[serde(default)]
    pub payout: ScriptedOutcome,
    /// Publish the payout transaction when a finalize call succeeds.
    #[serde(default)]
    pub publish_on_finalize: bool,
    /// Retry delay; the default applies when absent.
    #[serde(default)]
    pub retry_delay_millis: Option<u64>,
    /// Steps in order.
    pub steps: Vec<ScenarioStep>,
}

impl Scenario {
    /// Read a scenario file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, NodeError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// What one step produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    /// Zero-based step index.
    pub index: usize,
    /// The step's action name.
    pub action: String,
    /// `ok`, `pending`, `false`, a count, or `error: ...`.
    pub outcome: String,
}

/// State after the last step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayReport {
    pub trades: TradeBook,
    pub disputes: Vec<Dispute>,
    pub acks: Vec<AckMessage>,
    pub payout_calls: Vec<PayoutCall>,
    pub pending_retries: usize,
    pub pending_acceptances: usize,
    pub steps: Vec<StepReport>,
}

type PendingAccept = (usize, oneshot::Receiver<Result<(), NodeError>>);

/// Run `scenario` on a fresh in-memory node.
///
/// # Errors
///
/// Returns [`NodeError::Stopped`] if the node loop ends early.
pub async fn replay(scenario: Scenario) -> Result<ReplayReport, NodeError> {
    let persister = Persister::in_memory();
    let registry = InMemoryTradeRegistry::new(persister.trades_signal());
    for trade in scenario.trades {
        registry.add_trade(trade);
    }
    for offer in scenario.open_offers {
        registry.add_open_offer(offer);
    }
    let disputes = DisputeStore::from_disputes(scenario.disputes, persister.disputes_signal());

    let clock = ManualScheduler::new();
    let acks = RecordingAckSender::new();
    let calls = PayoutCallLog::new();
    let mut payout = ScriptedPayoutProtocol::new(scenario.payout, calls.clone());
    if scenario.publish_on_finalize {
        let publisher = registry.clone();
        payout = payout.on_success(move |trade_id, step| {
            if step == PayoutStep::FinalizeWithPeerSignature {
                publisher.set_payout_tx(
                    trade_id,
                    PayoutTx {
                        txid: format!("payout-{trade_id}"),
                    },
                );
            }
        });
    }
    let retry_delay = scenario
        .retry_delay_millis
        .map_or(DEFAULT_RETRY_DELAY, Duration::from_millis);

    let node = Node::new(
        MediationConfig::with_retry_delay(retry_delay),
        scenario.node_address,
        registry,
        disputes,
        persister,
        NodeParts {
            payout: Box::new(payout),
            acks: Box::new(acks.clone()),
            scheduler: Some(Box::new(clock.clone())),
            texts: DisputeTexts::default(),
        },
    );
    let handle = node.handle();
    let task = tokio::spawn(node.run());

    let mut steps = Vec::with_capacity(scenario.steps.len());
    let mut accepts: Vec<PendingAccept> = Vec::new();
    for (index, step) in scenario.steps.into_iter().enumerate() {
        let action = step.name().to_string();
        tracing::debug!(index, action = %action, "replay step");
        let outcome = run_step(&handle, &clock, &calls, step, index, &mut accepts).await?;
        steps.push(StepReport {
            index,
            action,
            outcome,
        });
        settle_accepts(&mut accepts, &mut steps);
    }

    let snapshot = handle.snapshot().await?;
    handle.shutdown();
    if task.await.is_err() {
        tracing::error!("replay node task panicked");
    }

    Ok(ReplayReport {
        trades: snapshot.trades,
        disputes: snapshot.disputes,
        acks: acks.sent(),
        payout_calls: calls.calls(),
        pending_retries: snapshot.pending_retries,
        pending_acceptances: snapshot.pending_acceptances,
        steps,
    })
}

async fn run_step(
    handle: &NodeHandle,
    clock: &ManualScheduler,
    calls: &PayoutCallLog,
    step: ScenarioStep,
    index: usize,
    accepts: &mut Vec<PendingAccept>,
) -> Result<String, NodeError> {
    let outcome = match step {
        ScenarioStep::Deliver { message } => {
            handle.deliver(message)?;
            "ok".to_string()
        }
        ScenarioStep::Advance { millis } => {
            let due = clock.advance(Duration::from_millis(millis));
            let fired = due.len();
            for task in due {
                handle.push(EngineEvent::Deferred(task))?;
            }
            format!("{fired} fired")
        }
        ScenarioStep::OpenDispute { dispute } => handle.open_dispute(dispute).await?.to_string(),
        ScenarioStep::Accept { trade_id } => {
            accepts.push((index, handle.begin_accept(trade_id)?));
            "pending".to_string()
        }
        ScenarioStep::Reject { trade_id } => outcome_of(handle.reject_mediation_result(trade_id).await),
        ScenarioStep::ReleasePayout { error } => {
            let held = calls.held();
            match error {
                Some(error) => calls.release_failure(&error),
                None => calls.release_success(),
            }
            format!("{held} released")
        }
        ScenarioStep::Cleanup => format!("{} closed", handle.cleanup_disputes().await?),
        ScenarioStep::SetPhase { trade_id, phase } => handle
            .update_trade(trade_id, TradeUpdate::Phase { phase })
            .await?
            .to_string(),
        ScenarioStep::SetPayoutTx { trade_id, txid } => handle
            .update_trade(trade_id, TradeUpdate::PayoutTx { txid })
            .await?
            .to_string(),
        ScenarioStep::SetPeerSignature {
            trade_id,
            signature,
        } => handle
            .update_trade(trade_id, TradeUpdate::PeerSignature { signature })
            .await?
            .to_string(),
    };
    // Payout completions raised while handling the step queue up behind the
    // first barrier.
    handle.sync().await?;
    handle.sync().await?;
    Ok(outcome)
}

fn outcome_of(result: Result<(), NodeError>) -> String {
    match result {
        Ok(()) => "ok".to_string(),
        Err(e) => format!("error: {e}"),
    }
}

fn settle_accepts(accepts: &mut Vec<PendingAccept>, steps: &mut [StepReport]) {
    accepts.retain_mut(|(index, rx)| match rx.try_recv() {
        Ok(result) => {
            if let Some(report) = steps.get_mut(*index) {
                report.outcome = outcome_of(result);
            }
            false
        }
        Err(oneshot::error::TryRecvError::Empty) => true,
        Err(oneshot::error::TryRecvError::Closed) => {
            if let Some(report) = steps.get_mut(*index) {
                report.outcome = "error: abandoned".to_string();
            }
            false
        }
    });
}

/// Replay the scenario stored at `path`.
///
/// # Errors
///
/// Returns an error if the scenario cannot be loaded or the node stops early.
pub async fn replay_file(path: &Path) -> Result<ReplayReport, NodeError> {
    replay(Scenario::load(path)?).await
}
