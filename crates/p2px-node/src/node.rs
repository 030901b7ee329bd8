//! # Node Event Loop
//!
//! [`Node`] owns the [`MediationManager`] and runs it inside a single tokio
//! task. Everything that touches the engine arrives as a [`NodeEvent`] on one
//! unbounded channel: inbound support messages, retry timers, payout
//! completions and local user actions. Events are processed strictly in
//! arrival order and dirty snapshots are flushed after each one.
//!
//! [`NodeHandle`] is the cloneable front door. Requests that need an answer
//! carry a oneshot reply channel.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use p2px_core::{NodeAddress, TradeId};
use p2px_state::{InMemoryTradeRegistry, PayoutTx, TradeBook, TradePhase, TradeRegistry};
use p2px_support::{
    AckSender, Collaborators, Dispute, DisputeStore, DisputeTexts, EngineEvent, MediationConfig,
    MediationManager, PayoutProtocol, RetryScheduler, SupportMessage, SupportTypeGate,
};

use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::journal::TradeJournal;
use crate::persist::Persister;
use crate::scheduler::{EventSink, TokioScheduler};
use crate::snapshot::JsonSnapshotStore;

type Reply<T> = oneshot::Sender<T>;

/// A local change to a live trade, applied on the node loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TradeUpdate {
    /// Move the trade to a new phase.
    Phase {
        /// The new phase.
        phase: TradePhase,
    },
    /// Record the published payout transaction.
    PayoutTx {
        /// The transaction id.
        txid: String,
    },
    /// Store the peer's signature of the mediated payout.
    PeerSignature {
        /// Raw signature bytes.
        signature: Vec<u8>,
    },
}

/// Point-in-time view of the node's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    /// Live and closed trades plus open offers.
    pub trades: TradeBook,
    /// Every stored dispute.
    pub disputes: Vec<Dispute>,
    /// Dispute results waiting for their retry.
    pub pending_retries: usize,
    /// Acceptances waiting for their payout to complete.
    pub pending_acceptances: usize,
}

/// Everything the node loop processes.
pub enum NodeEvent {
    /// Forward to the engine as is.
    Engine(EngineEvent),
    /// Accept the mediator's result. Answered when the payout completes.
    Accept {
        /// The disputed trade.
        trade_id: TradeId,
        /// Receives the final outcome.
        reply: Reply<Result<(), NodeError>>,
    },
    /// Reject the mediator's result.
    Reject {
        /// The disputed trade.
        trade_id: TradeId,
        /// Receives the outcome.
        reply: Reply<Result<(), NodeError>>,
    },
    /// Open a dispute for the local trader.
    OpenDispute {
        /// The new dispute.
        dispute: Box<Dispute>,
        /// `false` if a dispute already existed.
        reply: Reply<bool>,
    },
    /// Close disputed trades whose payout is published.
    Cleanup {
        /// Number of trades closed.
        reply: Reply<usize>,
    },
    /// Change a live trade.
    UpdateTrade {
        /// The trade.
        trade_id: TradeId,
        /// The change.
        update: TradeUpdate,
        /// `false` if no live trade has this id.
        reply: Reply<bool>,
    },
    /// Answered once every earlier event has been processed.
    Sync {
        /// Acknowledges the barrier.
        reply: Reply<()>,
    },
    /// Capture the node's state.
    Snapshot {
        /// Receives the snapshot.
        reply: Reply<NodeSnapshot>,
    },
    /// Stop the loop after a final flush.
    Shutdown,
}

impl std::fmt::Debug for NodeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Engine(event) => f.debug_tuple("Engine").field(event).finish(),
            Self::Accept { trade_id, .. } => f.debug_struct("Accept").field("trade_id", trade_id).finish(),
            Self::Reject { trade_id, .. } => f.debug_struct("Reject").field("trade_id", trade_id).finish(),
            Self::OpenDispute { dispute, .. } => f
                .debug_struct("OpenDispute")
                .field("trade_id", &dispute.trade_id)
                .finish(),
            Self::Cleanup { .. } => f.write_str("Cleanup"),
            Self::UpdateTrade { trade_id, update, .. } => f
                .debug_struct("UpdateTrade")
                .field("trade_id", trade_id)
                .field("update", update)
                .finish(),
            Self::Sync { .. } => f.write_str("Sync"),
            Self::Snapshot { .. } => f.write_str("Snapshot"),
            Self::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// The collaborators a node is built with.
pub struct NodeParts {
    /// Payout signing sub-protocol.
    pub payout: Box<dyn PayoutProtocol>,
    /// Outbound acknowledgements.
    pub acks: Box<dyn AckSender>,
    /// Retry scheduler. `None` uses tokio timers.
    pub scheduler: Option<Box<dyn RetryScheduler>>,
    /// System chat message texts.
    pub texts: DisputeTexts,
}

/// The mediation node.
pub struct Node {
    engine: MediationManager,
    registry: InMemoryTradeRegistry,
    persister: Persister,
    events: mpsc::UnboundedReceiver<NodeEvent>,
    sender: mpsc::UnboundedSender<NodeEvent>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("engine", &self.engine)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Node {
    /// Wire a node from explicit state.
    ///
    /// `registry` and `disputes` should report persistence requests to
    /// `persister`'s signals.
    pub fn new(
        config: MediationConfig,
        node_address: NodeAddress,
        registry: InMemoryTradeRegistry,
        disputes: DisputeStore,
        persister: Persister,
        parts: NodeParts,
    ) -> Self {
        let (sender, events) = mpsc::unbounded_channel();
        let scheduler = parts
            .scheduler
            .unwrap_or_else(|| Box::new(TokioScheduler::new(sender.clone())) as Box<dyn RetryScheduler>);
        let engine = MediationManager::new(
            config,
            parts.texts,
            node_address,
            disputes,
            Collaborators {
                trades: Arc::new(registry.clone()),
                scheduler,
                acks: parts.acks,
                payout: parts.payout,
                gate: Box::new(SupportTypeGate::new(config.support_type)),
                completions: Arc::new(EventSink::new(sender.clone())),
            },
        );
        Self {
            engine,
            registry,
            persister,
            events,
            sender,
        }
    }

    /// Boot from `config`: restore snapshots from the data directory, persist
    /// back into it, and attach the trade journal when enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, or the data directory
    /// or an existing snapshot cannot be read.
    pub fn open(config: &NodeConfig, parts: NodeParts) -> Result<Self, NodeError> {
        config.validate()?;
        let store = JsonSnapshotStore::open(&config.data_dir)?;
        let persister = Persister::new(store.clone());
        let registry =
            InMemoryTradeRegistry::from_book(store.load_trade_book()?, persister.trades_signal());
        let disputes =
            DisputeStore::from_disputes(store.load_disputes()?, persister.disputes_signal());
        if config.journal.enabled {
            let journal = TradeJournal::open(
                config.trade_data_dir(),
                config.journal.notification_cli.as_deref(),
                config.journal.cli_timeout(),
            )?;
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    let (feed, _worker) = journal.start(&runtime);
                    registry.add_phase_listener(Arc::new(feed));
                }
                Err(_) => tracing::warn!("no tokio runtime, trade journal disabled"),
            }
        }
        tracing::info!(
            data_dir = %config.data_dir.display(),
            disputes = disputes.len(),
            "node state restored"
        );
        Ok(Self::new(
            MediationConfig::with_retry_delay(config.retry_delay()),
            config.node_address.clone(),
            registry,
            disputes,
            persister,
            parts,
        ))
    }

    /// A handle for feeding the node.
    pub fn handle(&self) -> NodeHandle {
        NodeHandle {
            events: self.sender.clone(),
        }
    }

    /// The shared trade registry.
    pub fn registry(&self) -> &InMemoryTradeRegistry {
        &self.registry
    }

    /// Process events until [`NodeHandle::shutdown`].
    pub async fn run(mut self) {
        tracing::info!("mediation node started");
        while let Some(event) = self.events.recv().await {
            if matches!(event, NodeEvent::Shutdown) {
                break;
            }
            self.dispatch(event);
            self.persister.flush(&self.registry, self.engine.disputes());
        }
        self.persister.flush(&self.registry, self.engine.disputes());
        tracing::info!("mediation node stopped");
    }

    fn dispatch(&mut self, event: NodeEvent) {
        match event {
            NodeEvent::Engine(event) => {
                if let Err(e) = self.engine.handle(event) {
                    tracing::warn!(error = %e, "engine event rejected");
                }
            }
            NodeEvent::Accept { trade_id, reply } => self.accept(&trade_id, reply),
            NodeEvent::Reject { trade_id, reply } => {
                let result = self
                    .engine
                    .reject_mediation_result(&trade_id)
                    .map_err(NodeError::from);
                let _ = reply.send(result);
            }
            NodeEvent::OpenDispute { dispute, reply } => {
                let _ = reply.send(self.engine.open_dispute(*dispute));
            }
            NodeEvent::Cleanup { reply } => {
                let _ = reply.send(self.engine.cleanup_disputes());
            }
            NodeEvent::UpdateTrade {
                trade_id,
                update,
                reply,
            } => {
                let _ = reply.send(self.update_trade(&trade_id, update));
            }
            NodeEvent::Sync { reply } => {
                let _ = reply.send(());
            }
            NodeEvent::Snapshot { reply } => {
                let _ = reply.send(NodeSnapshot {
                    trades: self.registry.snapshot(),
                    disputes: self.engine.disputes().snapshot(),
                    pending_retries: self.engine.pending_retries(),
                    pending_acceptances: self.engine.pending_acceptances(),
                });
            }
            NodeEvent::Shutdown => {}
        }
    }

    fn accept(&mut self, trade_id: &TradeId, reply: Reply<Result<(), NodeError>>) {
        let reply = Arc::new(Mutex::new(Some(reply)));
        let on_success = Arc::clone(&reply);
        let on_failure = Arc::clone(&reply);
        let started = self.engine.on_accept_mediation_result(
            trade_id,
            move || {
                if let Some(tx) = on_success.lock().take() {
                    let _ = tx.send(Ok(()));
                }
            },
            move |error| {
                if let Some(tx) = on_failure.lock().take() {
                    let _ = tx.send(Err(NodeError::PayoutFailed(error)));
                }
            },
        );
        if let Err(e) = started {
            tracing::warn!(trade_id = %trade_id, error = %e, "cannot accept mediation result");
            if let Some(tx) = reply.lock().take() {
                let _ = tx.send(Err(e.into()));
            }
        }
    }

    fn update_trade(&self, trade_id: &TradeId, update: TradeUpdate) -> bool {
        let applied = match update {
            TradeUpdate::Phase { phase } => self.registry.set_phase(trade_id, phase),
            TradeUpdate::PayoutTx { txid } => {
                self.registry.set_payout_tx(trade_id, PayoutTx { txid })
            }
            TradeUpdate::PeerSignature { signature } => self
                .registry
                .update_trade(trade_id, &mut |trade| {
                    trade.process_model.trade_peer.mediated_payout_tx_signature =
                        Some(signature.clone());
                })
                .is_some(),
        };
        if applied {
            self.registry.request_persistence();
        } else {
            tracing::warn!(trade_id = %trade_id, "trade update for unknown trade ignored");
        }
        applied
    }
}

/// Cloneable front door to a running [`Node`].
#[derive(Debug, Clone)]
pub struct NodeHandle {
    events: mpsc::UnboundedSender<NodeEvent>,
}

impl NodeHandle {
    fn send(&self, event: NodeEvent) -> Result<(), NodeError> {
        self.events.send(event).map_err(|_| NodeError::Stopped)
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> NodeEvent) -> Result<T, NodeError> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx))?;
        rx.await.map_err(|_| NodeError::Stopped)
    }

    /// Deliver an inbound support message.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Stopped`] if the node is not running.
    pub fn deliver(&self, message: SupportMessage) -> Result<(), NodeError> {
        self.send(NodeEvent::Engine(EngineEvent::Support(message)))
    }

    /// Push any engine event.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Stopped`] if the node is not running.
    pub fn push(&self, event: EngineEvent) -> Result<(), NodeError> {
        self.send(NodeEvent::Engine(event))
    }

    /// Start accepting the mediator's result and return the receiver of its
    /// final outcome without waiting for it.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Stopped`] if the node is not running.
    pub fn begin_accept(
        &self,
        trade_id: TradeId,
    ) -> Result<oneshot::Receiver<Result<(), NodeError>>, NodeError> {
        let (reply, rx) = oneshot::channel();
        self.send(NodeEvent::Accept { trade_id, reply })?;
        Ok(rx)
    }

    /// Accept the mediator's result and wait for the payout to complete.
    ///
    /// # Errors
    ///
    /// Returns the engine's precondition error, [`NodeError::PayoutFailed`],
    /// or [`NodeError::Stopped`].
    pub async fn accept_mediation_result(&self, trade_id: TradeId) -> Result<(), NodeError> {
        self.begin_accept(trade_id)?
            .await
            .map_err(|_| NodeError::Stopped)?
    }

    /// Reject the mediator's result.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Mediation`] for an unknown trade, or
    /// [`NodeError::Stopped`].
    pub async fn reject_mediation_result(&self, trade_id: TradeId) -> Result<(), NodeError> {
        self.request(|reply| NodeEvent::Reject { trade_id, reply })
            .await?
    }

    /// Open a dispute for the local trader. `Ok(false)` if one already exists.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Stopped`] if the node is not running.
    pub async fn open_dispute(&self, dispute: Dispute) -> Result<bool, NodeError> {
        self.request(|reply| NodeEvent::OpenDispute {
            dispute: Box::new(dispute),
            reply,
        })
        .await
    }

    /// Close disputed trades whose payout is published.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Stopped`] if the node is not running.
    pub async fn cleanup_disputes(&self) -> Result<usize, NodeError> {
        self.request(|reply| NodeEvent::Cleanup { reply }).await
    }

    /// Change a live trade. `Ok(false)` if no live trade has this id.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Stopped`] if the node is not running.
    pub async fn update_trade(
        &self,
        trade_id: TradeId,
        update: TradeUpdate,
    ) -> Result<bool, NodeError> {
        self.request(|reply| NodeEvent::UpdateTrade {
            trade_id,
            update,
            reply,
        })
        .await
    }

    /// Wait until every event sent before this call has been processed.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Stopped`] if the node is not running.
    pub async fn sync(&self) -> Result<(), NodeError> {
        self.request(|reply| NodeEvent::Sync { reply }).await
    }

    /// Capture the node's state.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Stopped`] if the node is not running.
    pub async fn snapshot(&self) -> Result<NodeSnapshot, NodeError> {
        self.request(|reply| NodeEvent::Snapshot { reply }).await
    }

    /// Ask the loop to stop. Events already queued are still processed.
    pub fn shutdown(&self) {
        let _ = self.send(NodeEvent::Shutdown);
    }
}
