//! Tokio-backed retry timers and the completion sink that feeds payout
//! outcomes back into the node loop.

use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;

use p2px_support::{
    CompletionSink, DeferredTask, EngineEvent, PayoutOutcome, RetryScheduler, TimerHandle,
};

use crate::node::NodeEvent;

/// Sleeps on the current tokio runtime, then re-enters the node loop with
/// the deferred task.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    events: UnboundedSender<NodeEvent>,
    next: u64,
}

impl TokioScheduler {
    /// Schedule onto the loop fed by `events`.
    pub fn new(events: UnboundedSender<NodeEvent>) -> Self {
        Self { events, next: 0 }
    }
}

impl RetryScheduler for TokioScheduler {
    fn run_after(&mut self, delay: Duration, task: DeferredTask) -> TimerHandle {
        self.next += 1;
        let handle = TimerHandle::new(self.next);
        let events = self.events.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    if events
                        .send(NodeEvent::Engine(EngineEvent::Deferred(task)))
                        .is_err()
                    {
                        tracing::debug!(%handle, "node stopped before deferred task fired");
                    }
                });
            }
            Err(_) => {
                tracing::error!(%handle, "no tokio runtime, deferred task dropped");
            }
        }
        handle
    }
}

/// Delivers payout outcomes as node events.
#[derive(Debug, Clone)]
pub struct EventSink(UnboundedSender<NodeEvent>);

impl EventSink {
    /// Deliver into the loop fed by `events`.
    pub fn new(events: UnboundedSender<NodeEvent>) -> Self {
        Self(events)
    }
}

impl CompletionSink for EventSink {
    fn deliver(&self, outcome: PayoutOutcome) {
        let trade_id = outcome.trade_id.clone();
        if self
            .0
            .send(NodeEvent::Engine(EngineEvent::PayoutCompleted(outcome)))
            .is_err()
        {
            tracing::warn!(trade_id = %trade_id, "node stopped, payout outcome dropped");
        }
    }
}
