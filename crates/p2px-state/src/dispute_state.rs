//! # Dispute State
//!
//! The per-trade dispute track and the local verdict on a mediation result.
//!
//! ## Transition Graph
//!
//! ```text
//! NoDispute ──┬──▶ MediationRequested ─────┐
//!             ├──▶ MediationStartedByPeer ─┴──▶ MediationClosed ──┬──▶ RefundRequested ─────────┐
//!             ├──▶ RefundRequested ───────────────────────────────┼──▶ RefundRequestStartedByPeer ┴──▶ RefundRequestClosed
//!             └──▶ RefundRequestStartedByPeer ────────────────────┘
//! ```
//!
//! States only move forward. A mediation result is applied to a trade only
//! from one of the two pre-closure mediation states; every other state is
//! left untouched so a late or duplicated result cannot re-apply a payout.

use serde::{Deserialize, Serialize};

/// Dispute state of a trade.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisputeState {
    /// No dispute has been opened.
    #[default]
    NoDispute,
    /// This side opened a mediation case.
    MediationRequested,
    /// The trading peer opened a mediation case.
    MediationStartedByPeer,
    /// The mediator issued a result; the mediation track is finished.
    MediationClosed,
    /// This side escalated to a refund agent.
    RefundRequested,
    /// The trading peer escalated to a refund agent.
    RefundRequestStartedByPeer,
    /// The refund agent closed the case. Terminal state.
    RefundRequestClosed,
}

impl DisputeState {
    /// The canonical state name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoDispute => "NO_DISPUTE",
            Self::MediationRequested => "MEDIATION_REQUESTED",
            Self::MediationStartedByPeer => "MEDIATION_STARTED_BY_PEER",
            Self::MediationClosed => "MEDIATION_CLOSED",
            Self::RefundRequested => "REFUND_REQUESTED",
            Self::RefundRequestStartedByPeer => "REFUND_REQUEST_STARTED_BY_PEER",
            Self::RefundRequestClosed => "REFUND_REQUEST_CLOSED",
        }
    }

    /// Whether a mediation case is open and awaiting its result.
    pub fn is_mediation_open(&self) -> bool {
        matches!(self, Self::MediationRequested | Self::MediationStartedByPeer)
    }

    /// Whether any dispute (mediation or refund) has been opened.
    pub fn is_disputed(&self) -> bool {
        !matches!(self, Self::NoDispute)
    }

    /// Whether this state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RefundRequestClosed)
    }

    /// Valid target states from this state.
    pub fn valid_transitions(&self) -> &'static [DisputeState] {
        match self {
            Self::NoDispute => &[
                Self::MediationRequested,
                Self::MediationStartedByPeer,
                Self::RefundRequested,
                Self::RefundRequestStartedByPeer,
            ],
            Self::MediationRequested | Self::MediationStartedByPeer => &[Self::MediationClosed],
            Self::MediationClosed => &[Self::RefundRequested, Self::RefundRequestStartedByPeer],
            Self::RefundRequested | Self::RefundRequestStartedByPeer => {
                &[Self::RefundRequestClosed]
            }
            Self::RefundRequestClosed => &[],
        }
    }

    /// Whether `to` is reachable in one step from this state.
    pub fn can_transition_to(&self, to: DisputeState) -> bool {
        self.valid_transitions().contains(&to)
    }
}

impl std::fmt::Display for DisputeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// This side's verdict on the mediator's proposed payout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediationResultState {
    /// No decision yet.
    #[default]
    Neutral,
    /// The result was accepted; payout signing is under way or done.
    MediationResultAccepted,
    /// The result was rejected; escalation is up to the user.
    MediationResultRejected,
}

impl MediationResultState {
    /// The canonical state name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Neutral => "NEUTRAL",
            Self::MediationResultAccepted => "MEDIATION_RESULT_ACCEPTED",
            Self::MediationResultRejected => "MEDIATION_RESULT_REJECTED",
        }
    }
}

impl std::fmt::Display for MediationResultState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
