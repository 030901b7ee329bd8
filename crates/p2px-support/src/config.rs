//! # Mediation Configuration
//!
//! The values that distinguish the mediation track from other dispute
//! tracks, plus the text generators for system chat messages. Both are
//! injected at construction.

use std::time::Duration;

use p2px_state::DisputeState;

use crate::ack::AckMessageSourceType;
use crate::chat::SupportType;
use crate::dispute::Dispute;

/// Delay before a dispute result whose dispute is missing is applied again.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Track-specific engine parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediationConfig {
    /// Support type reported for routing and gating.
    pub support_type: SupportType,
    /// Source tag attached to outgoing acknowledgements.
    pub ack_source: AckMessageSourceType,
    /// Trade dispute state meaning "the peer opened the case".
    pub started_by_peer_state: DisputeState,
    /// Trade dispute state meaning "this side opened the case".
    pub requested_state: DisputeState,
    /// Delay of the single retry for a result whose dispute is missing.
    pub retry_delay: Duration,
}

impl Default for MediationConfig {
    fn default() -> Self {
        Self {
            support_type: SupportType::Mediation,
            ack_source: AckMessageSourceType::MediationMessage,
            started_by_peer_state: DisputeState::MediationStartedByPeer,
            requested_state: DisputeState::MediationRequested,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl MediationConfig {
    /// Default configuration with a custom retry delay.
    pub fn with_retry_delay(retry_delay: Duration) -> Self {
        Self {
            retry_delay,
            ..Self::default()
        }
    }
}

type InfoFn = Box<dyn Fn(&Dispute) -> String + Send>;
type IntroFn = Box<dyn Fn(&str) -> String + Send>;

/// Generators for the system chat messages added when a dispute opens.
///
/// None of them may panic for a dispute whose agent address is known. The
/// default mediation texts also tolerate an unknown agent address.
pub struct DisputeTexts {
    dispute_info: InfoFn,
    intro_for_peer: IntroFn,
    intro_for_creator: IntroFn,
}

impl std::fmt::Debug for DisputeTexts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisputeTexts").finish_non_exhaustive()
    }
}

impl DisputeTexts {
    /// Build from three generators.
    pub fn new(
        dispute_info: impl Fn(&Dispute) -> String + Send + 'static,
        intro_for_peer: impl Fn(&str) -> String + Send + 'static,
        intro_for_creator: impl Fn(&str) -> String + Send + 'static,
    ) -> Self {
        Self {
            dispute_info: Box::new(dispute_info),
            intro_for_peer: Box::new(intro_for_peer),
            intro_for_creator: Box::new(intro_for_creator),
        }
    }

    /// General information about the case and the mediator's role.
    pub fn dispute_info(&self, dispute: &Dispute) -> String {
        (self.dispute_info)(dispute)
    }

    /// Introduction shown to the trader whose peer opened the case.
    pub fn intro_for_peer(&self, dispute_info: &str) -> String {
        (self.intro_for_peer)(dispute_info)
    }

    /// Introduction shown to the trader who opened the case.
    pub fn intro_for_creator(&self, dispute_info: &str) -> String {
        (self.intro_for_creator)(dispute_info)
    }
}

impl Default for DisputeTexts {
    fn default() -> Self {
        Self::new(
            |dispute| {
                let agent = dispute
                    .agent_node_address()
                    .map_or("an unassigned mediator", |a| a.full_address());
                format!(
                    "Your mediation case for trade {} is handled by {agent}. \
                     The mediator proposes a payout; both traders must accept it \
                     before it is signed and published. If you reject the proposal \
                     you can escalate to a refund agent.",
                    dispute.trade_id
                )
            },
            |info| {
                format!(
                    "Your trading peer has requested mediation.\n\n{info}\n\nVersion {}",
                    env!("CARGO_PKG_VERSION")
                )
            },
            |info| {
                format!(
                    "You opened a request for mediation.\n\n{info}\n\nVersion {}",
                    env!("CARGO_PKG_VERSION")
                )
            },
        )
    }
}
