//! Node-level errors.

use p2px_support::MediationError;

use crate::config::ConfigError;

/// Errors surfaced by the node runtime.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A snapshot or journal file operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A snapshot or scenario document could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The engine rejected the operation.
    #[error(transparent)]
    Mediation(#[from] MediationError),

    /// The payout signing exchange reported a failure.
    #[error("mediated payout failed: {0}")]
    PayoutFailed(String),

    /// The node loop has stopped and no longer accepts requests.
    #[error("node is not running")]
    Stopped,
}
