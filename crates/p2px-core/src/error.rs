//! # Error Hierarchy
//!
//! Structured error types shared across the stack, built with `thiserror`.
//! Subsystem crates define their own enums and convert into [`P2pxError`]
//! where a single top-level type is convenient (the node runtime, the CLI).

use thiserror::Error;

/// Top-level error type for the P2PX stack.
#[derive(Error, Debug)]
pub enum P2pxError {
    /// Domain primitive validation failure.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// State machine transition violation.
    #[error("state transition error: {0}")]
    StateTransition(String),

    /// A protocol precondition did not hold.
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Validation errors for domain primitive newtypes.
///
/// Each carries the rejected input so operators can see what a peer sent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Trade id is empty, too long, or has characters outside `[A-Za-z0-9._-]`.
    #[error("invalid trade id: \"{0}\" (expected 1-128 chars of [A-Za-z0-9._-])")]
    InvalidTradeId(String),

    /// Node address is not `host:port`.
    #[error("invalid node address: \"{0}\" (expected host:port)")]
    InvalidNodeAddress(String),

    /// Key ring fingerprint is not an even-length hex string.
    #[error("invalid pub key ring fingerprint: \"{0}\" (expected hex)")]
    InvalidPubKeyRing(String),
}
