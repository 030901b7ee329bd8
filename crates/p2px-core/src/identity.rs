//! # Identity Newtypes
//!
//! Domain-primitive newtypes for the identifiers the mediation protocol
//! passes around. Each identifier is a distinct type; you cannot pass a
//! [`MessageUid`] where a [`TradeId`] is expected.
//!
//! ## Validation
//!
//! String-based identifiers ([`TradeId`], [`NodeAddress`], [`PubKeyRing`])
//! validate format at construction time and again when deserialized from a
//! peer, so a malformed identifier never reaches the protocol engine.
//! [`MessageUid`] is UUID-based and always valid by construction.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

// ---------------------------------------------------------------------------
// UUID-based identifiers (always valid by construction)
// ---------------------------------------------------------------------------

/// Unique identifier of a single protocol message.
///
/// Retry bookkeeping and acknowledgements are keyed by this value, so two
/// deliveries of the same message carry the same uid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageUid(Uuid);

impl MessageUid {
    /// Create a new random message identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a message identifier from an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Access the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MessageUid {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageUid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// String-based identifiers (validated at construction)
// ---------------------------------------------------------------------------

/// Identifier shared by an offer and the trade taken from it.
///
/// An offer that has not been taken yet and the trade created from it carry
/// the same id, which is why a dispute result can fall back to closing an
/// open offer when no trade exists.
///
/// # Validation
///
/// - Non-empty, at most 128 characters
/// - ASCII alphanumerics, `-`, `_` and `.` only
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TradeId(String);

impl TradeId {
    /// Create a trade identifier, validating format.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidTradeId`] if the value is empty, too
    /// long, or contains characters outside the allowed set.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let s = value.into();
        let valid = !s.is_empty()
            && s.len() <= 128
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(ValidationError::InvalidTradeId(s));
        }
        Ok(Self(s))
    }

    /// Access the identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TradeId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TradeId> for String {
    fn from(id: TradeId) -> Self {
        id.0
    }
}

impl std::fmt::Display for TradeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Network address of a peer or mediator: `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeAddress(String);

impl NodeAddress {
    /// Create a node address, validating the `host:port` shape.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidNodeAddress`] if the host part is
    /// empty or the port is not a valid non-zero `u16`.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let s = value.into();
        let valid = match s.rsplit_once(':') {
            Some((host, port)) => {
                !host.is_empty() && port.parse::<u16>().map(|p| p != 0).unwrap_or(false)
            }
            None => false,
        };
        if !valid {
            return Err(ValidationError::InvalidNodeAddress(s));
        }
        Ok(Self(s))
    }

    /// The loopback address on `port`.
    pub fn localhost(port: std::num::NonZeroU16) -> Self {
        Self(format!("localhost:{port}"))
    }

    /// The full `host:port` string.
    pub fn full_address(&self) -> &str {
        &self.0
    }

    /// The host part of the address.
    pub fn host(&self) -> &str {
        self.0.rsplit_once(':').map(|(h, _)| h).unwrap_or(&self.0)
    }

    /// The port part of the address.
    pub fn port(&self) -> u16 {
        self.0
            .rsplit_once(':')
            .and_then(|(_, p)| p.parse().ok())
            .unwrap_or_default()
    }
}

impl TryFrom<String> for NodeAddress {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NodeAddress> for String {
    fn from(addr: NodeAddress) -> Self {
        addr.0
    }
}

impl std::fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to a participant's public key ring, as a hex fingerprint.
///
/// Acknowledgements are addressed to a key ring rather than a network
/// address so they survive a peer changing its onion address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PubKeyRing(String);

impl PubKeyRing {
    /// Create a key ring reference from a hex fingerprint.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidPubKeyRing`] if the value is empty,
    /// has odd length, or contains non-hex characters.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let s = value.into();
        let valid =
            !s.is_empty() && s.len() % 2 == 0 && s.chars().all(|c| c.is_ascii_hexdigit());
        if !valid {
            return Err(ValidationError::InvalidPubKeyRing(s));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// The lowercase hex fingerprint.
    pub fn fingerprint(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PubKeyRing {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PubKeyRing> for String {
    fn from(key: PubKeyRing) -> Self {
        key.0
    }
}

impl std::fmt::Display for PubKeyRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
