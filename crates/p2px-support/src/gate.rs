//! # Message Gate
//!
//! Capability check run before any message is dispatched. A rejected message
//! causes no state change.

use crate::chat::SupportType;
use crate::message::SupportMessage;

/// Pre-dispatch capability and authorization check.
pub trait MessageGate: Send {
    /// Whether the engine may process `message`.
    fn can_process(&self, message: &SupportMessage) -> bool;
}

/// Accepts messages of one support type. Messages without a support type
/// pass, so the dispatcher can log and drop them itself.
#[derive(Debug, Clone, Copy)]
pub struct SupportTypeGate {
    support_type: SupportType,
}

impl SupportTypeGate {
    /// Gate for `support_type`.
    pub fn new(support_type: SupportType) -> Self {
        Self { support_type }
    }
}

impl MessageGate for SupportTypeGate {
    fn can_process(&self, message: &SupportMessage) -> bool {
        message
            .support_type()
            .map_or(true, |t| t == self.support_type)
    }
}
