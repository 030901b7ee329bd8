//! # Acknowledgement Channel
//!
//! After processing a message the engine tells its originator whether it
//! succeeded. Sending is fire-and-forget: delivery failures belong to the
//! transport and are never reported back.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use p2px_core::{MessageUid, PubKeyRing, TradeId};

/// Which subsystem an acknowledgement comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AckMessageSourceType {
    /// Mediation support messages.
    MediationMessage,
    /// Arbitration support messages.
    ArbitrationMessage,
    /// Refund agent support messages.
    RefundMessage,
    /// Trade chat messages.
    TradeChatMessage,
}

/// A delivery acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckMessage {
    /// Source subsystem tag.
    pub source_type: AckMessageSourceType,
    /// Uid of the acknowledged message.
    pub source_uid: MessageUid,
    /// Trade the acknowledged message concerns.
    pub trade_id: TradeId,
    /// Recipient key ring.
    pub recipient: PubKeyRing,
    /// Whether processing succeeded.
    pub success: bool,
    /// Error description when `success` is false.
    pub error_message: Option<String>,
}

/// Outbound acknowledgement sink.
pub trait AckSender: Send {
    /// Send `ack`. Never blocks on delivery.
    fn send_ack(&mut self, ack: AckMessage);
}

/// Collects every acknowledgement. Clones share the log.
#[derive(Debug, Clone, Default)]
pub struct RecordingAckSender {
    sent: Arc<Mutex<Vec<AckMessage>>>,
}

impl RecordingAckSender {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// All acknowledgements sent so far.
    pub fn sent(&self) -> Vec<AckMessage> {
        self.sent.lock().clone()
    }

    /// Acknowledgements for one source message.
    pub fn sent_for(&self, uid: MessageUid) -> Vec<AckMessage> {
        self.sent
            .lock()
            .iter()
            .filter(|a| a.source_uid == uid)
            .cloned()
            .collect()
    }
}

impl AckSender for RecordingAckSender {
    fn send_ack(&mut self, ack: AckMessage) {
        self.sent.lock().push(ack);
    }
}

/// Logs each acknowledgement and drops it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingAckSender;

impl AckSender for LoggingAckSender {
    fn send_ack(&mut self, ack: AckMessage) {
        tracing::info!(
            trade_id = %ack.trade_id,
            uid = %ack.source_uid,
            recipient = %ack.recipient,
            success = ack.success,
            error = ack.error_message.as_deref().unwrap_or(""),
            "sending ack"
        );
    }
}
