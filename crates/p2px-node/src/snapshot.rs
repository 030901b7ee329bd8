//! # JSON Snapshots
//!
//! Disputes and the trade book are written as two pretty-printed JSON files
//! in the data directory. Each write goes to a sibling temp file first and is
//! renamed over the target, so a crash never leaves a half-written snapshot.
//!
//! The I/O is synchronous. [`crate::persist::Persister`] calls it from the
//! node task between events; each file holds one entry per live trade or
//! dispute.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use p2px_state::TradeBook;
use p2px_support::Dispute;

use crate::error::NodeError;

const DISPUTES_FILE: &str = "disputes.json";
const TRADES_FILE: &str = "trades.json";

/// Reads and writes node snapshots under one directory.
#[derive(Debug, Clone)]
pub struct JsonSnapshotStore {
    dir: PathBuf,
}

impl JsonSnapshotStore {
    /// Use `dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Io`] if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, NodeError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// The snapshot directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load stored disputes. A missing file yields none.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_disputes(&self) -> Result<Vec<Dispute>, NodeError> {
        Ok(self.read(DISPUTES_FILE)?.unwrap_or_default())
    }

    /// Load the stored trade book. A missing file yields an empty book.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_trade_book(&self) -> Result<TradeBook, NodeError> {
        Ok(self.read(TRADES_FILE)?.unwrap_or_default())
    }

    /// Replace the disputes snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save_disputes(&self, disputes: &[Dispute]) -> Result<(), NodeError> {
        self.write(DISPUTES_FILE, &disputes)
    }

    /// Replace the trade book snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save_trades(&self, book: &TradeBook) -> Result<(), NodeError> {
        self.write(TRADES_FILE, book)
    }

    fn read<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, NodeError> {
        let path = self.dir.join(name);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn write<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<(), NodeError> {
        let json = serde_json::to_string_pretty(value)?;
        let target = self.dir.join(name);
        let tmp = self.dir.join(format!("{name}.tmp"));
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &target)?;
        tracing::debug!(path = %target.display(), "snapshot written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p2px_core::{Coin, NodeAddress, PubKeyRing, Timestamp, TradeId};
    use p2px_state::{OpenOffer, Price, Trade, TradeTerms, TradingPeer};
    use p2px_support::{DisputeParties, SupportType};

    fn dispute(id: &str) -> Dispute {
        Dispute::new(
            TradeId::new(id).unwrap(),
            SupportType::Mediation,
            true,
            DisputeParties {
                trader_pub_key_ring: PubKeyRing::new("aa01").unwrap(),
                agent_pub_key_ring: PubKeyRing::new("bb02").unwrap(),
                agent_node_address: Some(NodeAddress::new("mediator.onion:9999").unwrap()),
                peer_node_address: NodeAddress::new("peer.onion:9999").unwrap(),
            },
            Timestamp::from_millis(1_700_000_000_000),
        )
    }

    fn trade(id: &str) -> Trade {
        Trade::new(
            TradeId::new(id).unwrap(),
            TradeTerms {
                take_offer_date: Timestamp::from_millis(1_700_000_000_000),
                is_buy_offer: true,
                is_my_offer: false,
                amount: Coin::from_sat(1_000_000),
                price: Price {
                    value: 300_000_000,
                    currency_code: "EUR".into(),
                },
                volume: None,
                maker_fee: Coin::from_sat(1_500),
                is_currency_for_maker_fee_btc: true,
                maker_tx_fee: Coin::from_sat(500),
                taker_fee: Coin::from_sat(3_000),
                is_currency_for_taker_fee_btc: true,
                trade_tx_fee: Coin::from_sat(500),
            },
            TradingPeer {
                node_address: NodeAddress::new("peer.onion:9999").unwrap(),
                pub_key_ring: PubKeyRing::new("cc03").unwrap(),
                mediated_payout_tx_signature: None,
            },
        )
    }

    #[test]
    fn missing_files_load_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSnapshotStore::open(dir.path().join("data")).unwrap();
        assert!(store.load_disputes().unwrap().is_empty());
        assert_eq!(store.load_trade_book().unwrap(), TradeBook::default());
    }

    #[test]
    fn disputes_and_trades_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSnapshotStore::open(dir.path()).unwrap();
        store.save_disputes(&[dispute("T1"), dispute("T2")]).unwrap();
        let book = TradeBook {
            trades: vec![trade("T1")],
            closed_trades: vec![],
            open_offers: vec![OpenOffer::new(TradeId::new("O1").unwrap())],
        };
        store.save_trades(&book).unwrap();

        let reopened = JsonSnapshotStore::open(dir.path()).unwrap();
        let disputes = reopened.load_disputes().unwrap();
        assert_eq!(disputes.len(), 2);
        assert_eq!(disputes[1].trade_id.as_str(), "T2");
        assert_eq!(reopened.load_trade_book().unwrap(), book);
        assert!(!dir.path().join("trades.json.tmp").exists());
    }

    #[test]
    fn corrupt_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("disputes.json"), "{not json").unwrap();
        let store = JsonSnapshotStore::open(dir.path()).unwrap();
        assert!(matches!(store.load_disputes(), Err(NodeError::Json(_))));
    }
}
