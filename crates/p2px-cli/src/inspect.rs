//! # Inspect Subcommand
//!
//! Prints a one-line summary per dispute and per trade from the JSON
//! snapshots a node keeps in its data directory.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use p2px_node::JsonSnapshotStore;
use p2px_state::TradeBook;
use p2px_support::Dispute;

/// Arguments for `p2px inspect`.
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Data directory. Defaults to the configured one.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Print JSON instead of text.
    #[arg(long)]
    pub json: bool,
}

/// Summary of one dispute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisputeSummary {
    pub trade_id: String,
    pub support_type: String,
    pub closed: bool,
    pub has_result: bool,
    pub chat_messages: usize,
}

impl From<&Dispute> for DisputeSummary {
    fn from(d: &Dispute) -> Self {
        Self {
            trade_id: d.trade_id.to_string(),
            support_type: format!("{:?}", d.support_type),
            closed: d.is_closed(),
            has_result: d.dispute_result().is_some(),
            chat_messages: d.chat_messages().len(),
        }
    }
}

/// Summary of one trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TradeSummary {
    pub trade_id: String,
    pub phase: String,
    pub dispute_state: String,
    pub mediation_result_state: String,
    pub closed: bool,
}

/// Everything `inspect` reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Inspection {
    pub disputes: Vec<DisputeSummary>,
    pub trades: Vec<TradeSummary>,
    pub open_offers: usize,
}

/// Build the summary from snapshots.
pub fn summarize(disputes: &[Dispute], book: &TradeBook) -> Inspection {
    let trades = book
        .trades
        .iter()
        .map(|t| (t, false))
        .chain(book.closed_trades.iter().map(|t| (t, true)))
        .map(|(t, closed)| TradeSummary {
            trade_id: t.id.to_string(),
            phase: t.phase.as_str().to_string(),
            dispute_state: t.dispute_state.as_str().to_string(),
            mediation_result_state: t.mediation_result_state.as_str().to_string(),
            closed,
        })
        .collect();
    Inspection {
        disputes: disputes.iter().map(DisputeSummary::from).collect(),
        trades,
        open_offers: book.open_offers.len(),
    }
}

/// Load the snapshots under the data directory and print their summary.
pub fn run_inspect(args: &InspectArgs, default_dir: PathBuf) -> Result<u8> {
    let dir = args.data_dir.clone().unwrap_or(default_dir);
    let store = JsonSnapshotStore::open(&dir)
        .with_context(|| format!("cannot open data directory {}", dir.display()))?;
    let inspection = summarize(&store.load_disputes()?, &store.load_trade_book()?);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&inspection)?);
        return Ok(0);
    }
    println!("disputes: {}", inspection.disputes.len());
    for d in &inspection.disputes {
        println!(
            "  {}  {}  closed={} result={} chat={}",
            d.trade_id, d.support_type, d.closed, d.has_result, d.chat_messages
        );
    }
    println!("trades: {}", inspection.trades.len());
    for t in &inspection.trades {
        println!(
            "  {}  {}  {}  {}{}",
            t.trade_id,
            t.phase,
            t.dispute_state,
            t.mediation_result_state,
            if t.closed { "  (closed)" } else { "" }
        );
    }
    println!("open offers: {}", inspection.open_offers);
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_data_dir_summarizes_to_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let args = InspectArgs {
            data_dir: Some(dir.path().to_path_buf()),
            json: true,
        };
        assert_eq!(run_inspect(&args, PathBuf::from("unused")).unwrap(), 0);
        let inspection = summarize(&[], &TradeBook::default());
        assert!(inspection.disputes.is_empty());
        assert_eq!(inspection.open_offers, 0);
    }
}
