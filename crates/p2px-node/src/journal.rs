//! # Trade Phase Journal
//!
//! Writes a JSON record of every trade phase change for external
//! notification tooling. For each trade three files live under the journal
//! directory:
//!
//! - `<id>.trade.json`: the trade's terms and current phase
//! - `<id>.phases.json`: `{"phases": [{"date": ms, "phase": NAME}, ...]}`
//! - `<id>.cli-output.json`: written by the notification command, if any
//!
//! After each trade write the notification command runs as
//! `<cli> <trade.json> <cli-output.json>`. It gets a bounded wait; a command
//! that overruns is logged and left running. Once a trade reaches
//! `PAYOUT_PUBLISHED` its files move to `backup/`.
//!
//! Phase changes reach the journal through a [`JournalFeed`], which queues
//! them for one worker task so each trade's history is written in the order
//! the changes happened.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use p2px_core::Timestamp;
use p2px_state::{Trade, TradePhase, TradePhaseListener};

use crate::error::NodeError;

/// Environment variable naming the notification command.
pub const NOTIFICATION_CLI_ENV: &str = "TRADE_NOTIFICATION_CLI";

/// The flat trade record handed to the notification command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRecord {
    pub id: String,
    pub trade_phase: TradePhase,
    pub take_offer_date: i64,
    pub buy_offer: bool,
    pub my_offer: bool,
    pub amount_satoshi: u64,
    pub price_value: i64,
    pub price_currency_code: String,
    /// `-1` when the trade has no volume.
    pub volume: i64,
    pub maker_fee: u64,
    pub currency_for_maker_fee_btc: bool,
    pub maker_tx_fee: u64,
    pub taker_fee: u64,
    pub currency_for_taker_fee_btc: bool,
    pub taker_tx_fee: u64,
}

impl From<&Trade> for TradeRecord {
    fn from(trade: &Trade) -> Self {
        let terms = &trade.terms;
        Self {
            id: trade.id.as_str().to_string(),
            trade_phase: trade.phase,
            take_offer_date: terms.take_offer_date.as_millis(),
            buy_offer: terms.is_buy_offer,
            my_offer: terms.is_my_offer,
            amount_satoshi: terms.amount.value(),
            price_value: terms.price.value,
            price_currency_code: terms.price.currency_code.clone(),
            volume: terms.volume.unwrap_or(-1),
            maker_fee: terms.maker_fee.value(),
            currency_for_maker_fee_btc: terms.is_currency_for_maker_fee_btc,
            maker_tx_fee: terms.maker_tx_fee.value(),
            taker_fee: terms.taker_fee.value(),
            currency_for_taker_fee_btc: terms.is_currency_for_taker_fee_btc,
            taker_tx_fee: terms.trade_tx_fee.value(),
        }
    }
}

/// One entry of a trade's phase history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseEntry {
    /// Milliseconds since the Unix epoch.
    pub date: i64,
    pub phase: TradePhase,
}

/// A trade's phase history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradePhases {
    pub phases: Vec<PhaseEntry>,
}

/// A notification command whose program exists and is executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliLocator {
    program: PathBuf,
    args: Vec<String>,
}

impl CliLocator {
    /// Parse a space-separated command line. Returns `None` if it is blank or
    /// its first token is not an executable file.
    pub fn resolve(command: &str) -> Option<Self> {
        let mut tokens = command.split_whitespace();
        let program = PathBuf::from(tokens.next()?);
        if !is_executable(&program) {
            tracing::warn!(program = %program.display(), "notification command is not executable, ignored");
            return None;
        }
        Some(Self {
            program,
            args: tokens.map(str::to_string).collect(),
        })
    }

    /// Resolve from [`NOTIFICATION_CLI_ENV`].
    pub fn from_env() -> Option<Self> {
        std::env::var(NOTIFICATION_CLI_ENV)
            .ok()
            .and_then(|raw| Self::resolve(&raw))
    }

    /// The program path.
    pub fn program(&self) -> &Path {
        &self.program
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path).is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

struct Inner {
    dir: PathBuf,
    backup: PathBuf,
    cli: Option<CliLocator>,
    cli_timeout: Duration,
    writes: tokio::sync::Mutex<()>,
}

/// Journals trade phase changes. Clones share the directory and write lock.
#[derive(Clone)]
pub struct TradeJournal {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TradeJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradeJournal")
            .field("dir", &self.inner.dir)
            .field("cli", &self.inner.cli)
            .finish()
    }
}

impl TradeJournal {
    /// Journal into `dir`, creating it and its `backup/` subdirectory.
    /// `cli` falls back to [`NOTIFICATION_CLI_ENV`] when `None`.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::Io`] if a directory cannot be created.
    pub fn open(
        dir: impl Into<PathBuf>,
        cli: Option<&str>,
        cli_timeout: Duration,
    ) -> Result<Self, NodeError> {
        let dir = dir.into();
        let backup = dir.join("backup");
        std::fs::create_dir_all(&backup)?;
        let cli = match cli {
            Some(raw) => CliLocator::resolve(raw),
            None => CliLocator::from_env(),
        };
        tracing::info!(dir = %dir.display(), cli = ?cli.as_ref().map(CliLocator::program), "trade journal ready");
        Ok(Self {
            inner: Arc::new(Inner {
                dir,
                backup,
                cli,
                cli_timeout,
                writes: tokio::sync::Mutex::new(()),
            }),
        })
    }

    /// The journal directory.
    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    fn trade_file(&self, id: &str) -> String {
        format!("{id}.trade.json")
    }

    fn phases_file(&self, id: &str) -> String {
        format!("{id}.phases.json")
    }

    fn cli_output_file(&self, id: &str) -> String {
        format!("{id}.cli-output.json")
    }

    /// Start the worker that journals queued phase changes in arrival order.
    /// The worker ends once every clone of the returned feed is dropped.
    pub fn start(self, runtime: &Handle) -> (JournalFeed, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Trade>();
        let worker = runtime.spawn(async move {
            while let Some(trade) = rx.recv().await {
                if let Err(e) = self.record(&trade).await {
                    tracing::error!(trade_id = %trade.id, error = %e, "failed to journal trade phase");
                }
            }
        });
        (JournalFeed { tx }, worker)
    }

    /// Journal `trade`'s current phase.
    ///
    /// A trade file that cannot be written is logged and skips the
    /// notification command; the phase entry is still appended.
    ///
    /// # Errors
    ///
    /// Returns an error if the phase history cannot be written or the files
    /// cannot be moved. A failing notification command is logged, not
    /// returned.
    pub async fn record(&self, trade: &Trade) -> Result<(), NodeError> {
        let _guard = self.inner.writes.lock().await;
        let id = trade.id.as_str();
        let trade_path = self.inner.dir.join(self.trade_file(id));

        match self.write_trade_file(trade, &trade_path).await {
            Ok(()) => self.notify(id, &trade_path).await,
            Err(e) => tracing::error!(trade_id = id, error = %e, "failed to write trade file"),
        }

        let phases_path = self.inner.dir.join(self.phases_file(id));
        let mut phases = match tokio::fs::read_to_string(&phases_path).await {
            Ok(raw) => serde_json::from_str::<TradePhases>(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => TradePhases::default(),
            Err(e) => return Err(e.into()),
        };
        phases.phases.push(PhaseEntry {
            date: Timestamp::now().as_millis(),
            phase: trade.phase,
        });
        tokio::fs::write(&phases_path, serde_json::to_string_pretty(&phases)?).await?;
        tracing::debug!(trade_id = %trade.id, phase = %trade.phase, "trade phase journaled");

        if trade.phase == TradePhase::PayoutPublished {
            self.move_to_backup(id).await?;
        }
        Ok(())
    }

    async fn write_trade_file(&self, trade: &Trade, path: &Path) -> Result<(), NodeError> {
        let record = serde_json::to_string_pretty(&TradeRecord::from(trade))?;
        tokio::fs::write(path, record).await?;
        Ok(())
    }

    async fn notify(&self, id: &str, trade_path: &Path) {
        let Some(cli) = &self.inner.cli else {
            return;
        };
        let output = self.inner.dir.join(self.cli_output_file(id));
        let spawned = tokio::process::Command::new(&cli.program)
            .args(&cli.args)
            .arg(trade_path)
            .arg(&output)
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(trade_id = id, error = %e, "failed to start notification command");
                return;
            }
        };
        match tokio::time::timeout(self.inner.cli_timeout, child.wait()).await {
            Ok(Ok(status)) if status.success() => {}
            Ok(Ok(status)) => {
                tracing::warn!(trade_id = id, %status, "notification command failed");
            }
            Ok(Err(e)) => tracing::warn!(trade_id = id, error = %e, "notification command wait failed"),
            Err(_) => tracing::warn!(
                trade_id = id,
                timeout_ms = self.inner.cli_timeout.as_millis() as u64,
                "notification command timed out, left running"
            ),
        }
    }

    async fn move_to_backup(&self, id: &str) -> Result<(), NodeError> {
        for name in [
            self.trade_file(id),
            self.phases_file(id),
            self.cli_output_file(id),
        ] {
            let from = self.inner.dir.join(&name);
            if tokio::fs::try_exists(&from).await? {
                tokio::fs::rename(&from, self.inner.backup.join(&name)).await?;
            }
        }
        tracing::info!(trade_id = id, "trade journal moved to backup");
        Ok(())
    }
}

/// Queues phase changes for a [`TradeJournal`] worker.
#[derive(Debug, Clone)]
pub struct JournalFeed {
    tx: mpsc::UnboundedSender<Trade>,
}

impl TradePhaseListener for JournalFeed {
    fn on_phase_changed(&self, trade: &Trade, previous: TradePhase) {
        if previous >= TradePhase::PayoutPublished {
            return;
        }
        if self.tx.send(trade.clone()).is_err() {
            tracing::warn!(trade_id = %trade.id, "journal worker stopped, phase change not journaled");
        }
    }
}
