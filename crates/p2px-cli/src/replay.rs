//! # Replay Subcommand

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use p2px_node::replay_file;

/// Arguments for `p2px replay`.
#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Scenario file (JSON).
    pub scenario: PathBuf,

    /// Write the report here instead of stdout.
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

/// Run the scenario and emit its report.
pub fn run_replay(args: &ReplayArgs) -> Result<u8> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    let report = runtime
        .block_on(replay_file(&args.scenario))
        .with_context(|| format!("replay of {} failed", args.scenario.display()))?;

    let json = serde_json::to_string_pretty(&report)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("cannot write {}", path.display()))?;
            println!("wrote: {}", path.display());
        }
        None => println!("{json}"),
    }

    let failed = report
        .steps
        .iter()
        .filter(|s| s.outcome.starts_with("error:"))
        .count();
    if failed > 0 {
        tracing::warn!(failed, "some replay steps reported errors");
    }
    Ok(0)
}
