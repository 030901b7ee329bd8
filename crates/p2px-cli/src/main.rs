//! # p2px CLI entry point
//!
//! Parses command-line arguments, initializes tracing and dispatches to the
//! subcommand handlers in the library.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use p2px_cli::config::{load_config, run_config, ConfigArgs};
use p2px_cli::inspect::{run_inspect, InspectArgs};
use p2px_cli::replay::{run_replay, ReplayArgs};

/// P2PX mediation toolchain.
///
/// Replays mediation scenarios deterministically and inspects the state a
/// mediation node keeps on disk.
#[derive(Parser, Debug)]
#[command(name = "p2px", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    /// Path to the node configuration file (YAML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a mediation scenario on a virtual clock and print the result.
    Replay(ReplayArgs),

    /// Summarize the dispute and trade snapshots in a data directory.
    Inspect(InspectArgs),

    /// Print the effective node configuration.
    Config(ConfigArgs),
}

fn init_tracing(verbose: u8, json: bool) {
    // RUST_LOG wins over -v.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        })
    });
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "p2px CLI starting");

    let result = match &cli.command {
        Commands::Replay(args) => run_replay(args),
        Commands::Inspect(args) => load_config(cli.config.as_deref())
            .and_then(|config| run_inspect(args, config.data_dir)),
        Commands::Config(args) => run_config(args, cli.config.as_deref()),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}
