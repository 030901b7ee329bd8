//! # p2px-cli: Command Line for the Mediation Stack
//!
//! - `p2px replay <scenario.json>`: run a scripted scenario on a virtual
//!   clock and print the resulting state as JSON.
//! - `p2px inspect`: summarize the dispute and trade snapshots in a data
//!   directory.
//! - `p2px config`: print the effective node configuration.
//!
//! Subcommands return an exit code; errors propagate as `anyhow::Error`.

pub mod config;
pub mod inspect;
pub mod replay;
