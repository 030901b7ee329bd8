//! # p2px-node: Mediation Node Runtime
//!
//! Hosts the mediation engine from `p2px-support` in a tokio process.
//!
//! - [`config`]: YAML node configuration with environment overrides.
//! - [`node`]: the single-task event loop and its [`NodeHandle`].
//! - [`scheduler`]: tokio retry timers and the payout completion sink.
//! - [`snapshot`] and [`persist`]: JSON snapshots flushed after each event.
//! - [`journal`]: per-trade phase files for external notification tooling.
//! - [`replay`]: deterministic scenario replay on a virtual clock.

pub mod config;
pub mod error;
pub mod journal;
pub mod node;
pub mod persist;
pub mod replay;
pub mod scheduler;
pub mod snapshot;

pub use config::{ConfigError, JournalConfig, NodeConfig};
pub use error::NodeError;
pub use journal::{CliLocator, JournalFeed, TradeJournal, TradeRecord};
pub use node::{Node, NodeEvent, NodeHandle, NodeParts, NodeSnapshot, TradeUpdate};
pub use persist::{DirtyFlag, Persister};
pub use replay::{replay, replay_file, ReplayReport, Scenario, ScenarioStep, StepReport};
pub use scheduler::{EventSink, TokioScheduler};
pub use snapshot::JsonSnapshotStore;
