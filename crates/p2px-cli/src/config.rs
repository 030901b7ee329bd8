//! # Config Subcommand
//!
//! Loads the node configuration the way the node does (file, then
//! environment overrides) and prints it as YAML.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use p2px_node::NodeConfig;

/// Arguments for `p2px config`.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Only validate; print nothing on success.
    #[arg(long)]
    pub check: bool,
}

/// Load the effective configuration. `path` is optional; without it the
/// defaults plus environment overrides apply.
pub fn load_config(path: Option<&Path>) -> Result<NodeConfig> {
    let config = match path {
        Some(path) => NodeConfig::load(path)
            .with_context(|| format!("cannot load {}", path.display()))?,
        None => NodeConfig::default(),
    };
    let config = config.apply_env()?;
    config.validate()?;
    Ok(config)
}

/// Print or check the effective configuration.
pub fn run_config(args: &ConfigArgs, path: Option<&Path>) -> Result<u8> {
    let config = load_config(path)?;
    if args.check {
        tracing::info!("configuration is valid");
        return Ok(0);
    }
    print!("{}", serde_yaml::to_string(&config)?);
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.yaml");
        std::fs::write(&path, "node_address: mediator.onion:9999\n").unwrap();
        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.node_address.full_address(), "mediator.onion:9999");
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("nope.yaml"))).is_err());
    }
}
