//! Diagnostic logging setup.
//!
//! Installs a `tracing` subscriber that writes to stderr, so protocol traces
//! never mix with the chat output on stdout.

use crate::config::LoggingConfig;
use anyhow::{anyhow, Result};
use std::str::FromStr;
use tracing::Level;

/// Parse a level name; accepts any case.
pub fn parse_level(name: &str) -> Option<Level> {
    Level::from_str(name.trim()).ok()
}

pub fn init(config: &LoggingConfig) -> Result<()> {
    let level = parse_level(&config.level)
        .ok_or_else(|| anyhow!("unknown log level {:?}", config.level))?;
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow!("failed to install logger: {e}"))
}
