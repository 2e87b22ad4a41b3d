//! Well-known per-user directories the daemon persists state under.
//!
//! The daemon only ever needs the two directories the platform's user
//! profile already publishes, so a single `dirs`-backed implementation
//! covers every target OS; there is no installer layout to match.

use std::path::PathBuf;

use anyhow::{Context as _, Result};

const APP_DIR: &str = "goconnect";

/// Directory for `identity.json` and the TOML config file.
pub fn config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir().context("platform has no config directory")?;
    Ok(base.join(APP_DIR))
}

/// Directory for the daemon's append-only log file.
pub fn cache_dir() -> Result<PathBuf> {
    let base = dirs::cache_dir().context("platform has no cache directory")?;
    Ok(base.join(APP_DIR))
}
