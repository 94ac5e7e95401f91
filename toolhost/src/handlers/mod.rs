//! Command handlers
//!
//! One function per CLI subcommand. Handlers print human-readable output to
//! stdout and return `anyhow` errors with context.

mod call;
mod check;
mod status;

use std::path::Path;

use anyhow::{bail, Result};

use crate::config::ProvidersConfig;

pub use call::run_call;
pub use check::run_check;
pub use status::run_status;

/// Load from an explicit path, or search the usual locations
pub fn load_config(path: Option<&Path>) -> Result<ProvidersConfig> {
    match path {
        Some(path) => ProvidersConfig::load_from_path(path),
        None => match ProvidersConfig::load()? {
            Some(config) => Ok(config),
            None => bail!(
                "No {} found. Create one or pass --config.",
                crate::config::CONFIG_FILE
            ),
        },
    }
}
