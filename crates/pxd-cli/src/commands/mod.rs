//! Command handlers for the `pxd` CLI. Shared helpers live here.

pub mod simulate;

use anyhow::Result;
use pxd_config::{ConfigMode, LoadedConfig};

pub fn parse_config_mode(mode: &str) -> Result<ConfigMode> {
    match mode.trim().to_uppercase().as_str() {
        "DAEMON" => Ok(ConfigMode::Daemon),
        "SIMULATE" => Ok(ConfigMode::Simulate),
        other => anyhow::bail!(
            "invalid --mode '{}'. expected one of: DAEMON | SIMULATE",
            other
        ),
    }
}

/// Load layered config, or the built-in defaults when no path is given.
pub fn load_config(paths: &[String]) -> Result<LoadedConfig> {
    if paths.is_empty() {
        pxd_config::load_layered_yaml_from_strings(&[])
    } else {
        pxd_config::load_layered_yaml(paths)
    }
}
