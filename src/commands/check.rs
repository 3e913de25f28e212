use anyhow::Result;
use std::path::Path;

use super::load_config;

/// Load, validate and print the effective configuration
pub fn check_config(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    config.validate()?;

    println!("{}", toml::to_string_pretty(&config)?);
    println!("Configuration is valid ({} sources).", config.upstream.sources.len());
    Ok(())
}
