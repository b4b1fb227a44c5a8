//! Configuration display.

use crate::cli::icons::{dim_arrow, info};
use newsacquire::config::{Config, Settings};

/// Print the effective settings after file and environment overrides.
pub fn cmd_config_show(settings: &Settings, config: &Config) -> anyhow::Result<()> {
    let source = config
        .source_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "defaults (no config file found)".to_string());

    let hash = config.hash();
    eprintln!("{} Effective configuration", info());
    eprintln!("  {} Source: {}", dim_arrow(), source);
    eprintln!("  {} Hash: {}", dim_arrow(), &hash[..16]);

    println!("{}", serde_json::to_string_pretty(settings)?);
    Ok(())
}
