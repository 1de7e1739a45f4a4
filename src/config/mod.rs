// src/config/mod.rs
mod models;

pub use models::*;

use anyhow::{bail, Context, Result};
use std::path::Path;

/// Load configuration from a file (YAML or JSON)
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    let config: Config = if path.extension().and_then(|s| s.to_str()) == Some("yaml")
        || path.extension().and_then(|s| s.to_str()) == Some("yml") {
        serde_yaml::from_str(&contents).context("Failed to parse YAML config")?
    } else {
        serde_json::from_str(&contents).context("Failed to parse JSON config")?
    };

    config.validate()?;
    Ok(config)
}

/// Parse the health-check interval given on the command line, in seconds.
pub fn parse_health_check_interval(raw: &str) -> Result<u64> {
    let secs: u64 = raw
        .trim()
        .parse()
        .with_context(|| format!("Invalid health check interval {:?}: expected a positive integer (seconds)", raw))?;

    if secs == 0 {
        bail!("Invalid health check interval {:?}: must be greater than zero", raw);
    }
    Ok(secs)
}

/// Build the runtime configuration from command line arguments:
/// `<health-check-interval-secs> [config-file]`.
pub async fn from_args<I>(mut args: I) -> Result<Config>
where
    I: Iterator<Item = String>,
{
    let interval = match args.next() {
        Some(raw) => parse_health_check_interval(&raw)?,
        None => bail!("Missing required argument: <health-check-interval-secs> [config-file]"),
    };

    let mut config = match args.next() {
        Some(path) => load_config(&path).await?,
        None => Config::default(),
    };

    config.health_check.interval_secs = interval;
    config.validate()?;
    Ok(config)
}
