//! Logging setup.
//!
//! Installs a `tracing` subscriber writing to stderr so that stdout stays
//! reserved for the user-facing validation messages.

use tracing::Level;

use crate::config::LoggingConfig;
use crate::errors::{LicenseError, LicenseResult};

/// Install the global subscriber if logging is enabled.
///
/// Returns `Ok(false)` when logging is disabled in configuration.
pub fn init(config: &LoggingConfig) -> LicenseResult<bool> {
    if !config.enabled {
        return Ok(false);
    }

    let level = parse_level(&config.level)?;
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| LicenseError::ConfigError(format!("failed to initialize logging: {e}")))?;

    Ok(true)
}

fn parse_level(level: &str) -> LicenseResult<Level> {
    level
        .parse::<Level>()
        .map_err(|_| LicenseError::ConfigError(format!("unknown log level '{level}'")))
}
