//! Bootstrap utilities for stashflow hosts.
//!
//! Shared initialization code for binaries and services embedding the engine.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, ConfigError, LOG_ENV_VAR};

/// Initialize tracing with the STASHFLOW_LOG environment variable.
///
/// Defaults to "info" level if STASHFLOW_LOG is not set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Install tracing and load configuration in one call.
pub fn bootstrap(config_path: Option<&str>) -> Result<Config, ConfigError> {
    init_tracing();
    let config = Config::load(config_path)?;
    tracing::info!(
        storage = ?config.storage.storage_type,
        max_content_length = config.operations.max_content_length,
        "Configuration loaded"
    );
    Ok(config)
}
