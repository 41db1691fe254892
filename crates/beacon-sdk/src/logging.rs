//! Tracing subscriber setup
//!
//! `RUST_LOG` takes precedence over `logging.level`.

use beacon_core::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

use crate::error::SdkError;

fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Installs the global `fmt` subscriber, as JSON when `logging.json` is set
///
/// Fails if a global subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<(), SdkError> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(config))
        .with_target(true);

    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    result.map_err(|e| SdkError::Logging(e.to_string()))
}
