//! Logging initialisation.
//!
//! The library only emits `tracing` events. Binaries call [`init_logging`]
//! once at startup to install a subscriber.

use thiserror::Error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable that overrides the requested level.
pub const LOG_ENV: &str = "RUST_LOG";

/// Failure to install the global subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The level or directive string could not be parsed.
    #[error("Invalid log filter '{filter}': {message}")]
    InvalidFilter {
        /// The rejected filter.
        filter: String,
        /// Parser message.
        message: String,
    },

    /// A global subscriber is already installed.
    #[error("Logging already initialised: {0}")]
    AlreadyInitialised(String),
}

/// Builds the filter: `RUST_LOG` when set, `level` otherwise.
pub fn build_filter(level: &str) -> Result<EnvFilter, LoggingError> {
    if let Ok(filter) = EnvFilter::try_from_env(LOG_ENV) {
        return Ok(filter);
    }
    parse_filter(level)
}

fn parse_filter(level: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_new(level).map_err(|err| LoggingError::InvalidFilter {
        filter: level.to_string(),
        message: err.to_string(),
    })
}

/// Installs a registry with an [`EnvFilter`] and a plain or JSON formatter.
pub fn init_logging(level: &str, json: bool) -> Result<(), LoggingError> {
    let filter = build_filter(level)?;
    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry.with(fmt::layer().json().with_target(true)).try_init()
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()
    };
    result.map_err(|err| LoggingError::AlreadyInitialised(err.to_string()))
}
