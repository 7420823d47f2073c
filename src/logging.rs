// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Process-wide `tracing` subscriber installed from `LoggingConfig`.
//!
//! `RUST_LOG` takes precedence over the configured level. A subscriber that
//! is already installed is kept, so a reload never fails on logging.

use crate::{
    config::{LogFormat, LoggingConfig},
    errors::ServiceError,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Installing twice is
/// not an error: the first subscriber stays in place.
///
/// # Parameters
/// * `cfg` - Level and output format
pub fn install(cfg: &LoggingConfig) -> Result<(), ServiceError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&cfg.level)
            .map_err(|err| ServiceError::Logging(format!("invalid level `{}`: {err}", cfg.level)))?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match cfg.format {
        LogFormat::Full => builder.try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    match installed {
        Ok(()) => info!(logger = cfg.logger_name, "logging installed"),
        Err(err) => debug!(error = err.to_string(), "keeping the installed subscriber"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(level: &str) -> LoggingConfig {
        LoggingConfig {
            logger_name: "broker".to_owned(),
            level: level.to_owned(),
            format: LogFormat::Compact,
        }
    }

    #[test]
    fn installing_twice_is_not_an_error() {
        install(&config("debug")).unwrap();
        install(&config("info")).unwrap();
    }
}
