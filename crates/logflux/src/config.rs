// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::time::Duration;

use crate::errors::ConfigError;

pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Process-wide collector settings, read from `LOGFLUX_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorConfig {
    /// Capacity of the shared fan-in queue
    pub queue_capacity: usize,
    /// File tail poll interval
    pub poll_interval: Duration,
    /// Time allowed for sources to wind down once shutdown is requested
    pub shutdown_grace: Duration,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            log_level: "info".to_string(),
        }
    }
}

impl CollectorConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let queue_capacity = match lookup("LOGFLUX_QUEUE_CAPACITY") {
            Some(val) => parse_number::<usize>("LOGFLUX_QUEUE_CAPACITY", &val)?,
            None => defaults.queue_capacity,
        };
        let poll_interval = match lookup("LOGFLUX_POLL_INTERVAL_MS") {
            Some(val) => Duration::from_millis(parse_number("LOGFLUX_POLL_INTERVAL_MS", &val)?),
            None => defaults.poll_interval,
        };
        let shutdown_grace = match lookup("LOGFLUX_SHUTDOWN_GRACE_MS") {
            Some(val) => {
                Duration::from_millis(parse_number("LOGFLUX_SHUTDOWN_GRACE_MS", &val)?)
            }
            None => defaults.shutdown_grace,
        };
        let log_level = lookup("LOGFLUX_LOG_LEVEL")
            .map(|val| val.trim().to_lowercase())
            .unwrap_or(defaults.log_level);

        let config = Self {
            queue_capacity,
            poll_interval,
            shutdown_grace,
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "LOGFLUX_QUEUE_CAPACITY must be greater than 0".to_string(),
            ));
        }

        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "LOGFLUX_POLL_INTERVAL_MS must be greater than 0".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, val: &str) -> Result<T, ConfigError> {
    val.trim()
        .parse::<T>()
        .map_err(|_| ConfigError::Invalid(format!("{key} must be a non-negative integer, got '{val}'")))
}
