// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Process-wide configuration read from environment variables.

use std::env::{self, VarError};
use std::time::Duration;

use derive_builder::Builder;
use log::LevelFilter;
use runtime_transport::StopSignal;
use thiserror::Error;

const ENV_LOG_LEVEL: &str = "LOG_LEVEL";
const ENV_MAX_REQUESTS: &str = "MAX_REQUESTS";
const ENV_STOP_SIGNAL: &str = "STOP_SIGNAL";
const ENV_REQUEST_TIMEOUT: &str = "REQUEST_TIMEOUT";

/// Error reading [`Configuration`] from the environment.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct ConfigError(#[from] ConfigErrorKind);

#[derive(Debug, Error)]
enum ConfigErrorKind {
    #[error("environment variable {0} is not valid UTF-8")]
    NotUnicode(String),
    #[error("environment variable {name} has an invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(name: &'static str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigErrorKind::Invalid {
            name,
            value: value.into(),
            reason: reason.into(),
        }
        .into()
    }
}

/// Process-wide options, created once at startup and never mutated.
///
/// Built either from the environment via [`Configuration::from_env`] (the normal path for a
/// deployed function), or programmatically via [`ConfigurationBuilder`] for embedding tests and
/// local invocation harnesses.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into, strip_option))]
pub struct Configuration {
    /// Logger verbosity. Defaults to [`LevelFilter::Info`].
    #[builder(default = "LevelFilter::Info")]
    pub log_level: LevelFilter,
    /// Cycle bound; the loop drains cleanly after this many successful cycles. `None` means
    /// unbounded.
    #[builder(default = "None")]
    pub max_requests: Option<u64>,
    /// Signal that triggers draining, in addition to `SIGINT`. Defaults to `TERM`.
    #[builder(default)]
    pub stop_signal: StopSignal,
    /// Per control-plane call timeout. `None` means unbounded.
    #[builder(default = "None")]
    pub request_timeout: Option<Duration>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            log_level: LevelFilter::Info,
            max_requests: None,
            stop_signal: StopSignal::default(),
            request_timeout: None,
        }
    }
}

impl Configuration {
    /// Read configuration from the process environment (`LOG_LEVEL`, `MAX_REQUESTS`,
    /// `STOP_SIGNAL`, `REQUEST_TIMEOUT`), falling back to defaults for anything unset.
    ///
    /// # Errors
    /// Returns [`ConfigError`] if a recognized variable is set to a value that cannot be parsed
    /// into its expected type.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = string_from_environment(ENV_LOG_LEVEL)? {
            config.log_level = raw
                .parse()
                .map_err(|_| ConfigError::invalid(ENV_LOG_LEVEL, &raw, "not a recognized log level"))?;
        }

        if let Some(raw) = string_from_environment(ENV_MAX_REQUESTS)? {
            let parsed: u64 = raw
                .parse()
                .map_err(|_| ConfigError::invalid(ENV_MAX_REQUESTS, &raw, "not a positive integer"))?;
            if parsed == 0 {
                return Err(ConfigError::invalid(ENV_MAX_REQUESTS, &raw, "not a positive integer"));
            }
            config.max_requests = Some(parsed);
        }

        if let Some(raw) = string_from_environment(ENV_STOP_SIGNAL)? {
            config.stop_signal = raw
                .parse()
                .map_err(|_| ConfigError::invalid(ENV_STOP_SIGNAL, &raw, "not a recognized signal name"))?;
        }

        if let Some(raw) = string_from_environment(ENV_REQUEST_TIMEOUT)? {
            let millis: u64 = raw
                .parse()
                .map_err(|_| ConfigError::invalid(ENV_REQUEST_TIMEOUT, &raw, "not a positive integer"))?;
            config.request_timeout = Some(Duration::from_millis(millis));
        }

        Ok(config)
    }
}

fn string_from_environment(key: &str) -> Result<Option<String>, ConfigError> {
    match env::var(key) {
        Ok(value) => Ok(Some(value)),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(ConfigErrorKind::NotUnicode(key.to_string()))?,
    }
}
