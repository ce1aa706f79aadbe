// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The runtime's unified error type. Wraps [`TransportError`] the way an outer crate's error type
//! wraps a lower-level dependency's: one more variant, not a re-derivation of the same taxonomy.

use runtime_transport::{ErrorReportBody, TransportError};
use thiserror::Error;

use crate::config::ConfigError;

/// Error produced anywhere in the runtime core: initialization, the control-plane client, or the
/// handler tower.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct RuntimeError(#[from] RuntimeErrorKind);

/// The kind of failure behind a [`RuntimeError`].
#[derive(Debug, Error)]
pub enum RuntimeErrorKind {
    /// Configuration could not be read from the environment.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),
    /// A control-plane HTTP call failed (transport, protocol, or timeout — the transport crate
    /// already collapses those into one type).
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The configured stop signal (or `SIGINT`) handler could not be installed.
    #[error("failed to install signal handler: {0}")]
    SignalInstall(#[from] std::io::Error),
    /// Decoding the request payload into the handler's input type failed.
    #[error("decoding error: {0}")]
    Decoding(String),
    /// Encoding the handler's output value into response bytes failed.
    #[error("encoding error: {0}")]
    Encoding(String),
    /// The user's handler returned or threw an error.
    #[error("{message}")]
    Handler { error_type: String, message: String },
}

impl From<ConfigError> for RuntimeError {
    fn from(err: ConfigError) -> Self {
        RuntimeErrorKind::Configuration(err).into()
    }
}

impl From<TransportError> for RuntimeError {
    fn from(err: TransportError) -> Self {
        RuntimeErrorKind::Transport(err).into()
    }
}

impl From<std::io::Error> for RuntimeError {
    fn from(err: std::io::Error) -> Self {
        RuntimeErrorKind::SignalInstall(err).into()
    }
}

impl RuntimeError {
    /// The kind of failure this error represents.
    #[must_use]
    pub fn kind(&self) -> &RuntimeErrorKind {
        &self.0
    }

    /// Construct a `DecodingError`.
    #[must_use]
    pub fn decoding(message: impl Into<String>) -> Self {
        RuntimeErrorKind::Decoding(message.into()).into()
    }

    /// Construct an `EncodingError`.
    #[must_use]
    pub fn encoding(message: impl Into<String>) -> Self {
        RuntimeErrorKind::Encoding(message.into()).into()
    }

    /// Construct a `HandlerError` carrying the user error's type name and message.
    #[must_use]
    pub fn handler(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        RuntimeErrorKind::Handler {
            error_type: error_type.into(),
            message: message.into(),
        }
        .into()
    }

    /// Construct a `HandlerError` from an arbitrary user error, using its Rust type name as
    /// `errorType` and its `Display` output as `errorMessage`.
    #[must_use]
    pub fn from_user_error<E: std::error::Error>(error: &E) -> Self {
        Self::handler(type_name_of(error), error.to_string())
    }

    /// Whether this error is cycle-local (`Decoding`/`Encoding`/`Handler`) and should always be
    /// surfaced via `reportError` without ending the loop.
    #[must_use]
    pub fn is_cycle_local(&self) -> bool {
        matches!(
            self.0,
            RuntimeErrorKind::Decoding(_) | RuntimeErrorKind::Encoding(_) | RuntimeErrorKind::Handler { .. }
        )
    }

    /// Render this error as the JSON document posted to `reportError`/`init/error`, if it is
    /// cycle-local. Transport/configuration/signal failures have no such rendering — they end
    /// the loop instead.
    #[must_use]
    pub fn to_error_report(&self) -> Option<ErrorReportBody> {
        match &self.0 {
            RuntimeErrorKind::Decoding(message) => Some(ErrorReportBody::new("DecodingError", message.clone())),
            RuntimeErrorKind::Encoding(message) => Some(ErrorReportBody::new("EncodingError", message.clone())),
            RuntimeErrorKind::Handler { error_type, message } => {
                Some(ErrorReportBody::new(error_type.clone(), message.clone()))
            }
            RuntimeErrorKind::Configuration(_)
            | RuntimeErrorKind::Transport(_)
            | RuntimeErrorKind::SignalInstall(_) => None,
        }
    }
}

/// Best-effort short type name for an error value, used as `errorType` for handler failures that
/// do not provide a more specific one.
fn type_name_of<E>(_error: &E) -> &'static str {
    std::any::type_name::<E>()
        .rsplit("::")
        .next()
        .unwrap_or("HandlerError")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("nope")]
    struct BadInputError;

    #[test]
    fn from_user_error_uses_short_type_name_and_display() {
        let err = RuntimeError::from_user_error(&BadInputError);
        let report = err.to_error_report().unwrap();
        assert_eq!(report.error_type, "BadInputError");
        assert_eq!(report.error_message, "nope");
    }

    #[test]
    fn decoding_and_encoding_are_cycle_local() {
        assert!(RuntimeError::decoding("bad json").is_cycle_local());
        assert!(RuntimeError::encoding("bad json").is_cycle_local());
    }

    #[test]
    fn signal_install_is_not_cycle_local_and_has_no_report() {
        let err: RuntimeError = RuntimeErrorKind::SignalInstall(std::io::Error::other("no")).into();
        assert!(!err.is_cycle_local());
        assert!(err.to_error_report().is_none());
    }
}
