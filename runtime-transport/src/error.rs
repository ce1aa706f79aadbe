// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types for the control-plane client.

use thiserror::Error;

/// Error type returned by [`crate::client::ControlPlaneClient`]. The type of error is specified
/// by the value of [`TransportErrorKind`].
#[derive(Debug, Error)]
#[error(transparent)]
pub struct TransportError(#[from] pub(crate) TransportErrorKind);

impl TransportError {
    /// Returns the corresponding [`TransportErrorKind`] for this error.
    #[must_use]
    pub fn kind(&self) -> &TransportErrorKind {
        &self.0
    }

    pub(crate) fn io(source: reqwest::Error) -> Self {
        Self(TransportErrorKind::Io(source))
    }

    pub(crate) fn protocol(header: impl Into<String>, reason: impl Into<String>) -> Self {
        Self(TransportErrorKind::Protocol {
            header: header.into(),
            reason: reason.into(),
        })
    }

    pub(crate) fn status(status: u16) -> Self {
        Self(TransportErrorKind::Status(status))
    }

    pub(crate) fn timeout() -> Self {
        Self(TransportErrorKind::Timeout)
    }

    /// Whether this error is expected to be transient (worth a single retry after
    /// reconnecting), as opposed to a programmer error in the control-plane contract itself.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        // Transport/Protocol/Timeout are all recovered identically (reconnect, retry once); the
        // distinction only matters for logging.
        true
    }
}

/// Error kind for [`TransportError`].
#[derive(Debug, Error)]
pub enum TransportErrorKind {
    /// Underlying socket/HTTP failure while talking to the control plane.
    #[error("transport error: {0}")]
    Io(#[from] reqwest::Error),
    /// A required header was missing or malformed, or the response was otherwise not shaped as
    /// the control-plane contract requires.
    #[error("protocol error: header {header} {reason}")]
    Protocol { header: String, reason: String },
    /// The control plane responded with a non-2xx status.
    #[error("protocol error: unexpected status {0}")]
    Status(u16),
    /// The configured request timeout elapsed before the control plane responded.
    #[error("request timed out")]
    Timeout,
}
