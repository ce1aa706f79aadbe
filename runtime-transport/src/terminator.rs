// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Translates the configured stop signal (and `SIGINT`) into a cooperative cancellation the
//! Lifecycle loop can poll for at cycle boundaries.

use std::str::FromStr;

use thiserror::Error;
use tokio::signal::unix::{self, SignalKind};
use tokio_util::sync::CancellationToken;

/// Error constructing a [`Terminator`] from a configured signal name.
#[derive(Debug, Error)]
#[error("unrecognized stop signal name: {0}")]
pub struct UnknownSignalError(String);

/// The signal that should trigger draining, by POSIX name (e.g. `"TERM"`, `"USR1"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopSignal(SignalKind);

impl StopSignal {
    fn kind(self) -> SignalKind {
        self.0
    }
}

impl FromStr for StopSignal {
    type Err = UnknownSignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s.to_ascii_uppercase().as_str() {
            "TERM" => SignalKind::terminate(),
            "INT" => SignalKind::interrupt(),
            "HUP" => SignalKind::hangup(),
            "USR1" => SignalKind::user_defined1(),
            "USR2" => SignalKind::user_defined2(),
            "QUIT" => SignalKind::quit(),
            other => return Err(UnknownSignalError(other.to_string())),
        };
        Ok(Self(kind))
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self(SignalKind::terminate())
    }
}

/// Watches for the configured stop signal and `SIGINT`, flipping a [`CancellationToken`] the
/// Lifecycle loop observes between cycles.
///
/// No allocation or user code runs inside the signal handler itself; `tokio::signal` dispatches
/// the notification onto the runtime's normal task queue, so the handler stays signal-safe by
/// construction.
pub struct Terminator {
    token: CancellationToken,
}

impl Terminator {
    /// Install signal handlers for `stop_signal` and `SIGINT`, and spawn the background task that
    /// cancels `token` the first time either fires.
    ///
    /// # Errors
    /// Returns [`std::io::Error`] if the underlying signal handler cannot be installed.
    pub fn install(stop_signal: StopSignal) -> std::io::Result<Self> {
        let token = CancellationToken::new();
        let mut stop_stream = unix::signal(stop_signal.kind())?;
        let mut int_stream = unix::signal(SignalKind::interrupt())?;
        let watcher_token = token.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = stop_stream.recv() => {
                    log::info!("stop signal received, draining");
                }
                _ = int_stream.recv() => {
                    log::info!("interrupt received, draining");
                }
            }
            watcher_token.cancel();
        });

        Ok(Self { token })
    }

    /// A handle that resolves once the stop signal (or `SIGINT`) has fired.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Whether a stop signal has already been observed.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.token.is_cancelled()
    }
}
