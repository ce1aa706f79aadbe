// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![warn(missing_docs)]

//! Invocation loop, handler tower, and lifecycle state machine for the function runtime core.
//!
//! Call [`run`] with a handler value to drive a process's entire lifetime: read configuration,
//! connect to the control plane, and loop fetch -> decode -> dispatch -> encode -> post until a
//! stop signal, a bounded request count, or an unrecoverable transport failure ends it.

pub mod config;
pub mod context;
pub mod error;
pub mod handler;
pub mod lifecycle;
pub mod runner;

pub use config::{ConfigError, Configuration, ConfigurationBuilder, ConfigurationBuilderError};
pub use context::{BufferPool, Context, ContextLogger};
pub use error::{RuntimeError, RuntimeErrorKind};
pub use handler::{
    ByteHandler, Codec, Continuation, FnHandler, JsonCodec, SafeHandler, StringCodec, from_blocking_fn, from_fn,
};
pub use lifecycle::{ExitCode, Lifecycle, RunState};

/// Build a [`Lifecycle`] from environment configuration and drive it to completion.
///
/// This is the crate's process-wide entry point: the handler is passed in by value, not
/// registered through a global.
///
/// # Errors
/// Returns [`RuntimeError`] if configuration cannot be read from the environment. Failures after
/// that point (connecting to the control plane, installing signal handlers, transport errors
/// during the loop) are reported through the returned [`ExitCode`] instead.
pub async fn run<H>(endpoint: impl Into<String>, handler: H) -> Result<ExitCode, RuntimeError>
where
    H: ByteHandler + 'static,
{
    let config = Configuration::from_env()?;
    Ok(Lifecycle::new(endpoint, config, handler).run().await)
}
