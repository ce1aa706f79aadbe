// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The process lifetime state machine: init, steady-state polling, graceful drain on signal,
//! bounded-run termination, fatal-error handling.

use runtime_transport::{ControlPlaneClient, ErrorReportBody, Terminator};

use crate::config::Configuration;
use crate::context::BufferPool;
use crate::error::{RuntimeError, RuntimeErrorKind};
use crate::handler::ByteHandler;
use crate::runner::{self, CycleOutcome};

/// The lifecycle's state machine: `Initializing -> Running -> Draining -> Terminated`, with the
/// exceptional edge `Running -> Failed -> Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Reading configuration, connecting to the control plane, installing signal handlers.
    Initializing,
    /// Steady-state: repeatedly fetching and dispatching invocations.
    Running,
    /// Finishing the in-flight cycle (if any) and closing the connection; no new cycle starts.
    Draining,
    /// An unrecoverable failure occurred; a final report is attempted before exit.
    Failed,
    /// Terminal state.
    Terminated,
}

/// The process exit code assigned to each way the lifecycle can end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Clean drain: a stop signal fired, or `MAX_REQUESTS` cycles completed.
    Clean,
    /// Unrecoverable transport failure.
    TransportFailure,
    /// Initialization failed before the loop started.
    InitializationFailure,
}

impl ExitCode {
    /// The process exit code: `0`/`1`/`2`.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            ExitCode::Clean => 0,
            ExitCode::TransportFailure => 1,
            ExitCode::InitializationFailure => 2,
        }
    }
}

/// Drives a single function invocation process's entire lifetime.
///
/// Generic over the handler type rather than a boxed trait object or global registration: the
/// handler is a typed value passed into the `run` entry point.
pub struct Lifecycle<H: ByteHandler> {
    endpoint: String,
    config: Configuration,
    handler: H,
    state: RunState,
}

impl<H: ByteHandler> Lifecycle<H> {
    /// Construct a lifecycle for `handler`, against the control plane at `endpoint`
    /// (`host:port`), using `config`.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, config: Configuration, handler: H) -> Self {
        Self {
            endpoint: endpoint.into(),
            config,
            handler,
            state: RunState::Initializing,
        }
    }

    /// The lifecycle's current state.
    #[must_use]
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Drive the lifecycle to completion: initialize, run the steady-state loop, drain or fail,
    /// and return the exit code the process should use.
    pub async fn run(mut self) -> ExitCode {
        let mut client = match ControlPlaneClient::new(self.endpoint.clone(), self.config.request_timeout) {
            Ok(client) => client,
            Err(err) => {
                log::error!("failed to construct control-plane client: {err}");
                self.state = RunState::Terminated;
                return ExitCode::InitializationFailure;
            }
        };

        let terminator = match Terminator::install(self.config.stop_signal) {
            Ok(terminator) => terminator,
            Err(err) => {
                self.state = RunState::Failed;
                Self::report_init_failure(&mut client, RuntimeErrorKind::SignalInstall(err).into()).await;
                self.state = RunState::Terminated;
                return ExitCode::InitializationFailure;
            }
        };

        self.state = RunState::Running;
        let buffers = BufferPool::new();
        let mut completed_cycles: u64 = 0;
        let mut ever_succeeded = false;

        loop {
            if terminator.is_draining() {
                break;
            }

            if let Some(max) = self.config.max_requests {
                if completed_cycles >= max {
                    log::info!("reached MAX_REQUESTS={max}, draining");
                    break;
                }
            }

            let envelope = tokio::select! {
                biased;
                () = terminator.token().cancelled() => {
                    log::info!("stop signal observed while awaiting next invocation; draining");
                    break;
                }
                fetched = runner::fetch(&mut client) => fetched,
            };

            let envelope = match envelope {
                Ok(envelope) => envelope,
                Err(err) => {
                    log::error!("transport failure fetching next invocation: {err}");
                    self.state = RunState::Failed;
                    if !ever_succeeded {
                        Self::report_init_failure(&mut client, err.into()).await;
                    }
                    self.state = RunState::Terminated;
                    return ExitCode::TransportFailure;
                }
            };

            // Once an envelope is in hand this cycle always runs to completion, even if a stop
            // signal arrives mid-dispatch.
            match runner::dispatch(&mut client, &self.handler, &buffers, envelope).await {
                CycleOutcome::Completed | CycleOutcome::PostFailed => {
                    ever_succeeded = true;
                    completed_cycles += 1;
                }
            }
        }

        self.state = RunState::Draining;
        log::info!("drain complete after {completed_cycles} cycle(s)");
        self.state = RunState::Terminated;
        ExitCode::Clean
    }

    async fn report_init_failure(client: &mut ControlPlaneClient, err: RuntimeError) {
        let report = err
            .to_error_report()
            .unwrap_or_else(|| ErrorReportBody::new("InitializationError", err.to_string()));
        if let Err(post_err) = client.fail_init(&report).await {
            log::error!("failed to report initialization error to control plane: {post_err}");
        }
    }
}
