// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-invocation metadata passed to the handler.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use bytes::BytesMut;
use log::Level;
use runtime_transport::InvocationEnvelope;
use tokio::runtime::Handle;

const POOLED_BUFFER_CAPACITY: usize = 4 * 1024;

/// A small recycling pool of [`BytesMut`] buffers handed out to handlers for encoding.
///
/// Modeled as a thin newtype over `bytes::BytesMut` reuse rather than a custom allocator. Buffers
/// acquired on the offload scheduler must be filled before the user's continuation fires, since
/// their lifetime is tied to the [`Context`] that handed them out.
#[derive(Clone)]
pub struct BufferPool {
    free: Arc<Mutex<Vec<BytesMut>>>,
}

impl BufferPool {
    pub(crate) fn new() -> Self {
        Self {
            free: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Take a buffer from the pool, allocating a fresh one if none is free.
    #[must_use]
    pub fn acquire(&self) -> BytesMut {
        self.free
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(POOLED_BUFFER_CAPACITY))
    }

    /// Return an emptied buffer to the pool for reuse by a later invocation.
    pub fn release(&self, mut buffer: BytesMut) {
        buffer.clear();
        self.free
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(buffer);
    }
}

/// Per-invocation logger with `requestId` pre-bound.
///
/// Thin wrapper over the `log` facade: every line is prefixed with the owning invocation's
/// request id so multiplexed logs stay attributable without pulling in a structured-logging
/// dependency.
#[derive(Clone)]
pub struct ContextLogger {
    request_id: Arc<str>,
}

impl ContextLogger {
    fn new(request_id: Arc<str>) -> Self {
        Self { request_id }
    }

    /// Emit a log line at `level` with the owning request id prefixed.
    pub fn log(&self, level: Level, message: &str) {
        log::log!(level, "[requestId={}] {message}", self.request_id);
    }

    /// Emit a log line at [`Level::Info`].
    pub fn info(&self, message: &str) {
        self.log(Level::Info, message);
    }

    /// Emit a log line at [`Level::Warn`].
    pub fn warn(&self, message: &str) {
        self.log(Level::Warn, message);
    }

    /// Emit a log line at [`Level::Error`].
    pub fn error(&self, message: &str) {
        self.log(Level::Error, message);
    }
}

struct ContextInner {
    request_id: Arc<str>,
    trace_id: Option<String>,
    invoked_function_arn: Option<String>,
    deadline: Instant,
    cognito_identity: Option<String>,
    client_context: Option<String>,
    logger: ContextLogger,
    scheduler: Handle,
    buffers: BufferPool,
}

/// Read-only view of an [`InvocationEnvelope`] plus ambient resources, handed to the handler
/// tower for the lifetime of one invocation.
///
/// Cheaply [`Clone`]-able (an `Arc` handle) so it can be moved into a `spawn_blocking` closure
/// for Safe-tier handlers without the caller needing to manage lifetimes by hand.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    pub(crate) fn new(envelope: &InvocationEnvelope, buffers: BufferPool, scheduler: Handle) -> Self {
        let request_id: Arc<str> = Arc::from(envelope.request_id.as_str());
        Self {
            inner: Arc::new(ContextInner {
                request_id: request_id.clone(),
                trace_id: envelope.trace_id.clone(),
                invoked_function_arn: envelope.invoked_function_arn.clone(),
                deadline: envelope.deadline,
                cognito_identity: envelope.cognito_identity.clone(),
                client_context: envelope.client_context.clone(),
                logger: ContextLogger::new(request_id),
                scheduler,
                buffers,
            }),
        }
    }

    /// The opaque, non-empty request identifier for this invocation.
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.inner.request_id
    }

    /// The tracing identifier, if the control plane supplied one.
    #[must_use]
    pub fn trace_id(&self) -> Option<&str> {
        self.inner.trace_id.as_deref()
    }

    /// The invoked-function identifier, if the control plane supplied one.
    #[must_use]
    pub fn invoked_function_arn(&self) -> Option<&str> {
        self.inner.invoked_function_arn.as_deref()
    }

    /// The absolute monotonic deadline for this invocation.
    #[must_use]
    pub fn deadline(&self) -> Instant {
        self.inner.deadline
    }

    /// The mobile-SDK identity blob, if present.
    #[must_use]
    pub fn cognito_identity(&self) -> Option<&str> {
        self.inner.cognito_identity.as_deref()
    }

    /// The client-context blob, if present.
    #[must_use]
    pub fn client_context(&self) -> Option<&str> {
        self.inner.client_context.as_deref()
    }

    /// A logger with this invocation's request id pre-bound.
    #[must_use]
    pub fn logger(&self) -> &ContextLogger {
        &self.inner.logger
    }

    /// A handle to the networking scheduler this invocation is running on, for spawning
    /// ancillary tasks that must stay on the same runtime.
    #[must_use]
    pub fn scheduler(&self) -> &Handle {
        &self.inner.scheduler
    }

    /// The buffer allocator backing this invocation.
    #[must_use]
    pub fn buffers(&self) -> &BufferPool {
        &self.inner.buffers
    }
}
