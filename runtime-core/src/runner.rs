// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Executes one invocation end-to-end: fetch -> decode -> dispatch -> encode -> post.

use std::time::Instant;

use bytes::Bytes;
use runtime_transport::{ControlPlaneClient, ErrorReportBody, TransportError};

use crate::context::{BufferPool, Context};
use crate::error::RuntimeError;
use crate::handler::ByteHandler;

/// The result of one `run_once` cycle, used by [`crate::lifecycle::Lifecycle`] to decide whether
/// to keep looping.
pub enum CycleOutcome {
    /// The envelope was fetched and an outcome (response or error) was posted successfully.
    Completed,
    /// The outcome post itself failed. This is logged and treated as recoverable — the envelope
    /// is considered consumed and the next cycle proceeds.
    PostFailed,
}

/// Long-poll for the next invocation.
///
/// Split out from [`dispatch`] so [`crate::lifecycle::Lifecycle`] can race this specific step
/// against a stop signal: cancellation only happens at cycle boundaries, so once an envelope is
/// in hand, [`dispatch`] must not be interrupted.
///
/// # Errors
/// Returns [`TransportError`] if the control plane's `next` call fails after its one retry. This
/// propagates upward and ends the loop.
pub async fn fetch(client: &mut ControlPlaneClient) -> Result<runtime_transport::InvocationEnvelope, TransportError> {
    client.next().await
}

/// Constructs the Context, dispatches to `handler`, and posts the outcome.
/// Always runs to completion once called — the envelope is considered consumed the moment this
/// returns, regardless of whether the post itself succeeded.
pub async fn dispatch<H: ByteHandler>(
    client: &mut ControlPlaneClient,
    handler: &H,
    buffers: &BufferPool,
    envelope: runtime_transport::InvocationEnvelope,
) -> CycleOutcome {
    let request_id = envelope.request_id.clone();
    let ctx = Context::new(&envelope, buffers.clone(), tokio::runtime::Handle::current());

    let outcome = handler.invoke(&ctx, envelope.payload).await;

    let post_result = match outcome {
        Ok(body) => {
            let bytes = body.unwrap_or_else(Bytes::new);
            client.respond(&request_id, bytes).await
        }
        Err(err) => {
            ctx.logger().error(&format!("handler failed: {err}"));
            let report = err
                .to_error_report()
                .unwrap_or_else(|| ErrorReportBody::new("InternalError", err.to_string()));
            client.report_error(&request_id, &report).await
        }
    };

    match post_result {
        Ok(()) => CycleOutcome::Completed,
        Err(post_err) => {
            log_post_failure(&ctx, &post_err);
            CycleOutcome::PostFailed
        }
    }
}

fn log_post_failure(ctx: &Context, err: &TransportError) {
    // If the handler finished after the control-plane deadline, the server rejects the late
    // post; only warn in that case, never treat it as fatal.
    if Instant::now() > ctx.deadline() {
        ctx.logger()
            .warn(&format!("outcome post rejected after deadline: {err}"));
    } else {
        ctx.logger().error(&format!("outcome post failed: {err}"));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::handler::StringCodec;
    use crate::handler::from_fn;

    #[tokio::test]
    async fn empty_response_is_not_an_error() {
        // A handler returning `Ok(None)` should produce an empty `respond`, not `reportError`.
        // Exercised end-to-end in runtime-core/tests/scenarios.rs against a mock control plane;
        // here we only check the handler tower's contribution to that behavior.
        struct NullHandler;
        impl ByteHandler for NullHandler {
            async fn invoke(&self, _ctx: &Context, _bytes: Bytes) -> Result<Option<Bytes>, RuntimeError> {
                Ok(None)
            }
        }
        let handler = NullHandler;
        let envelope = runtime_transport::InvocationEnvelope {
            request_id: "req-1".to_string(),
            trace_id: None,
            invoked_function_arn: None,
            deadline: Instant::now() + std::time::Duration::from_secs(10),
            cognito_identity: None,
            client_context: None,
            payload: Bytes::new(),
        };
        let ctx = Context::new(&envelope, BufferPool::new(), tokio::runtime::Handle::current());
        let result = handler.invoke(&ctx, envelope.payload).await.unwrap();
        assert_eq!(result, None);

        // Also confirm `from_fn`/`StringCodec` compose as expected for a plain string-echo handler.
        let echo = from_fn::<_, StringCodec, _>(|_ctx, s: String| async move { Ok(s) });
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let _ = echo
            .invoke(&ctx, Bytes::from_static(b"hello"))
            .await
            .inspect(|_| {
                calls2.fetch_add(1, Ordering::SeqCst);
            });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
