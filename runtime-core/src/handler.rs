// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The three-tier handler tower: byte handler at the bottom, a typed scheduler-bound handler
//! wrapping it with a codec, and a Safe handler wrapping that again with an offload-scheduler
//! trampoline.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::{BufMut, Bytes};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;

use crate::context::{BufferPool, Context};
use crate::error::RuntimeError;

/// Lowest tier of the handler tower: takes and returns raw bytes, and may complete directly on
/// the networking scheduler.
///
/// `Ok(None)` is posted as an empty response body via `respond`, never as `reportError` — only
/// an `Err` produces an error outcome.
pub trait ByteHandler: Send + Sync {
    /// Handle one invocation.
    fn invoke(
        &self,
        ctx: &Context,
        bytes: Bytes,
    ) -> impl Future<Output = Result<Option<Bytes>, RuntimeError>> + Send;
}

/// A decode/encode strategy selected at codec-construction time, generalized to any payload type
/// rather than one trait impl per field.
pub trait Codec: Send + Sync + 'static {
    /// The typed value this codec decodes bytes into and encodes bytes from.
    type Value: Send + 'static;

    /// Decode wire bytes into the handler's input type.
    ///
    /// # Errors
    /// Returns [`RuntimeError::decoding`] if `bytes` does not conform to the expected shape.
    fn decode(bytes: &Bytes) -> Result<Self::Value, RuntimeError>;

    /// Encode the handler's output value into response bytes, writing into a buffer drawn from
    /// `buffers` rather than allocating fresh. `Ok(None)` is posted as an empty body.
    ///
    /// # Errors
    /// Returns [`RuntimeError::encoding`] if `value` cannot be encoded.
    fn encode(buffers: &BufferPool, value: Self::Value) -> Result<Option<Bytes>, RuntimeError>;
}

/// Identity codec for UTF-8 strings.
pub struct StringCodec;

impl Codec for StringCodec {
    type Value = String;

    fn decode(bytes: &Bytes) -> Result<String, RuntimeError> {
        String::from_utf8(bytes.to_vec()).map_err(|e| RuntimeError::decoding(e.to_string()))
    }

    fn encode(buffers: &BufferPool, value: String) -> Result<Option<Bytes>, RuntimeError> {
        let mut buf = buffers.acquire();
        buf.extend_from_slice(value.as_bytes());
        Ok(Some(buf.freeze()))
    }
}

/// JSON codec for any `serde`-compatible type.
pub struct JsonCodec<T>(PhantomData<T>);

impl<T> Codec for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    type Value = T;

    fn decode(bytes: &Bytes) -> Result<T, RuntimeError> {
        serde_json::from_slice(bytes).map_err(|e| RuntimeError::decoding(e.to_string()))
    }

    fn encode(buffers: &BufferPool, value: T) -> Result<Option<Bytes>, RuntimeError> {
        let mut buf = buffers.acquire();
        serde_json::to_writer((&mut buf).writer(), &value).map_err(|e| RuntimeError::encoding(e.to_string()))?;
        Ok(Some(buf.freeze()))
    }
}

/// Typed scheduler-bound handler: a closure-backed [`ByteHandler`] that decodes on entry and
/// encodes on exit, running `func` directly on the networking scheduler. Accepting a closure of
/// shape `(context, In) -> future<Out>` registers this tier.
///
/// User code invoked through this tier MUST NOT block — it shares the single networking
/// scheduler thread with every other invocation's I/O.
pub struct FnHandler<F, C> {
    func: F,
    _codec: PhantomData<fn() -> C>,
}

impl<F, C> FnHandler<F, C>
where
    C: Codec,
{
    /// Register `func` as a typed scheduler-bound handler using codec `C`.
    pub fn new<Fut>(func: F) -> Self
    where
        F: Fn(&Context, C::Value) -> Fut + Send + Sync,
        Fut: Future<Output = Result<C::Value, RuntimeError>> + Send,
    {
        Self {
            func,
            _codec: PhantomData,
        }
    }
}

impl<F, C, Fut> ByteHandler for FnHandler<F, C>
where
    C: Codec,
    F: Fn(&Context, C::Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<C::Value, RuntimeError>> + Send,
{
    async fn invoke(&self, ctx: &Context, bytes: Bytes) -> Result<Option<Bytes>, RuntimeError> {
        let input = C::decode(&bytes)?;
        let output = (self.func)(ctx, input).await?;
        C::encode(ctx.buffers(), output)
    }
}

/// Build a typed scheduler-bound handler from a closure and an explicit codec, e.g.
/// `from_fn::<_, JsonCodec<Req>, _>(|ctx, req| async move { ... })`.
pub fn from_fn<F, C, Fut>(func: F) -> FnHandler<F, C>
where
    C: Codec,
    F: Fn(&Context, C::Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<C::Value, RuntimeError>> + Send,
{
    FnHandler::new(func)
}

/// The result a Safe handler's user callback reports through its [`Continuation`].
pub type SafeResult<T> = Result<T, RuntimeError>;

struct ContinuationInner<T> {
    fired: AtomicBool,
    sender: std::sync::Mutex<Option<oneshot::Sender<SafeResult<T>>>>,
}

/// A oneshot completion handle passed to a Safe handler's user callback.
///
/// Enforces first-wins with an atomic flag: a second call to [`Continuation::complete`] is
/// logged and ignored rather than panicking, so a user callback invoked twice still causes
/// exactly one outcome post.
pub struct Continuation<T> {
    inner: Arc<ContinuationInner<T>>,
}

impl<T> Continuation<T> {
    fn new(sender: oneshot::Sender<SafeResult<T>>) -> Self {
        Self {
            inner: Arc::new(ContinuationInner {
                fired: AtomicBool::new(false),
                sender: std::sync::Mutex::new(Some(sender)),
            }),
        }
    }

    /// Signal completion of the invocation. Only the first call has any effect.
    pub fn complete(&self, result: SafeResult<T>) {
        if self.inner.fired.swap(true, Ordering::SeqCst) {
            log::warn!("safe handler continuation invoked more than once; ignoring");
            return;
        }
        if let Some(sender) = self
            .inner
            .sender
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
        {
            let _ = sender.send(result);
        }
    }
}

impl<T> Clone for Continuation<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Safe handler: the richest tier. The user callback runs on the offload scheduler
/// (`tokio::task::spawn_blocking`'s bounded pool) and reports completion through a
/// [`Continuation`]; the networking scheduler is never occupied while the callback runs.
pub struct SafeHandler<F, C> {
    func: Arc<F>,
    _codec: PhantomData<fn() -> C>,
}

impl<F, C> SafeHandler<F, C>
where
    C: Codec,
{
    /// Register `func` as a Safe handler using codec `C`. `func` runs on the offload scheduler
    /// and must call `continuation.complete(..)` exactly once when it is done. Accepting a
    /// closure of shape `(context, In, continuation)` registers this tier.
    pub fn new(func: F) -> Self
    where
        F: Fn(Context, C::Value, Continuation<C::Value>) + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
            _codec: PhantomData,
        }
    }
}

impl<F, C> ByteHandler for SafeHandler<F, C>
where
    C: Codec,
    F: Fn(Context, C::Value, Continuation<C::Value>) + Send + Sync + 'static,
{
    async fn invoke(&self, ctx: &Context, bytes: Bytes) -> Result<Option<Bytes>, RuntimeError> {
        let input = C::decode(&bytes)?;
        let (tx, rx) = oneshot::channel();
        let continuation = Continuation::new(tx);
        let func = Arc::clone(&self.func);
        let ctx_for_task = ctx.clone();
        tokio::task::spawn_blocking(move || {
            func(ctx_for_task, input, continuation);
        });
        let output = rx
            .await
            .map_err(|_| RuntimeError::handler("ContinuationDropped", "safe handler never completed its continuation"))??;
        C::encode(ctx.buffers(), output)
    }
}

/// Build a Safe handler from a callback and an explicit codec.
pub fn from_blocking_fn<F, C>(func: F) -> SafeHandler<F, C>
where
    C: Codec,
    F: Fn(Context, C::Value, Continuation<C::Value>) + Send + Sync + 'static,
{
    SafeHandler::new(func)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use bytes::Bytes;
    use runtime_transport::InvocationEnvelope;
    use serde::Deserialize;

    use super::*;
    use crate::context::BufferPool;

    fn ctx() -> Context {
        let envelope = InvocationEnvelope {
            request_id: "req-1".to_string(),
            trace_id: None,
            invoked_function_arn: None,
            deadline: Instant::now() + Duration::from_secs(10),
            cognito_identity: None,
            client_context: None,
            payload: Bytes::from_static(b"hello"),
        };
        Context::new(&envelope, BufferPool::new(), tokio::runtime::Handle::current())
    }

    #[tokio::test]
    async fn string_identity_handler_echoes() {
        let handler = from_fn::<_, StringCodec, _>(|_ctx, s: String| async move { Ok(s) });
        let out = handler.invoke(&ctx(), Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(out, Some(Bytes::from_static(b"hello")));
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Greeting {
        name: String,
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Message {
        message: String,
    }

    #[tokio::test]
    async fn json_handler_round_trips() {
        let handler = from_fn::<_, JsonCodec<Greeting>, _>(|_ctx, _req: Greeting| async move {
            Ok(Greeting {
                name: "ignored".to_string(),
            })
        });
        let out = handler
            .invoke(&ctx(), Bytes::from_static(br#"{"name":"world"}"#))
            .await
            .unwrap()
            .unwrap();
        let decoded: Greeting = serde_json::from_slice(&out).unwrap();
        assert_eq!(decoded.name, "ignored");
    }

    #[tokio::test]
    async fn decode_failure_produces_decoding_error() {
        let handler = from_fn::<_, JsonCodec<Greeting>, _>(|_ctx, req: Greeting| async move { Ok(req) });
        let err = handler
            .invoke(&ctx(), Bytes::from_static(b"not json"))
            .await
            .unwrap_err();
        assert!(err.to_error_report().unwrap().error_type == "DecodingError");
    }

    #[derive(Debug, thiserror::Error)]
    #[error("nope")]
    struct BadInputError;

    #[tokio::test]
    async fn handler_error_propagates_type_name_and_message() {
        let handler = from_fn::<_, StringCodec, _>(|_ctx, _s: String| async move {
            Err(RuntimeError::from_user_error(&BadInputError))
        });
        let err = handler.invoke(&ctx(), Bytes::from_static(b"x")).await.unwrap_err();
        let report = err.to_error_report().unwrap();
        assert_eq!(report.error_type, "BadInputError");
        assert_eq!(report.error_message, "nope");
    }

    #[tokio::test]
    async fn safe_handler_offloads_and_completes_once() {
        let handler = from_blocking_fn::<_, StringCodec>(|_ctx, s, continuation| {
            continuation.complete(Ok(s.clone()));
            // A second completion must be a no-op.
            continuation.complete(Ok("second".to_string()));
        });
        let out = handler
            .invoke(&ctx(), Bytes::from_static(b"offloaded"))
            .await
            .unwrap();
        assert_eq!(out, Some(Bytes::from_static(b"offloaded")));
    }
}
