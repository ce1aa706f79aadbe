// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The invocation envelope produced by a `next()` call and the header contract it is parsed from.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use reqwest::header::HeaderMap;

use crate::error::TransportError;

/// Required response header carrying the request identifier.
pub const HEADER_REQUEST_ID: &str = "Lambda-Runtime-Aws-Request-Id";
/// Optional tracing identifier header.
pub const HEADER_TRACE_ID: &str = "Lambda-Runtime-Trace-Id";
/// Optional invoked-function identifier header.
pub const HEADER_INVOKED_FUNCTION_ARN: &str = "Lambda-Runtime-Invoked-Function-Arn";
/// Optional deadline header, in milliseconds since the Unix epoch.
pub const HEADER_DEADLINE_MS: &str = "Lambda-Runtime-Deadline-Ms";
/// Optional mobile-SDK identity header.
pub const HEADER_COGNITO_IDENTITY: &str = "Lambda-Runtime-Cognito-Identity";
/// Optional client-context header.
pub const HEADER_CLIENT_CONTEXT: &str = "Lambda-Runtime-Client-Context";

/// One server-delivered `next` response plus its headers.
///
/// Created when the control-plane client receives a response from `next()`; considered consumed
/// once the matching `respond`/`reportError` post completes.
#[derive(Debug, Clone)]
pub struct InvocationEnvelope {
    /// Opaque, non-empty request identifier.
    pub request_id: String,
    /// Tracing identifier, if the control plane supplied one.
    pub trace_id: Option<String>,
    /// Invoked-function identifier, if the control plane supplied one.
    pub invoked_function_arn: Option<String>,
    /// Absolute monotonic deadline for this invocation.
    pub deadline: Instant,
    /// Mobile-SDK identity blob, if present.
    pub cognito_identity: Option<String>,
    /// Client-context blob, if present.
    pub client_context: Option<String>,
    /// Request payload bytes. May be empty.
    pub payload: Bytes,
}

impl InvocationEnvelope {
    /// Parse headers returned by `next()` and the response body into an [`InvocationEnvelope`].
    ///
    /// # Errors
    /// Returns [`TransportError`] (kind `Protocol`) if the required request-id header is
    /// missing, or if any present header's value is not valid UTF-8 / not in the expected format.
    pub fn from_headers(headers: &HeaderMap, payload: Bytes) -> Result<Self, TransportError> {
        let request_id = header_str(headers, HEADER_REQUEST_ID)?
            .ok_or_else(|| TransportError::protocol(HEADER_REQUEST_ID, "missing"))?
            .to_owned();
        if request_id.is_empty() {
            return Err(TransportError::protocol(HEADER_REQUEST_ID, "empty"));
        }

        let deadline_ms = header_str(headers, HEADER_DEADLINE_MS)?;
        let deadline = match deadline_ms {
            Some(raw) => {
                let epoch_ms: u64 = raw
                    .parse()
                    .map_err(|_| TransportError::protocol(HEADER_DEADLINE_MS, "not an integer"))?;
                deadline_from_epoch_ms(epoch_ms)
            }
            None => Instant::now() + Duration::from_secs(u64::from(u32::MAX)),
        };

        Ok(Self {
            request_id,
            trace_id: header_str(headers, HEADER_TRACE_ID)?.map(str::to_owned),
            invoked_function_arn: header_str(headers, HEADER_INVOKED_FUNCTION_ARN)?
                .map(str::to_owned),
            deadline,
            cognito_identity: header_str(headers, HEADER_COGNITO_IDENTITY)?.map(str::to_owned),
            client_context: header_str(headers, HEADER_CLIENT_CONTEXT)?.map(str::to_owned),
            payload,
        })
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<Option<&'a str>, TransportError> {
    match headers.get(name) {
        Some(value) => value
            .to_str()
            .map(Some)
            .map_err(|_| TransportError::protocol(name, "not valid UTF-8")),
        None => Ok(None),
    }
}

/// Convert an absolute epoch-millisecond deadline into a monotonic [`Instant`], anchored to the
/// current wall/monotonic clock reading. A deadline that has already elapsed by the time it is
/// parsed (or one that lands exactly on "now") is nudged one millisecond into the future rather
/// than returned as-is, so the envelope never claims a deadline that is already in the past. The
/// Runner still posts the eventual response even if the handler overruns this nudged deadline —
/// this only bounds what the envelope itself can claim.
fn deadline_from_epoch_ms(epoch_ms: u64) -> Instant {
    let now_wall = SystemTime::now();
    let target = UNIX_EPOCH + Duration::from_millis(epoch_ms);
    match target.duration_since(now_wall) {
        Ok(remaining) if remaining > Duration::ZERO => Instant::now() + remaining,
        _ => Instant::now() + Duration::from_millis(1),
    }
}

#[cfg(test)]
mod tests {
    use reqwest::header::{HeaderMap, HeaderValue};

    use super::*;

    fn headers_with(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        headers
    }

    #[test]
    fn missing_request_id_is_a_protocol_error() {
        let headers = headers_with(&[]);
        let err = InvocationEnvelope::from_headers(&headers, Bytes::new()).unwrap_err();
        assert!(matches!(err.kind(), crate::error::TransportErrorKind::Protocol { .. }));
    }

    #[test]
    fn empty_request_id_is_a_protocol_error() {
        let headers = headers_with(&[(HEADER_REQUEST_ID, "")]);
        let err = InvocationEnvelope::from_headers(&headers, Bytes::new()).unwrap_err();
        assert!(matches!(err.kind(), crate::error::TransportErrorKind::Protocol { .. }));
    }

    #[test]
    fn non_integer_deadline_is_a_protocol_error() {
        let headers = headers_with(&[(HEADER_REQUEST_ID, "req-1"), (HEADER_DEADLINE_MS, "soon")]);
        let err = InvocationEnvelope::from_headers(&headers, Bytes::new()).unwrap_err();
        assert!(matches!(err.kind(), crate::error::TransportErrorKind::Protocol { .. }));
    }

    #[test]
    fn optional_headers_default_to_none() {
        let headers = headers_with(&[(HEADER_REQUEST_ID, "req-1")]);
        let envelope = InvocationEnvelope::from_headers(&headers, Bytes::from_static(b"body")).unwrap();
        assert_eq!(envelope.request_id, "req-1");
        assert_eq!(envelope.trace_id, None);
        assert_eq!(envelope.invoked_function_arn, None);
        assert_eq!(envelope.cognito_identity, None);
        assert_eq!(envelope.client_context, None);
        assert_eq!(envelope.payload, Bytes::from_static(b"body"));
        assert!(envelope.deadline > Instant::now());
    }

    #[test]
    fn all_headers_are_parsed() {
        let deadline_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64
            + 10_000;
        let headers = headers_with(&[
            (HEADER_REQUEST_ID, "req-1"),
            (HEADER_TRACE_ID, "trace-1"),
            (HEADER_INVOKED_FUNCTION_ARN, "arn:fn"),
            (HEADER_DEADLINE_MS, &deadline_ms.to_string()),
            (HEADER_COGNITO_IDENTITY, "cognito-blob"),
            (HEADER_CLIENT_CONTEXT, "context-blob"),
        ]);
        let envelope = InvocationEnvelope::from_headers(&headers, Bytes::new()).unwrap();
        assert_eq!(envelope.trace_id.as_deref(), Some("trace-1"));
        assert_eq!(envelope.invoked_function_arn.as_deref(), Some("arn:fn"));
        assert_eq!(envelope.cognito_identity.as_deref(), Some("cognito-blob"));
        assert_eq!(envelope.client_context.as_deref(), Some("context-blob"));
        assert!(envelope.deadline > Instant::now());
    }

    #[test]
    fn past_deadline_is_nudged_strictly_into_the_future() {
        let headers = headers_with(&[(HEADER_REQUEST_ID, "req-1"), (HEADER_DEADLINE_MS, "0")]);
        let envelope = InvocationEnvelope::from_headers(&headers, Bytes::new()).unwrap();
        assert!(envelope.deadline > Instant::now());
    }
}
