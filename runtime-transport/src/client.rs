// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Client for the three control-plane HTTP operations: `next`, `respond`, `reportError`, plus
//! the one-shot `init/error` path used when initialization fails before any invocation.

use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;

use crate::envelope::InvocationEnvelope;
use crate::error::TransportError;

const PATH_PREFIX: &str = "/runtime/invocation";
const PATH_INIT_ERROR: &str = "/runtime/init/error";

/// The JSON document posted to `reportError`/`init/error`:
/// `{ "errorType": string, "errorMessage": string, "stackTrace": [string] }`.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReportBody {
    #[serde(rename = "errorType")]
    pub error_type: String,
    #[serde(rename = "errorMessage")]
    pub error_message: String,
    #[serde(rename = "stackTrace")]
    pub stack_trace: Vec<String>,
}

impl ErrorReportBody {
    /// Construct a body with no stack trace available.
    #[must_use]
    pub fn new(error_type: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            error_message: error_message.into(),
            stack_trace: Vec::new(),
        }
    }
}

/// Client for the control-plane's `next`/`response`/`error` endpoints.
///
/// Owns a single keep-alive connection (a [`reqwest::Client`] handle) to `base_url`. On any
/// [`TransportError`], the connection is discarded and a fresh one is built before the caller's
/// next attempt. The client must not be called concurrently: `next` must not be issued while a
/// prior `respond`/`reportError` is outstanding, which the single-threaded Runner loop already
/// guarantees by construction.
pub struct ControlPlaneClient {
    base_url: String,
    http: reqwest::Client,
    request_timeout: Option<Duration>,
}

impl ControlPlaneClient {
    /// Create a new client against `base_url` (a `host:port` control-plane endpoint, no scheme).
    ///
    /// # Errors
    /// Returns [`TransportError`] if the underlying HTTP client cannot be constructed.
    pub fn new(base_url: impl Into<String>, request_timeout: Option<Duration>) -> Result<Self, TransportError> {
        Ok(Self {
            base_url: base_url.into(),
            http: build_client(request_timeout)?,
            request_timeout,
        })
    }

    /// Long-poll for the next invocation. May block indefinitely; the control plane holds the
    /// connection open until work arrives.
    ///
    /// # Errors
    /// [`TransportError`] of kind `Io` on socket/HTTP failure, `Protocol` if required headers are
    /// missing or malformed, or `Timeout` if a request timeout is configured and elapses.
    pub async fn next(&mut self) -> Result<InvocationEnvelope, TransportError> {
        let url = format!("http://{}{PATH_PREFIX}/next", self.base_url);
        let response = self.send_with_reconnect(|http| http.get(&url)).await?;
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(TransportError::io)?;
        InvocationEnvelope::from_headers(&headers, body)
    }

    /// Post a successful invocation outcome.
    ///
    /// # Errors
    /// [`TransportError`] on I/O failure or a non-2xx status.
    pub async fn respond(&mut self, request_id: &str, bytes: Bytes) -> Result<(), TransportError> {
        let url = format!("http://{}{PATH_PREFIX}/{request_id}/response", self.base_url);
        self.send_with_reconnect(|http| http.post(&url).body(bytes.clone()))
            .await?;
        Ok(())
    }

    /// Post a structured error outcome for an invocation.
    ///
    /// # Errors
    /// [`TransportError`] on I/O failure or a non-2xx status.
    pub async fn report_error(
        &mut self,
        request_id: &str,
        body: &ErrorReportBody,
    ) -> Result<(), TransportError> {
        let url = format!("http://{}{PATH_PREFIX}/{request_id}/error", self.base_url);
        self.send_with_reconnect(|http| {
            http.post(&url)
                .header("Lambda-Runtime-Function-Error-Type", "Unhandled")
                .json(body)
        })
        .await?;
        Ok(())
    }

    /// Report an initialization failure. Used only if initialization fails before the first
    /// `next()` ever succeeds, since there is no request id to attach the error to.
    ///
    /// # Errors
    /// [`TransportError`] on I/O failure or a non-2xx status.
    pub async fn fail_init(&mut self, body: &ErrorReportBody) -> Result<(), TransportError> {
        let url = format!("http://{}{PATH_INIT_ERROR}", self.base_url);
        self.send_with_reconnect(|http| {
            http.post(&url)
                .header("Lambda-Runtime-Function-Error-Type", "Unhandled")
                .json(body)
        })
        .await?;
        Ok(())
    }

    /// Attempt a request once; on failure, discard and recreate the connection and retry exactly
    /// once before giving up.
    async fn send_with_reconnect(
        &mut self,
        build: impl Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, TransportError> {
        match self.execute_once(build(&self.http)).await {
            Ok(response) => Ok(response),
            Err(_) => {
                log::warn!("control-plane call failed, reconnecting and retrying once");
                self.http = build_client(self.request_timeout)?;
                self.execute_once(build(&self.http)).await
            }
        }
    }

    async fn execute_once(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, TransportError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::timeout()
            } else {
                TransportError::io(e)
            }
        })?;
        if !response.status().is_success() {
            return Err(TransportError::status(response.status().as_u16()));
        }
        Ok(response)
    }
}

fn build_client(request_timeout: Option<Duration>) -> Result<reqwest::Client, TransportError> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = request_timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().map_err(TransportError::io)
}
