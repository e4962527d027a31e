// rpcdb - RPC Debugger
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Client side of the debugger callback protocol.
//!
//! Every hook that fires POSTs the intercepted body as `text/plain` to the
//! session URL and expects a 2xx reply of the form `{"body": "<replacement>"}`.

use crate::{breakpoint::HookType, error::InterceptError, session::read_body};
use axum::body::Bytes;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Bodies larger than this are not buffered for interception (128 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 128 * 1024 * 1024;

/// Replacement body returned by the debugger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebuggerBody {
    /// Text that replaces the intercepted body
    #[serde(alias = "Body")]
    pub body: String,
}

/// Debugger reply to a `receive` breakpoint.
pub type ReceiveBody = DebuggerBody;
/// Debugger reply to a `reply` breakpoint.
pub type ReplyBody = DebuggerBody;
/// Debugger reply to a `request` breakpoint.
pub type RequestBody = DebuggerBody;
/// Debugger reply to a `response` breakpoint.
pub type ResponseBody = DebuggerBody;

/// HTTP client for the debugger endpoint.
///
/// Cloning is cheap and clones share one connection pool, so a single
/// instance should be created up front and handed to every session.
#[derive(Debug, Clone)]
pub struct DebuggerClient {
    http: reqwest::Client,
    max_body_bytes: usize,
}

impl Default for DebuggerClient {
    fn default() -> Self {
        Self::from_client(reqwest::Client::new())
    }
}

impl DebuggerClient {
    /// Creates a client without a request timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a client whose debugger calls fail after `timeout`.
    pub fn with_timeout(timeout: Duration) -> eyre::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::from_client(http))
    }

    /// Wraps an existing `reqwest` client.
    pub fn from_client(http: reqwest::Client) -> Self {
        Self { http, max_body_bytes: DEFAULT_MAX_BODY_BYTES }
    }

    /// Sets the largest body that hooks will buffer.
    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    /// Largest body that hooks will buffer.
    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    /// Sends an intercepted body to the debugger and returns its replacement.
    ///
    /// Non-2xx replies and replies that are not a [`DebuggerBody`] are errors;
    /// a failed rewrite is never reported as "keep the original body". The
    /// reply is bounded by the same body limit as the intercepted bodies.
    pub async fn exchange(
        &self,
        session_url: &str,
        hook: HookType,
        body: Bytes,
    ) -> Result<String, InterceptError> {
        debug!(%hook, session_url, bytes = body.len(), "Forwarding intercepted body to debugger");

        let response = self
            .http
            .post(session_url)
            .header(CONTENT_TYPE, "text/plain")
            .body(body)
            .send()
            .await
            .map_err(InterceptError::DebuggerTransport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(InterceptError::DebuggerStatus(status));
        }

        let raw = read_body(reqwest::Body::from(response), self.max_body_bytes)
            .await
            .map_err(as_transport_error)?;
        let reply: DebuggerBody =
            serde_json::from_slice(&raw).map_err(InterceptError::DebuggerProtocol)?;

        debug!(%hook, bytes = reply.body.len(), "Debugger returned replacement body");
        Ok(reply.body)
    }
}

/// Read failures on the debugger connection are transport errors.
fn as_transport_error(err: InterceptError) -> InterceptError {
    match err {
        InterceptError::Body(source) => match source.downcast::<reqwest::Error>() {
            Ok(e) => InterceptError::DebuggerTransport(*e),
            Err(source) => InterceptError::Body(source),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        matchers::{body_string, header, method},
        Mock, MockServer, ResponseTemplate,
    };

    #[test]
    fn test_debugger_body_field_names() {
        let lower: DebuggerBody = serde_json::from_str(r#"{"body":"howdy"}"#).unwrap();
        let upper: DebuggerBody = serde_json::from_str(r#"{"Body":"howdy"}"#).unwrap();
        assert_eq!(lower, upper);
        assert_eq!(lower.body, "howdy");

        assert!(serde_json::from_str::<DebuggerBody>("{}").is_err());
        assert!(serde_json::from_str::<DebuggerBody>(r#"{"body":42}"#).is_err());
        assert_eq!(
            serde_json::to_string(&DebuggerBody { body: "x".to_string() }).unwrap(),
            r#"{"body":"x"}"#
        );
    }

    #[tokio::test]
    async fn test_exchange_posts_plain_text() {
        let debugger = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("content-type", "text/plain"))
            .and(body_string("hello world"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"body":"howdy world"}"#))
            .expect(1)
            .mount(&debugger)
            .await;

        let client = DebuggerClient::new();
        let replacement = client
            .exchange(&debugger.uri(), HookType::Receive, Bytes::from_static(b"hello world"))
            .await
            .unwrap();

        assert_eq!(replacement, "howdy world");
    }

    #[tokio::test]
    async fn test_exchange_rejects_non_success_status() {
        let debugger = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string(r#"{"body":"ignored"}"#))
            .mount(&debugger)
            .await;

        let err = DebuggerClient::new()
            .exchange(&debugger.uri(), HookType::Reply, Bytes::new())
            .await
            .unwrap_err();

        assert!(matches!(err, InterceptError::DebuggerStatus(status) if status.as_u16() == 503));
        assert!(err.is_debugger_failure());
    }

    #[tokio::test]
    async fn test_exchange_rejects_malformed_reply() {
        let debugger = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&debugger)
            .await;

        let err = DebuggerClient::new()
            .exchange(&debugger.uri(), HookType::Request, Bytes::new())
            .await
            .unwrap_err();

        assert!(matches!(err, InterceptError::DebuggerProtocol(_)));
    }

    #[tokio::test]
    async fn test_exchange_bounds_the_reply_size() {
        let debugger = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"body":"far too long"}"#))
            .mount(&debugger)
            .await;

        let err = DebuggerClient::new()
            .with_max_body_bytes(8)
            .exchange(&debugger.uri(), HookType::Reply, Bytes::new())
            .await
            .unwrap_err();

        assert!(matches!(err, InterceptError::BodyTooLarge { limit: 8 }));
    }

    #[tokio::test]
    async fn test_exchange_times_out_on_slow_debugger() {
        let debugger = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"body":"late"}"#)
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&debugger)
            .await;

        let err = DebuggerClient::with_timeout(Duration::from_millis(100))
            .unwrap()
            .exchange(&debugger.uri(), HookType::Receive, Bytes::new())
            .await
            .unwrap_err();

        assert!(matches!(err, InterceptError::DebuggerTransport(ref e) if e.is_timeout()));
    }

    #[tokio::test]
    async fn test_exchange_reports_unreachable_debugger() {
        // Nothing listens on port 9 of the loopback interface
        let err = DebuggerClient::new()
            .exchange("http://127.0.0.1:9/", HookType::Response, Bytes::new())
            .await
            .unwrap_err();

        assert!(matches!(err, InterceptError::DebuggerTransport(_)));
    }
}
