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

//! Server-side interception middleware.
//!
//! Requests carrying both a `Debug-Breakpoint` and a `Debug-Session` header
//! are debug exchanges: a [`Session`] is built from the headers, the
//! `receive` hook may rewrite the request body, the wrapped handler runs with
//! the session attached, and the `reply` hook may rewrite the response body.
//! Every other request passes through untouched.
//!
//! Any failure along the debug path answers `500` with the error message as
//! a `text/plain` body.
//!
//! [`Session`]: crate::session::Session
//!
//! ```no_run
//! # use axum::{routing::post, Router};
//! # use rpcdb_intercept::middleware::Middleware;
//! # async fn example() -> eyre::Result<()> {
//! let middleware = Middleware::builder("example").max_body_bytes(1 << 20).build()?;
//! let app: Router = middleware.wrap(Router::new().route("/hello", post(|body: String| async { body })));
//! # Ok(())
//! # }
//! ```

use crate::{
    breakpoint::{DEBUG_BREAKPOINT, DEBUG_SESSION},
    debugger::{DebuggerClient, DEFAULT_MAX_BODY_BYTES},
    error::InterceptError,
    session::build_session,
};
use axum::{
    extract::{Request, State},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    middleware::{from_fn_with_state, Next},
    response::{IntoResponse, Response},
    Router,
};
use eyre::Result;
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};

/// Builder for [`Middleware`] with sensible defaults
#[derive(Debug, Clone)]
pub struct MiddlewareBuilder {
    service_name: String,
    debugger_timeout: Option<Duration>,
    max_body_bytes: usize,
    http_client: Option<reqwest::Client>,
}

impl MiddlewareBuilder {
    /// Create a builder for the local service `service_name`
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            // No deadline: a hung debugger holds the exchange
            debugger_timeout: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            http_client: None,
        }
    }

    /// Fail debugger calls that take longer than `timeout`
    pub fn debugger_timeout(mut self, timeout: Duration) -> Self {
        self.debugger_timeout = Some(timeout);
        self
    }

    /// Largest request or reply body that will be buffered for the debugger
    pub fn max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    /// Use an existing HTTP client for debugger calls
    ///
    /// Takes precedence over [`debugger_timeout`](Self::debugger_timeout).
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Build the middleware with the configured settings
    pub fn build(self) -> Result<Middleware> {
        let debugger = match (self.http_client, self.debugger_timeout) {
            (Some(client), _) => DebuggerClient::from_client(client),
            (None, Some(timeout)) => DebuggerClient::with_timeout(timeout)?,
            (None, None) => DebuggerClient::new(),
        };

        Ok(Middleware {
            service_name: self.service_name.into(),
            debugger: debugger.with_max_body_bytes(self.max_body_bytes),
        })
    }
}

/// Interception middleware for one local service
///
/// Cheap to clone; every clone shares the same debugger client.
#[derive(Debug, Clone)]
pub struct Middleware {
    service_name: Arc<str>,
    debugger: DebuggerClient,
}

impl Middleware {
    /// Create a middleware with default settings
    pub fn new(service_name: impl Into<String>) -> Self {
        Self { service_name: service_name.into().into(), debugger: DebuggerClient::new() }
    }

    /// Start configuring a middleware for `service_name`
    pub fn builder(service_name: impl Into<String>) -> MiddlewareBuilder {
        MiddlewareBuilder::new(service_name)
    }

    /// Name breakpoints must use to target this service
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Client used for debugger calls
    pub fn debugger(&self) -> &DebuggerClient {
        &self.debugger
    }

    /// Put the middleware in front of every route of `router`
    ///
    /// Routes and fallback must be added before calling this.
    pub fn wrap<S>(self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router.layer(from_fn_with_state(self, intercept))
    }

    /// Run the debug flow for one request
    ///
    /// Session and `receive` failures return before `next` is invoked.
    async fn debug_flow(&self, request: Request, next: Next) -> Result<Response, InterceptError> {
        let session = build_session(self.service_name.as_ref(), request.headers(), &self.debugger)?;
        debug!(
            service = %self.service_name,
            session_url = session.session_url(),
            breakpoints = session.breakpoints().len(),
            "Debug session started"
        );

        let mut request = session.receive(request).await?;
        let mut trap = session.start_reply(request.uri().path());

        request.extensions_mut().insert(session.clone());
        let response = session.scope(next.run(request)).await;

        trap.capture(response).await?;
        trap.finish_reply().await
    }
}

/// Whether the request asks to be debugged.
///
/// Both a `Debug-Breakpoint` and a `Debug-Session` header are required.
pub fn is_debug(headers: &HeaderMap) -> bool {
    headers.contains_key(DEBUG_BREAKPOINT) && headers.contains_key(DEBUG_SESSION)
}

/// Middleware function for [`axum::middleware::from_fn_with_state`]
pub async fn intercept(
    State(middleware): State<Middleware>,
    request: Request,
    next: Next,
) -> Response {
    if !is_debug(request.headers()) {
        return next.run(request).await;
    }

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    match middleware.debug_flow(request, next).await {
        Ok(response) => response,
        Err(e) => {
            warn!(%method, %path, "Debug exchange failed: {e}");
            error_response(&e)
        }
    }
}

/// `500` with the error message as a plain-text body
fn error_response(err: &InterceptError) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, [(CONTENT_TYPE, "text/plain")], err.to_string())
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_is_debug_requires_both_headers() {
        let mut headers = HeaderMap::new();
        assert!(!is_debug(&headers));

        headers.insert(DEBUG_BREAKPOINT, HeaderValue::from_static("receive example:*"));
        assert!(!is_debug(&headers));

        headers.insert(DEBUG_SESSION, HeaderValue::from_static("http://example/123"));
        assert!(is_debug(&headers));

        headers.remove(DEBUG_BREAKPOINT);
        assert!(!is_debug(&headers));
    }

    #[test]
    fn test_builder_applies_settings() {
        let middleware = Middleware::builder("example")
            .debugger_timeout(Duration::from_secs(3))
            .max_body_bytes(1024)
            .build()
            .unwrap();

        assert_eq!(middleware.service_name(), "example");
        assert_eq!(middleware.debugger().max_body_bytes(), 1024);
        assert_eq!(Middleware::new("other").debugger().max_body_bytes(), DEFAULT_MAX_BODY_BYTES);
    }

    #[test]
    fn test_error_response_shape() {
        let response = error_response(&InterceptError::CaptureDiscipline("boom"));

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain");
    }
}
