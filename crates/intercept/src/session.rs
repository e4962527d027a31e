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

//! Per-exchange debug sessions.
//!
//! A [`Session`] is built from the `Debug-Session` and `Debug-Breakpoint`
//! headers of one inbound request. It knows which breakpoints apply to which
//! hook and runs the debugger round trip when one of them matches:
//!
//! - [`Session::receive`] and [`Session::start_reply`] on the server side
//! - [`Session::request`] and [`Session::response`] on the client side
//!
//! Sessions are never shared between exchanges. Within an exchange the
//! active session travels as ambient task-local context, see
//! [`Session::scope`] and [`Session::current`].

use crate::{
    breakpoint::{
        parse_header_value, Breakpoint, HookType, ParseError, DEBUG_BREAKPOINT, DEBUG_SESSION,
    },
    debugger::DebuggerClient,
    error::{BoxError, InterceptError},
    trap::ReplyTrap,
};
use axum::{
    body::{Body, Bytes, HttpBody},
    extract::Request,
    http::{
        header::{CONTENT_LENGTH, TRANSFER_ENCODING},
        HeaderMap, HeaderValue,
    },
};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use std::future::Future;
use thiserror::Error;
use tracing::debug;

tokio::task_local! {
    static CURRENT_SESSION: Session;
}

/// Session construction failed on a malformed breakpoint expression.
///
/// The breakpoints parsed before the failing one are kept in `partial`, so a
/// caller may still continue on a best-effort basis.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct SessionBuildError {
    /// Session holding every breakpoint parsed before the error
    pub partial: Box<Session>,
    /// The parse failure
    pub source: ParseError,
}

/// Breakpoints of one session, bucketed by hook type in header order.
#[derive(Debug, Clone, Default)]
pub struct Breakpoints {
    receive: Vec<Breakpoint>,
    reply: Vec<Breakpoint>,
    request: Vec<Breakpoint>,
    response: Vec<Breakpoint>,
}

impl Breakpoints {
    fn push(&mut self, bp: Breakpoint) {
        match bp.hook() {
            HookType::Receive => self.receive.push(bp),
            HookType::Reply => self.reply.push(bp),
            HookType::Request => self.request.push(bp),
            HookType::Response => self.response.push(bp),
        }
    }

    /// Breakpoints registered for `hook`, in header order.
    pub fn of(&self, hook: HookType) -> &[Breakpoint] {
        match hook {
            HookType::Receive => &self.receive,
            HookType::Reply => &self.reply,
            HookType::Request => &self.request,
            HookType::Response => &self.response,
        }
    }

    /// Total number of breakpoints across all hooks.
    pub fn len(&self) -> usize {
        HookType::ALL.iter().map(|hook| self.of(*hook).len()).sum()
    }

    /// Whether no breakpoint is registered at all.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The breakpoints and debugger endpoint attached to one HTTP exchange.
#[derive(Debug, Clone)]
pub struct Session {
    name: String,
    session_url: String,
    breakpoints: Breakpoints,
    debugger: DebuggerClient,
}

/// Builds a session for the local service `name` from request headers.
///
/// Header names are matched case-insensitively. Breakpoints are bucketed by
/// hook type in the order their header values appear. A `Debug-Session`
/// value that is not visible ASCII fails the build before any breakpoint is
/// parsed.
pub fn build_session(
    name: impl Into<String>,
    headers: &HeaderMap,
    debugger: &DebuggerClient,
) -> Result<Session, SessionBuildError> {
    let mut session = Session {
        name: name.into(),
        session_url: String::new(),
        breakpoints: Breakpoints::default(),
        debugger: debugger.clone(),
    };

    if let Some(value) = headers.get(DEBUG_SESSION) {
        match value.to_str() {
            Ok(url) => session.session_url = url.to_string(),
            Err(_) => {
                let source = ParseError::InvalidHeader(DEBUG_SESSION.to_string());
                return Err(SessionBuildError { partial: Box::new(session), source });
            }
        }
    }

    for value in headers.get_all(DEBUG_BREAKPOINT) {
        match parse_header_value(value) {
            Ok(bp) => session.breakpoints.push(bp),
            Err(source) => return Err(SessionBuildError { partial: Box::new(session), source }),
        }
    }

    Ok(session)
}

impl Session {
    /// Name of the local service this session runs in.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Debugger callback URL.
    pub fn session_url(&self) -> &str {
        &self.session_url
    }

    /// All breakpoints of the session.
    pub fn breakpoints(&self) -> &Breakpoints {
        &self.breakpoints
    }

    /// First breakpoint of `hook` matching this service and `rpc`.
    pub fn first_match(&self, hook: HookType, rpc: &str) -> Option<&Breakpoint> {
        self.breakpoints.of(hook).iter().find(|bp| bp.matches(&self.name, rpc))
    }

    /// Runs `fut` with this session as the ambient session of the task.
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        CURRENT_SESSION.scope(self, fut).await
    }

    /// The ambient session of the current task, if one was attached.
    pub fn current() -> Option<Self> {
        CURRENT_SESSION.try_with(Clone::clone).ok()
    }

    /// Applies the first matching `receive` breakpoint to an inbound request.
    ///
    /// On a match the body is sent to the debugger and the request is rebuilt
    /// around the replacement, keeping method, URI, headers and extensions.
    /// Without a match the request is returned untouched and its body is
    /// never read.
    pub async fn receive(&self, request: Request) -> Result<Request, InterceptError> {
        let Some(bp) = self.first_match(HookType::Receive, request.uri().path()) else {
            return Ok(request);
        };
        debug!(breakpoint = %bp, "Receive breakpoint hit");

        let (mut parts, body) = request.into_parts();
        let body = read_body(body, self.debugger.max_body_bytes()).await?;
        let replacement =
            self.debugger.exchange(&self.session_url, HookType::Receive, body).await?;

        replace_length_headers(&mut parts.headers, replacement.len());
        Ok(Request::from_parts(parts, Body::from(replacement)))
    }

    /// Prepares the reply trap for an inbound request to `path`.
    ///
    /// The trap captures the handler's reply only when a `reply` breakpoint
    /// matches; the decision is final.
    pub fn start_reply(&self, path: &str) -> ReplyTrap {
        match self.first_match(HookType::Reply, path) {
            Some(bp) => {
                debug!(breakpoint = %bp, "Reply breakpoint hit, capturing reply");
                ReplyTrap::capturing(self.debugger.clone(), self.session_url.clone())
            }
            None => ReplyTrap::not_capturing(),
        }
    }

    /// Applies the first matching `request` breakpoint to an outbound request.
    ///
    /// Outbound requests are matched on their URL path.
    pub async fn request(
        &self,
        mut request: reqwest::Request,
    ) -> Result<reqwest::Request, InterceptError> {
        let Some(bp) = self.first_match(HookType::Request, request.url().path()) else {
            return Ok(request);
        };
        debug!(breakpoint = %bp, url = %request.url(), "Request breakpoint hit");

        let limit = self.debugger.max_body_bytes();
        let body = match request.body() {
            None => Bytes::new(),
            Some(body) => match body.as_bytes() {
                Some(bytes) if bytes.len() > limit => {
                    return Err(InterceptError::BodyTooLarge { limit })
                }
                Some(bytes) => Bytes::copy_from_slice(bytes),
                None => {
                    return Err(InterceptError::Body(
                        "streaming request bodies cannot be intercepted".into(),
                    ))
                }
            },
        };
        let replacement =
            self.debugger.exchange(&self.session_url, HookType::Request, body).await?;

        replace_length_headers(request.headers_mut(), replacement.len());
        *request.body_mut() = Some(reqwest::Body::from(replacement));
        Ok(request)
    }

    /// Applies the first matching `response` breakpoint to the response of
    /// the outbound call to `rpc`.
    ///
    /// Status, version and headers are preserved; only the body is replaced.
    pub async fn response(
        &self,
        rpc: &str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, InterceptError> {
        let Some(bp) = self.first_match(HookType::Response, rpc) else {
            return Ok(response);
        };
        debug!(breakpoint = %bp, status = %response.status(), "Response breakpoint hit");

        let status = response.status();
        let version = response.version();
        let mut headers = response.headers().clone();
        let body = read_body(reqwest::Body::from(response), self.debugger.max_body_bytes()).await?;
        let replacement =
            self.debugger.exchange(&self.session_url, HookType::Response, body).await?;

        replace_length_headers(&mut headers, replacement.len());
        let mut rebuilt = axum::http::Response::new(replacement);
        *rebuilt.status_mut() = status;
        *rebuilt.version_mut() = version;
        *rebuilt.headers_mut() = headers;
        Ok(reqwest::Response::from(rebuilt))
    }
}

/// Buffers a body from either HTTP stack, failing past `limit` bytes.
pub(crate) async fn read_body<B>(body: B, limit: usize) -> Result<Bytes, InterceptError>
where
    B: HttpBody<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<LengthLimitError>() => Err(InterceptError::BodyTooLarge { limit }),
        Err(e) => Err(InterceptError::Body(e)),
    }
}

/// Keeps framing headers consistent with a replaced body of `len` bytes.
pub(crate) fn replace_length_headers(headers: &mut HeaderMap, len: usize) {
    headers.remove(TRANSFER_ENCODING);
    if headers.contains_key(CONTENT_LENGTH) {
        headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
    }
}
