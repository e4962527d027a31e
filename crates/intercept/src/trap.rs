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

//! Reply capture for the `reply` hook.
//!
//! A [`ReplyTrap`] is created per request by [`Session::start_reply`] and
//! decides once whether the handler's reply goes straight out or is buffered,
//! shown to the debugger and rebuilt around the replacement body.
//!
//! The integrating code drives it in two steps: [`ReplyTrap::capture`] with
//! whatever response the handler produced, then [`ReplyTrap::finish_reply`],
//! which consumes the trap.
//!
//! [`Session::start_reply`]: crate::session::Session::start_reply

use crate::{
    breakpoint::HookType,
    debugger::DebuggerClient,
    error::InterceptError,
    session::{read_body, replace_length_headers},
};
use axum::{
    body::{Body, Bytes},
    http::{response::Parts, HeaderMap, StatusCode},
    response::Response,
};
use tracing::error;

/// A fully buffered handler reply.
#[derive(Debug)]
pub struct ReplyRecorder {
    parts: Parts,
    body: Bytes,
}

impl ReplyRecorder {
    /// Buffers `response`, failing if its body exceeds `limit` bytes.
    pub async fn record(response: Response, limit: usize) -> Result<Self, InterceptError> {
        let (parts, body) = response.into_parts();
        let body = read_body(body, limit).await?;
        Ok(Self { parts, body })
    }

    /// Status code set by the handler.
    pub fn status(&self) -> StatusCode {
        self.parts.status
    }

    /// Headers set by the handler.
    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    /// Body written by the handler.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Recorded status and headers with `body` as the payload.
    fn replay(self, body: String) -> Response {
        let mut parts = self.parts;
        replace_length_headers(&mut parts.headers, body.len());
        Response::from_parts(parts, Body::from(body))
    }
}

enum TrapState {
    /// The handler's reply is passed on as is
    NotCapturing { response: Option<Response> },
    /// The handler's reply is buffered for the debugger
    Capturing { debugger: DebuggerClient, session_url: String, recorder: Option<ReplyRecorder> },
    Finished,
}

/// Per-request reply capture state.
pub struct ReplyTrap {
    state: TrapState,
}

impl std::fmt::Debug for ReplyTrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            TrapState::NotCapturing { .. } => "NotCapturing",
            TrapState::Capturing { .. } => "Capturing",
            TrapState::Finished => "Finished",
        };
        f.debug_struct("ReplyTrap").field("state", &state).finish()
    }
}

impl ReplyTrap {
    pub(crate) fn not_capturing() -> Self {
        Self { state: TrapState::NotCapturing { response: None } }
    }

    pub(crate) fn capturing(debugger: DebuggerClient, session_url: String) -> Self {
        Self { state: TrapState::Capturing { debugger, session_url, recorder: None } }
    }

    /// Whether the reply will be routed through the debugger.
    pub fn is_capturing(&self) -> bool {
        matches!(self.state, TrapState::Capturing { .. })
    }

    /// Hands the handler's reply to the trap.
    ///
    /// When capturing, the reply is buffered; otherwise it is kept untouched
    /// until [`finish_reply`](Self::finish_reply). Capturing twice is a
    /// [`InterceptError::CaptureDiscipline`] error.
    pub async fn capture(&mut self, response: Response) -> Result<(), InterceptError> {
        match &mut self.state {
            TrapState::NotCapturing { response: Some(_) }
            | TrapState::Capturing { recorder: Some(_), .. } => {
                error!("Reply captured twice for one request");
                Err(InterceptError::CaptureDiscipline("reply captured twice"))
            }
            TrapState::NotCapturing { response: slot } => {
                *slot = Some(response);
                Ok(())
            }
            TrapState::Capturing { debugger, recorder, .. } => {
                *recorder = Some(ReplyRecorder::record(response, debugger.max_body_bytes()).await?);
                Ok(())
            }
            TrapState::Finished => Err(InterceptError::CaptureDiscipline("reply already finished")),
        }
    }

    /// Resolves the trap and returns the response to send to the caller.
    ///
    /// A captured reply is POSTed to the debugger, and the recorded status and
    /// headers are sent with the debugger's replacement body instead of the
    /// original one.
    pub async fn finish_reply(mut self) -> Result<Response, InterceptError> {
        match std::mem::replace(&mut self.state, TrapState::Finished) {
            TrapState::NotCapturing { response: Some(response) } => Ok(response),
            TrapState::Capturing { debugger, session_url, recorder: Some(recorder) } => {
                let replacement =
                    debugger.exchange(&session_url, HookType::Reply, recorder.body.clone()).await?;
                Ok(recorder.replay(replacement))
            }
            TrapState::NotCapturing { response: None } | TrapState::Capturing { .. } => {
                error!("Reply finished before the handler produced a response");
                Err(InterceptError::CaptureDiscipline("reply finished before it was captured"))
            }
            TrapState::Finished => Err(InterceptError::CaptureDiscipline("reply already finished")),
        }
    }
}

impl Drop for ReplyTrap {
    fn drop(&mut self) {
        let unfinished = match &self.state {
            TrapState::NotCapturing { response } => response.is_some(),
            TrapState::Capturing { recorder, .. } => recorder.is_some(),
            TrapState::Finished => false,
        };
        if unfinished {
            error!("Reply trap dropped with a captured reply that was never finished");
        }
    }
}
