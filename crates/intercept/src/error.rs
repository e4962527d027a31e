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

//! Errors raised while intercepting an exchange.

use crate::session::SessionBuildError;
use reqwest::StatusCode;
use thiserror::Error;

/// Boxed error used for body read failures from either HTTP stack.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while a debug exchange is being intercepted.
///
/// None of these are retried. The server middleware turns every variant into
/// a plain-text 500 response; the client transport hands it back to the caller.
#[derive(Debug, Error)]
pub enum InterceptError {
    /// The debug headers could not be turned into a session
    #[error(transparent)]
    Session(#[from] SessionBuildError),
    /// Reading an intercepted request or response body failed
    #[error("error reading body: {0}")]
    Body(#[source] BoxError),
    /// An intercepted body is larger than the configured limit
    #[error("body exceeds the interception limit of {limit} bytes")]
    BodyTooLarge {
        /// Configured limit in bytes
        limit: usize,
    },
    /// The debugger endpoint could not be reached or its reply could not be read
    #[error("error calling debugger: {0}")]
    DebuggerTransport(#[source] reqwest::Error),
    /// The debugger answered with a non-2xx status
    #[error("debugger responded with status {0}")]
    DebuggerStatus(StatusCode),
    /// The debugger answered 2xx but the body is not `{"body": "..."}`
    #[error("unable to parse debugger response: {0}")]
    DebuggerProtocol(#[source] serde_json::Error),
    /// The reply trap was driven out of order by the integrating code
    #[error("reply capture misuse: {0}")]
    CaptureDiscipline(&'static str),
}

impl InterceptError {
    /// Whether the failure happened while talking to the debugger.
    pub fn is_debugger_failure(&self) -> bool {
        matches!(
            self,
            Self::DebuggerTransport(_) | Self::DebuggerStatus(_) | Self::DebuggerProtocol(_)
        )
    }
}
