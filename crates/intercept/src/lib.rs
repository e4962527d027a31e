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

//! rpcdb Intercept - breakpoint-driven interception of RPC traffic over HTTP
//!
//! A debugger attaches breakpoints to an exchange through request headers:
//!
//! ```text
//! Debug-Session: http://debugger.local/sessions/42
//! Debug-Breakpoint: receive billing:/charge
//! Debug-Breakpoint: response billing:*
//! ```
//!
//! When a breakpoint matches, the intercepted body is POSTed to the session
//! URL and replaced by the body the debugger answers with. Inbound traffic is
//! intercepted by [`Middleware`] (`receive` and `reply` hooks), outbound calls
//! made from handlers by [`DebugClient`] (`request` and `response` hooks).

pub mod breakpoint;
pub mod client;
pub mod debugger;
pub mod error;
pub mod middleware;
pub mod session;
pub mod trap;

pub use breakpoint::{
    parse_breakpoints, parse_expression, Breakpoint, HookType, ParseError, DEBUG_BREAKPOINT,
    DEBUG_SESSION, RPC_WILDCARD,
};
pub use client::{ClientError, DebugClient};
pub use debugger::{DebuggerBody, DebuggerClient};
pub use error::InterceptError;
pub use middleware::{intercept, is_debug, Middleware, MiddlewareBuilder};
pub use session::{build_session, Breakpoints, Session, SessionBuildError};
pub use trap::{ReplyRecorder, ReplyTrap};
