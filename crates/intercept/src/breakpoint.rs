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

//! Breakpoint expressions and the headers that carry them.
//!
//! A breakpoint expression has the form `<hook> <service>:<rpc>`, for example
//! `receive example:/hello` or `reply billing:*`. Each value of the repeated
//! [`DEBUG_BREAKPOINT`] header holds exactly one expression.

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use std::{fmt::Display, str::FromStr};
use thiserror::Error;

/// Repeated header carrying one breakpoint expression per value.
pub const DEBUG_BREAKPOINT: HeaderName = HeaderName::from_static("debug-breakpoint");

/// Header carrying the debugger callback URL for the exchange.
pub const DEBUG_SESSION: HeaderName = HeaderName::from_static("debug-session");

/// RPC name matching every call of a service.
pub const RPC_WILDCARD: &str = "*";

/// Errors produced while parsing breakpoint expressions and debug headers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The expression is not of the form `<hook> <service>:<rpc>`
    #[error("unable to parse breakpoint expression '{0}'")]
    Format(String),
    /// The hook word is not one of `receive`, `reply`, `request`, `response`
    #[error("unknown hook type: {0}")]
    UnknownHook(String),
    /// A debug header value is not visible ASCII
    #[error("invalid {0} header value")]
    InvalidHeader(String),
}

/// Phase of an RPC exchange at which a breakpoint fires.
///
/// `Receive` and `Reply` are the phases of a server handling an inbound call,
/// `Request` and `Response` the phases of a client issuing an outbound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookType {
    /// Server received a request
    Receive,
    /// Server is about to send its reply
    Reply,
    /// Client is about to send a request
    Request,
    /// Client received a response
    Response,
}

impl HookType {
    /// All hook types, in exchange order.
    pub const ALL: [Self; 4] = [Self::Receive, Self::Reply, Self::Request, Self::Response];

    /// Canonical name used in expressions and error messages.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Receive => "receive",
            Self::Reply => "reply",
            Self::Request => "request",
            Self::Response => "response",
        }
    }
}

impl Display for HookType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|hook| hook.as_str() == s)
            .ok_or_else(|| ParseError::UnknownHook(s.to_string()))
    }
}

/// A parsed breakpoint expression.
///
/// Breakpoints are only created by parsing and never change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Breakpoint {
    hook: HookType,
    service_name: String,
    rpc_name: String,
}

impl Breakpoint {
    /// Phase this breakpoint pauses.
    pub fn hook(&self) -> HookType {
        self.hook
    }

    /// Logical service the breakpoint applies to.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Request path the breakpoint applies to, or [`RPC_WILDCARD`].
    pub fn rpc_name(&self) -> &str {
        &self.rpc_name
    }

    /// Whether this breakpoint applies to `rpc` on `service`.
    ///
    /// Service names compare exactly; the RPC name compares exactly unless it
    /// is the wildcard.
    pub fn matches(&self, service: &str, rpc: &str) -> bool {
        self.service_name == service && (self.rpc_name == rpc || self.rpc_name == RPC_WILDCARD)
    }
}

impl Display for Breakpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}:{}", self.hook, self.service_name, self.rpc_name)
    }
}

impl FromStr for Breakpoint {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_expression(s)
    }
}

/// `[A-Za-z0-9_]+`
fn is_word(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Parses a single breakpoint expression.
///
/// Format: `<hook> <space>+ <service>:<rpc>`, where hook and service are word
/// characters and rpc is the rest of the line. Surrounding whitespace is
/// ignored.
pub fn parse_expression(expr: &str) -> Result<Breakpoint, ParseError> {
    let malformed = || ParseError::Format(expr.to_string());

    let (hook, rest) = expr.trim().split_once(char::is_whitespace).ok_or_else(malformed)?;
    let (service, rpc) = rest.trim_start().split_once(':').ok_or_else(malformed)?;

    if !is_word(hook) || !is_word(service) || rpc.is_empty() || rpc.contains(['\n', '\r']) {
        return Err(malformed());
    }

    Ok(Breakpoint {
        hook: hook.parse()?,
        service_name: service.to_string(),
        rpc_name: rpc.to_string(),
    })
}

/// Parses one header value, rejecting values that are not visible ASCII.
pub(crate) fn parse_header_value(value: &HeaderValue) -> Result<Breakpoint, ParseError> {
    match value.to_str() {
        Ok(expr) => parse_expression(expr),
        Err(_) => Err(ParseError::Format(String::from_utf8_lossy(value.as_bytes()).into_owned())),
    }
}

/// Parses every [`DEBUG_BREAKPOINT`] value in `headers`, in header order.
///
/// Stops at the first malformed expression and returns its error.
pub fn parse_breakpoints(headers: &HeaderMap) -> Result<Vec<Breakpoint>, ParseError> {
    headers.get_all(DEBUG_BREAKPOINT).iter().map(parse_header_value).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_receive_expression() {
        let bp = parse_expression("receive example:/hello").unwrap();

        assert_eq!(bp.hook(), HookType::Receive);
        assert_eq!(bp.service_name(), "example");
        assert_eq!(bp.rpc_name(), "/hello");
    }

    #[test]
    fn test_parse_every_hook_type() {
        for hook in HookType::ALL {
            let bp = parse_expression(&format!("{hook} svc_1:/a/b")).unwrap();
            assert_eq!(bp.hook(), hook);
            assert_eq!(bp.service_name(), "svc_1");
            assert_eq!(bp.rpc_name(), "/a/b");
        }
    }

    #[test]
    fn test_parse_wildcard_and_rest_of_line() {
        let bp = parse_expression("reply example:*").unwrap();
        assert_eq!(bp.rpc_name(), RPC_WILDCARD);

        // The rpc part is everything after the first colon
        let bp = parse_expression("request example:/v1/items:batchGet").unwrap();
        assert_eq!(bp.service_name(), "example");
        assert_eq!(bp.rpc_name(), "/v1/items:batchGet");
    }

    #[test]
    fn test_parse_tolerates_extra_whitespace() {
        let bp = parse_expression("  response \t example:/hello ").unwrap();
        assert_eq!(bp.hook(), HookType::Response);
        assert_eq!(bp.service_name(), "example");
        assert_eq!(bp.rpc_name(), "/hello");
    }

    #[test]
    fn test_parse_unknown_hook() {
        let err = parse_expression("buggy example:*").unwrap_err();
        assert_eq!(err, ParseError::UnknownHook("buggy".to_string()));
        assert_eq!(err.to_string(), "unknown hook type: buggy");

        // Hook names are case-sensitive
        assert!(matches!(parse_expression("Receive example:*"), Err(ParseError::UnknownHook(_))));
    }

    #[test]
    fn test_parse_malformed_expressions() {
        for expr in [
            "",
            "receive",
            "receive example",
            "receive example:",
            "receiveexample:/hello",
            "receive :/hello",
            "receive exa-mple:/hello",
            "receive example /hello",
            "re-ceive example:/hello",
            "receive example:/a\n/b",
        ] {
            assert!(
                matches!(parse_expression(expr), Err(ParseError::Format(_))),
                "expected format error for {expr:?}"
            );
        }

        assert_eq!(
            parse_expression("nonsense").unwrap_err().to_string(),
            "unable to parse breakpoint expression 'nonsense'"
        );
    }

    #[test]
    fn test_breakpoint_display_round_trips() {
        let bp: Breakpoint = "reply example:/hello".parse().unwrap();
        assert_eq!(bp.to_string(), "reply example:/hello");
        assert_eq!(bp.to_string().parse::<Breakpoint>().unwrap(), bp);
    }

    #[test]
    fn test_breakpoint_matching() {
        let exact = parse_expression("receive example:/hello").unwrap();
        assert!(exact.matches("example", "/hello"));
        assert!(!exact.matches("example", "/hello/"));
        assert!(!exact.matches("other", "/hello"));

        let wildcard = parse_expression("receive example:*").unwrap();
        assert!(wildcard.matches("example", "/anything"));
        assert!(wildcard.matches("example", "/"));
        assert!(!wildcard.matches("other", "/anything"));

        // Only the rpc side has a wildcard
        assert!(!exact.matches("*", "/hello"));
    }

    #[test]
    fn test_parse_breakpoints_in_header_order() {
        let mut headers = HeaderMap::new();
        headers.append(DEBUG_BREAKPOINT, HeaderValue::from_static("reply example:/b"));
        headers.append(DEBUG_BREAKPOINT, HeaderValue::from_static("receive example:/a"));
        headers.append(DEBUG_SESSION, HeaderValue::from_static("http://debugger/1"));

        let bps = parse_breakpoints(&headers).unwrap();
        assert_eq!(bps.len(), 2);
        assert_eq!(bps[0].to_string(), "reply example:/b");
        assert_eq!(bps[1].to_string(), "receive example:/a");
    }

    #[test]
    fn test_parse_breakpoints_stops_at_first_error() {
        let mut headers = HeaderMap::new();
        headers.append(DEBUG_BREAKPOINT, HeaderValue::from_static("receive example:/a"));
        headers.append(DEBUG_BREAKPOINT, HeaderValue::from_static("bogus"));
        headers.append(DEBUG_BREAKPOINT, HeaderValue::from_static("wat example:/c"));

        assert_eq!(
            parse_breakpoints(&headers).unwrap_err(),
            ParseError::Format("bogus".to_string())
        );
    }

    #[test]
    fn test_parse_breakpoints_without_header() {
        assert!(parse_breakpoints(&HeaderMap::new()).unwrap().is_empty());
    }
}
