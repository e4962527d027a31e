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

//! Client-side interception transport.
//!
//! [`DebugClient`] wraps a `reqwest::Client`. Outbound calls made while a
//! [`Session`] is active go through its `request` and `response` hooks; calls
//! made outside of a session are sent as is.

use crate::{error::InterceptError, session::Session};
use reqwest::{header::CONTENT_TYPE, IntoUrl, Request, Response};
use thiserror::Error;
use tracing::trace;

/// Errors returned by [`DebugClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// Building or sending the request failed
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    /// A request or response hook failed
    #[error(transparent)]
    Hook(#[from] InterceptError),
}

/// HTTP client that applies the active session's client-side breakpoints.
#[derive(Debug, Clone, Default)]
pub struct DebugClient {
    http: reqwest::Client,
}

impl DebugClient {
    /// Wraps `http` for outbound calls.
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// The wrapped client.
    pub fn inner(&self) -> &reqwest::Client {
        &self.http
    }

    /// Sends `request` under the ambient session of the current task.
    pub async fn execute(&self, request: Request) -> Result<Response, ClientError> {
        let session = Session::current();
        self.execute_in(session.as_ref(), request).await
    }

    /// Sends `request` under `session`, or as is when `session` is `None`.
    ///
    /// Response breakpoints are matched against the path of the request as
    /// it was before any rewrite.
    pub async fn execute_in(
        &self,
        session: Option<&Session>,
        request: Request,
    ) -> Result<Response, ClientError> {
        let Some(session) = session else {
            return Ok(self.http.execute(request).await?);
        };

        let rpc = request.url().path().to_string();
        trace!(session = session.name(), %rpc, "Sending outbound call under debug session");

        let request = session.request(request).await?;
        let response = self.http.execute(request).await?;
        Ok(session.response(&rpc, response).await?)
    }

    /// `GET url` under the ambient session.
    pub async fn get(&self, url: impl IntoUrl) -> Result<Response, ClientError> {
        let request = self.http.get(url).build()?;
        self.execute(request).await
    }

    /// `POST url` with a `content_type` body under the ambient session.
    pub async fn post(
        &self,
        url: impl IntoUrl,
        content_type: &str,
        body: impl Into<reqwest::Body>,
    ) -> Result<Response, ClientError> {
        let request = self.http.post(url).header(CONTENT_TYPE, content_type).body(body).build()?;
        self.execute(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_url_is_a_transport_error() {
        let err = DebugClient::default().get("not a url").await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
    }

    #[test]
    fn test_hook_errors_keep_their_message() {
        let err = ClientError::from(InterceptError::CaptureDiscipline("boom"));
        assert_eq!(err.to_string(), "reply capture misuse: boom");
    }
}
