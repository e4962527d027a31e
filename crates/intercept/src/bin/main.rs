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

//! rpcdb demo server
//!
//! Echoes every request back as a plain-text dump, behind the interception
//! middleware. Point a debugger at it with `Debug-Session` and
//! `Debug-Breakpoint` headers to watch bodies being rewritten.

use axum::{
    body::Bytes,
    http::{HeaderMap, Method, Uri, Version},
    Router,
};
use clap::Parser;
use eyre::Result;
use rpcdb_common::init_logging;
use rpcdb_intercept::{debugger::DEFAULT_MAX_BODY_BYTES, Middleware};
use std::{
    fmt::Write as _,
    net::{IpAddr, SocketAddr},
    str::FromStr,
    time::Duration,
};
use tower_http::trace::TraceLayer;
use tracing::info;

/// rpcdb demo echo server
#[derive(Parser, Debug)]
#[command(name = "rpcdb-demo")]
#[command(about = "Echo server behind the rpcdb interception middleware")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(long, env = "RPCDB_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(long, env = "RPCDB_PORT", default_value = "3000")]
    port: u16,

    /// Service name breakpoints must use to target this server
    #[arg(long, env = "RPCDB_SERVICE_NAME", default_value = "example")]
    service_name: String,

    /// Debugger call timeout in seconds (no timeout if unset)
    #[arg(long, env = "RPCDB_DEBUGGER_TIMEOUT")]
    debugger_timeout: Option<u64>,

    /// Largest body buffered for interception
    #[arg(long, env = "RPCDB_MAX_BODY_BYTES", default_value_t = DEFAULT_MAX_BODY_BYTES)]
    max_body_bytes: usize,

    /// Also write logs to a daily rolling file
    #[arg(long)]
    log_file: bool,

    /// Verbosity level (repeat for more: -v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set RUST_LOG based on verbosity
    if std::env::var("RUST_LOG").is_err() {
        let level = match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        std::env::set_var("RUST_LOG", level);
    }
    let _guard = init_logging("rpcdb-demo", args.log_file)?;

    let mut builder = Middleware::builder(&args.service_name).max_body_bytes(args.max_body_bytes);
    if let Some(secs) = args.debugger_timeout {
        builder = builder.debugger_timeout(Duration::from_secs(secs));
    }
    let middleware = builder.build()?;

    let app =
        middleware.wrap(Router::new().fallback(dump_request)).layer(TraceLayer::new_for_http());

    let ip = IpAddr::from_str(&args.host)?;
    let addr = SocketAddr::from((ip, args.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(service = %args.service_name, "Starting rpcdb demo server on {addr}");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    info!("Server stopped");
    Ok(())
}

/// Writes the request back the way it arrived at the handler.
async fn dump_request(
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
) -> String {
    let mut dump = format!("{method} {uri} {version:?}\r\n");
    for (name, value) in &headers {
        let _ = write!(dump, "{name}: {}\r\n", String::from_utf8_lossy(value.as_bytes()));
    }
    dump.push_str("\r\n");
    dump.push_str(&String::from_utf8_lossy(&body));
    dump
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Received shutdown signal");
    }
}
