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

//! Logging configuration for rpcdb components
//!
//! Provides centralized logging setup with:
//! - Console output with timestamps, targets and source locations
//! - Optional daily-rotated file logging in the system temp directory
//! - Environment variable support (RUST_LOG), defaulting to INFO

use eyre::{eyre, Result};
use std::{env, fs, path::PathBuf, sync::Once};
use tracing::Level;
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    fmt::{self, time::LocalTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Directives appended to the console filter so HTTP plumbing stays quiet.
const QUIET_HTTP_DIRECTIVES: &[&str] = &["hyper=warn", "reqwest=warn", "tower_http=info"];

/// Initialize logging for an rpcdb component
///
/// Console output is always enabled. When `enable_file_logging` is set, a
/// second, uncolored layer writes to `<tmp>/rpcdb-logs/<component>/` with
/// daily rotation.
///
/// # Arguments
/// * `component_name` - Name of the component (e.g., "rpcdb-demo")
/// * `enable_file_logging` - Whether to also log to a file
///
/// # Returns
/// The file writer guard when file logging is enabled. Keep it alive for the
/// lifetime of the process, dropping it flushes and stops the file writer.
pub fn init_logging(
    component_name: &str,
    enable_file_logging: bool,
) -> Result<Option<WorkerGuard>> {
    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(LocalTime::rfc_3339())
        .with_ansi(true)
        .with_filter(console_filter()?);

    if !enable_file_logging {
        tracing_subscriber::registry()
            .with(console_layer)
            .try_init()
            .map_err(|e| eyre!("Failed to initialize tracing subscriber: {e}"))?;

        tracing::info!(component = component_name, "Logging initialized with console output only");
        return Ok(None);
    }

    let log_dir = create_log_directory(component_name)?;
    let file_appender = rolling::daily(&log_dir, format!("{component_name}.log"));
    let (writer, guard) = non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_timer(LocalTime::rfc_3339())
        .with_ansi(false)
        .with_writer(writer)
        .with_filter(default_filter()?);

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| eyre!("Failed to initialize tracing subscriber: {e}"))?;

    tracing::info!(
        component = component_name,
        log_dir = %log_dir.display(),
        "Logging initialized with console and file output"
    );

    Ok(Some(guard))
}

/// Create the log directory for a component in the system temp folder
fn create_log_directory(component_name: &str) -> Result<PathBuf> {
    let log_dir = env::temp_dir().join("rpcdb-logs").join(component_name);
    fs::create_dir_all(&log_dir)?;
    Ok(log_dir)
}

/// RUST_LOG if set, INFO otherwise
fn default_filter() -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| eyre!("Failed to create environment filter: {e}"))
}

fn console_filter() -> Result<EnvFilter> {
    let mut filter = default_filter()?;
    for directive in QUIET_HTTP_DIRECTIVES {
        filter = filter.add_directive(directive.parse()?);
    }
    Ok(filter)
}

/// Initialize compact console-only logging
///
/// Useful for tests and small utilities that don't need file output.
///
/// # Arguments
/// * `level` - The default log level when RUST_LOG is not set
pub fn init_simple_logging(level: Level) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.as_str()))
        .map_err(|e| eyre!("Failed to create environment filter: {e}"))?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_test_writer()
        .compact()
        .try_init()
        .map_err(|e| eyre!("Failed to initialize simple logging: {e}"))?;

    Ok(())
}

static TEST_LOGGING_INIT: Once = Once::new();

/// Logging initialization for tests, safe to call from every test
///
/// Only the first call installs a subscriber; later calls are no-ops.
pub fn ensure_test_logging(default_level: Option<Level>) {
    TEST_LOGGING_INIT.call_once(|| {
        // Another subscriber may already be installed, which is fine for tests
        let _ = init_simple_logging(default_level.unwrap_or(Level::DEBUG));
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{debug, info, warn};

    #[test]
    fn test_logging_functions_work() {
        ensure_test_logging(None);

        info!("Test info message");
        warn!("Test warning message");
        debug!("Test debug message");
    }

    #[test]
    fn test_log_directory_creation() {
        let log_dir = create_log_directory("test-component").unwrap();

        assert!(log_dir.exists());
        assert!(log_dir.to_string_lossy().contains("rpcdb-logs"));
        assert!(log_dir.ends_with("test-component"));
    }

    #[test]
    fn test_console_filter_quiets_http_crates() {
        let rendered = console_filter().unwrap().to_string();
        assert!(rendered.contains("hyper=warn"));
        assert!(rendered.contains("reqwest=warn"));
    }

    #[test]
    fn test_second_initialization_is_an_error_not_a_panic() {
        ensure_test_logging(None);

        // A subscriber is already installed by now
        assert!(init_logging("test-second-init", false).is_err());
        info!("Logging still works after a rejected initialization");
    }
}
