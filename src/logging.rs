//! Logging module for rollshot
//!
//! This module provides structured logging functionality with support for:
//! - JSON, pretty and plain format output
//! - Configurable log levels via `RUST_LOG`, the CLI or configuration
//! - Batch and command context spans for structured logging
//!
//! # Usage
//!
//! ```rust,no_run
//! use rollshot::logging;
//!
//! logging::init(Some("debug"), None, None)?;
//!
//! let _span = logging::batch_span("batch-20260101-120000-000").entered();
//! # Ok::<(), rollshot::types::Error>(())
//! ```

use tracing::{info_span, Span};
use tracing_subscriber::{fmt::time::ChronoLocal, EnvFilter};

use crate::config::SystemConfig;
use crate::types::Result;

/// Create a batch context span
pub fn batch_span(batch_id: &str) -> Span {
    info_span!("batch", batch_id = batch_id)
}

/// Create a command context span nested under a batch
pub fn command_span(batch_id: &str, index: usize, name: &str) -> Span {
    info_span!("command", batch_id = batch_id, index = index, command = name)
}

/// Log level enum values as strings for configuration
pub mod level {
    pub const TRACE: &str = "trace";
    pub const DEBUG: &str = "debug";
    pub const INFO: &str = "info";
    pub const WARN: &str = "warn";
    pub const ERROR: &str = "error";
}

/// Log format enum values as strings for configuration
pub mod format {
    pub const JSON: &str = "json";
    pub const PRETTY: &str = "pretty";
    pub const PLAIN: &str = "plain";
}

/// Initialize logging with configuration
///
/// Precedence for both level and format:
///
/// 1. CLI arguments (highest priority)
/// 2. System configuration file
/// 3. Default values (lowest priority)
///
/// `RUST_LOG`, when set, replaces the level filter entirely. Logs go to
/// stderr so the report on stdout stays machine readable.
pub fn init(
    log_level_override: Option<&str>,
    log_format_override: Option<&str>,
    system_config: Option<&SystemConfig>,
) -> Result<()> {
    let log_level = if let Some(level) = log_level_override {
        level
    } else if let Some(config) = system_config {
        &config.logging.level
    } else {
        level::INFO
    };

    let log_format = if let Some(fmt) = log_format_override {
        fmt
    } else if let Some(config) = system_config {
        &config.logging.format
    } else {
        format::PRETTY
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let timer = ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string());

    let result = match log_format {
        format::JSON => tracing_subscriber::fmt()
            .json()
            .with_timer(timer)
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_current_span(true)
            .with_span_list(false)
            .try_init(),
        format::PRETTY => tracing_subscriber::fmt()
            .pretty()
            .with_timer(timer)
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_file(false)
            .with_line_number(false)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .with_timer(timer)
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_file(false)
            .with_line_number(false)
            .try_init(),
    };

    result.map_err(|e| {
        crate::types::Error::Application(format!("Failed to initialize logging: {}", e))
    })
}
