//! Structured logging infrastructure for DCF.
//!
//! This module provides centralized logging initialization with support
//! for structured JSON output, environment-based configuration and a
//! runtime-adjustable level. Logs go to stderr so command output on stdout
//! stays parseable.

use std::fmt;
use std::str::FromStr;

use tracing_subscriber::{
    fmt as tracing_fmt, layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry,
};

use crate::error::DcfError;

/// Verbosity levels exposed on the command surface.
///
/// Numeric forms follow the SDK convention: `0 = debug`, `1 = info`,
/// `2 = error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Error,
}

impl LogLevel {
    /// Numeric form of the level.
    pub fn as_number(&self) -> u8 {
        match self {
            LogLevel::Debug => 0,
            LogLevel::Info => 1,
            LogLevel::Error => 2,
        }
    }

    fn directive(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.directive())
    }
}

impl TryFrom<u8> for LogLevel {
    type Error = DcfError;

    fn try_from(value: u8) -> Result<Self, DcfError> {
        match value {
            0 => Ok(LogLevel::Debug),
            1 => Ok(LogLevel::Info),
            2 => Ok(LogLevel::Error),
            other => Err(DcfError::InvalidArgument(format!(
                "log level must be 0, 1 or 2, got {}",
                other
            ))),
        }
    }
}

impl FromStr for LogLevel {
    type Err = DcfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "error" => Ok(LogLevel::Error),
            other => {
                let number: u8 = other
                    .parse()
                    .map_err(|_| DcfError::InvalidArgument(format!("invalid log level: {}", s)))?;
                LogLevel::try_from(number)
            }
        }
    }
}

/// Handle for changing the active filter after initialization.
#[derive(Clone)]
pub struct LogHandle {
    handle: reload::Handle<EnvFilter, Registry>,
}

impl fmt::Debug for LogHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogHandle").finish_non_exhaustive()
    }
}

impl LogHandle {
    /// Replace the active filter with `level`.
    pub fn set_level(&self, level: LogLevel) -> Result<(), DcfError> {
        self.handle
            .reload(EnvFilter::new(level.directive()))
            .map_err(|e| DcfError::InvalidArgument(format!("failed to apply log level: {}", e)))
    }
}

fn initial_filter(level: Option<LogLevel>) -> EnvFilter {
    match level {
        Some(level) => EnvFilter::new(level.directive()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    }
}

/// Initialize the logging system with human-readable output.
///
/// When `level` is `None` the filter comes from `RUST_LOG`, defaulting to
/// `info`. Returns `None` if a global subscriber is already installed.
///
/// # Example
/// ```no_run
/// use dcf_core::logging;
///
/// let handle = logging::init(None);
/// tracing::info!("node started");
/// # drop(handle);
/// ```
pub fn init(level: Option<LogLevel>) -> Option<LogHandle> {
    let (filter, handle) = reload::Layer::new(initial_filter(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .ok()
        .map(|_| LogHandle { handle })
}

/// Initialize the logging system with JSON output.
///
/// This format is suitable for log aggregation systems and structured log
/// analysis. Filter selection matches [`init`].
pub fn init_json(level: Option<LogLevel>) -> Option<LogHandle> {
    let (filter, handle) = reload::Layer::new(initial_filter(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .ok()
        .map(|_| LogHandle { handle })
}
