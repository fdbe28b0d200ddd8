//! Integrix Logging
//!
//! Installs a `tracing` subscriber configured from the environment. Every
//! Integrix crate logs through the `tracing` macros; this crate only decides
//! where those events go and in what shape.
//!
//! # Usage
//!
//! ```rust,no_run
//! integrix_log::init();
//! tracing::info!(service = "billing", "coordinator started");
//! ```
//!
//! # Environment Variables
//!
//! - `INTEGRIX_DEBUG=1` - Enable debug logging
//! - `INTEGRIX_LOG_LEVEL=trace|debug|info|warn|error|off` - Set log level
//! - `INTEGRIX_LOG_FORMAT=json|pretty|compact` - Set output format (default json)
//! - `INTEGRIX_LOG_COLOR=1|0` - Enable/disable ANSI colors
//! - `RUST_LOG` - Takes precedence over `INTEGRIX_LOG_LEVEL` when set

use std::env;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

// ============================================================================
// Log Levels
// ============================================================================

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Off,
}

impl Level {
    /// Get level from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Some(Level::Trace),
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" | "warning" => Some(Level::Warn),
            "error" => Some(Level::Error),
            "off" | "none" => Some(Level::Off),
            _ => None,
        }
    }

    /// Directive understood by `EnvFilter`.
    pub fn as_directive(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Off => "off",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_directive())
    }
}

// ============================================================================
// Log Format
// ============================================================================

/// Output format for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Multi-line human readable output
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON lines for log shippers
    Json,
}

impl Format {
    /// Get format from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pretty" => Some(Format::Pretty),
            "compact" => Some(Format::Compact),
            "json" => Some(Format::Json),
            _ => None,
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Minimum log level
    pub level: Level,
    /// Output format
    pub format: Format,
    /// Whether ANSI colors are enabled
    pub color: bool,
    /// Whether to include the event target (module path)
    pub targets: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::Info,
            format: Format::Json,
            color: false,
            targets: true,
        }
    }
}

impl LogConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |key: &str| {
            lookup(key).map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        };

        let debug = flag("INTEGRIX_DEBUG").unwrap_or(false);

        let level = lookup("INTEGRIX_LOG_LEVEL")
            .and_then(|s| Level::parse(&s))
            .unwrap_or(if debug { Level::Debug } else { Level::Info });

        let format = lookup("INTEGRIX_LOG_FORMAT")
            .and_then(|s| Format::parse(&s))
            .unwrap_or(Format::Json);

        let color = flag("INTEGRIX_LOG_COLOR")
            .unwrap_or_else(|| format != Format::Json && lookup("NO_COLOR").is_none());

        let targets = flag("INTEGRIX_LOG_TARGETS").unwrap_or(true);

        Self {
            level,
            format,
            color,
            targets,
        }
    }

    /// Set the minimum level.
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Set the output format.
    pub fn format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Build the `EnvFilter` for this configuration. `RUST_LOG` wins when set.
    pub fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.level.as_directive()))
    }

    /// Install this configuration as the global subscriber.
    pub fn try_init(&self) -> Result<(), LogError> {
        let registry = tracing_subscriber::registry().with(self.filter());
        let layer = fmt::layer()
            .with_ansi(self.color)
            .with_target(self.targets)
            .with_writer(std::io::stderr);

        let result = match self.format {
            Format::Pretty => registry.with(layer.pretty()).try_init(),
            Format::Compact => registry.with(layer.compact()).try_init(),
            #[cfg(feature = "json")]
            Format::Json => registry.with(layer.json()).try_init(),
            #[cfg(not(feature = "json"))]
            Format::Json => registry.with(layer).try_init(),
        };

        result.map_err(|e| LogError::AlreadyInitialized(e.to_string()))
    }
}

/// Logging setup errors.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("A global subscriber is already installed: {0}")]
    AlreadyInitialized(String),
}

// ============================================================================
// Public API
// ============================================================================

/// Initialize logging from the environment.
///
/// Calling this more than once is harmless; later calls keep the first
/// subscriber.
pub fn init() {
    if let Err(e) = try_init() {
        tracing::debug!("Logging already initialized: {}", e);
    }
}

/// Initialize logging from the environment, reporting a second installation.
pub fn try_init() -> Result<(), LogError> {
    LogConfig::from_env().try_init()
}

// ============================================================================
// Tests
// ============================================================================
