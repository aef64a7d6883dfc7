//! # Logging & Tracing Setup
//!
//! The engine logs through `tracing` everywhere; hosts that do not install
//! their own subscriber call [`init_logging`] once at startup.
//!
//! ```ignore
//! use core_library::logging::{init_logging, LogFormat, LogLevel, LoggingConfig};
//!
//! init_logging(
//!     LoggingConfig::default()
//!         .with_format(LogFormat::Compact)
//!         .with_level(LogLevel::Debug),
//! )?;
//! tracing::info!("library opened");
//! ```

use crate::error::{LibraryError, Result};
use std::io;
use tracing_subscriber::fmt::{self, format::FmtSpan};
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable multi-line output
    Pretty,
    /// Structured JSON for machine parsing
    Json,
    /// Single-line output
    Compact,
}

impl Default for LogFormat {
    fn default() -> Self {
        #[cfg(debug_assertions)]
        return Self::Pretty;

        #[cfg(not(debug_assertions))]
        return Self::Json;
    }
}

/// Minimum level emitted by the engine's own targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Subscriber settings for hosts without their own
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: LogLevel,
    /// Full `EnvFilter` directive string; overrides `level` and
    /// `sql_statements` (e.g. "core_library::paging=trace,sqlx=info")
    pub filter: Option<String>,
    /// Emit span enter/exit for instrumented store and paging calls
    pub enable_spans: bool,
    /// Let sqlx log every executed statement at debug
    pub sql_statements: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: LogLevel::Info,
            filter: None,
            enable_spans: false,
            sql_statements: false,
        }
    }
}

impl LoggingConfig {
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_spans(mut self, enable: bool) -> Self {
        self.enable_spans = enable;
        self
    }

    pub fn with_sql_statements(mut self, enable: bool) -> Self {
        self.sql_statements = enable;
        self
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns `LibraryError::Configuration` when the filter string does not
/// parse or a global subscriber is already installed.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = build_filter(&config)?;
    let span_events = if config.enable_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    // Exactly one of these is Some
    let pretty = (config.format == LogFormat::Pretty).then(|| {
        fmt::layer()
            .pretty()
            .with_span_events(span_events.clone())
            .with_writer(io::stdout)
    });
    let json = (config.format == LogFormat::Json).then(|| {
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(config.enable_spans)
            .with_span_list(false)
            .with_writer(io::stdout)
    });
    let compact = (config.format == LogFormat::Compact).then(|| {
        fmt::layer()
            .compact()
            .with_span_events(span_events)
            .with_writer(io::stdout)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(pretty)
        .with(json)
        .with(compact)
        .try_init()
        .map_err(|e| LibraryError::Configuration(format!("Failed to initialize logging: {}", e)))
}

fn filter_string(config: &LoggingConfig) -> String {
    if let Some(custom) = &config.filter {
        return custom.clone();
    }

    let level = config.level.as_directive();
    let sqlx = if config.sql_statements { "debug" } else { "warn" };
    format!("core_library={level},medialib_workspace={level},sqlx={sqlx}")
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    EnvFilter::try_new(filter_string(config))
        .map_err(|e| LibraryError::Configuration(format!("Invalid log filter: {}", e)))
}
