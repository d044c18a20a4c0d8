//! Tracing Infrastructure
//!
//! Structured, async-aware logging built on `tracing` and `tracing-subscriber`:
//! - Structured events with `controller`, `axis` and `run_id` context carried by spans
//! - Multiple output formats (pretty, compact, JSON)
//! - `RUST_LOG` filtering, falling back to the configured level
//!
//! Components do not reach for a global logger on their own: each receives its parent
//! span at construction (`Controller::with_span`, axis spans nested under their
//! controller, executor run spans), and every long-lived task is instrumented with its
//! span. [`init`] installs the subscriber once at startup.
//!
//! # Example
//! ```no_run
//! use galil_sequencer::{config::MotionConfig, logging};
//! use tracing::info;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MotionConfig::load()?;
//! logging::init_from_config(&config)?;
//! info!("Application started");
//! # Ok(())
//! # }
//! ```

use crate::config::MotionConfig;
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{
    filter::LevelFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Line format of the `fmt` layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Multi-line, colored (development)
    Pretty,
    /// One line per event
    Compact,
    /// Newline-delimited JSON (log aggregation)
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(OutputFormat::Pretty),
            "compact" => Ok(OutputFormat::Compact),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!(
                "Invalid log format '{s}'. Must be one of: pretty, compact, json"
            )),
        }
    }
}

/// Subscriber settings.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Level used when `RUST_LOG` is unset or unparsable
    pub level: Level,
    /// Line format
    pub format: OutputFormat,
    /// Log span open/close (useful to follow axis workers and runs)
    pub span_events: bool,
    /// Source location on every event
    pub file_and_line: bool,
    /// ANSI colors, Pretty only
    pub ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Pretty,
            span_events: false,
            file_and_line: false,
            ansi: true,
        }
    }
}

impl TracingConfig {
    /// Reads `application.log_level` and `application.log_format`.
    pub fn from_config(config: &MotionConfig) -> Result<Self, String> {
        let level = Level::from_str(&config.application.log_level)
            .map_err(|_| format!("Invalid log level '{}'", config.application.log_level))?;
        Ok(Self {
            level,
            format: config.application.log_format.parse()?,
            ..Default::default()
        })
    }

    /// Set output format
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::builder()
            .with_default_directive(LevelFilter::from_level(self.level).into())
            .from_env_lossy()
    }
}

/// Initialize tracing from the application configuration
pub fn init_from_config(config: &MotionConfig) -> Result<(), String> {
    init(TracingConfig::from_config(config)?)
}

/// Installs the global subscriber. A no-op when one is already installed.
pub fn init(config: TracingConfig) -> Result<(), String> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }

    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };
    let base = fmt::layer()
        .with_span_events(span_events)
        .with_file(config.file_and_line)
        .with_line_number(config.file_and_line);

    let filter = config.filter();
    let layer = match config.format {
        OutputFormat::Pretty => base.pretty().with_ansi(config.ansi).with_filter(filter).boxed(),
        OutputFormat::Compact => base.compact().with_ansi(false).with_filter(filter).boxed(),
        OutputFormat::Json => base.json().with_filter(filter).boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| format!("Failed to initialize tracing: {e}"))
}
