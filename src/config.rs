//! Configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/galil.toml` (or an explicit path)
//! 2. Environment variables prefixed with `GALIL_SEQ_`, with `__` separating
//!    nested keys, e.g. `GALIL_SEQ_APPLICATION__LOG_LEVEL=debug` or
//!    `GALIL_SEQ_TIMING__WAIT_TIMEOUT_MS=30000`
//!
//! # Example
//! ```no_run
//! use galil_sequencer::config::MotionConfig;
//!
//! let config = MotionConfig::load()?;
//! config.validate()?;
//! println!("Application: {}", config.application.name);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::axis::AxisTiming;
use crate::error::{AppResult, MotionError};
use crate::hardware::galil::WaitPolicy;
use crate::hardware::protocol::AxisLetter;
use crate::hardware::transport::DEFAULT_BAUD;
use crate::program::ExecutorTiming;
use crate::validation;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/galil.toml";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Polling and scheduling intervals
    #[serde(default)]
    pub timing: TimingConfig,
    /// Controller links
    #[serde(default)]
    pub controllers: Vec<ControllerDefinition>,
    /// Axes bound to controllers
    #[serde(default)]
    pub axes: Vec<AxisDefinition>,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Scheduling intervals, all in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Sleep after each axis task
    #[serde(default = "default_worker_quantum")]
    pub worker_quantum_ms: u64,
    /// Axis worker poll while its queue is empty
    #[serde(default = "default_worker_idle")]
    pub worker_idle_ms: u64,
    /// Executor clock poll
    #[serde(default = "default_playback_poll")]
    pub playback_poll_ms: u64,
    /// Inter-iteration completion barrier poll
    #[serde(default = "default_barrier_poll")]
    pub barrier_poll_ms: u64,
    /// Motion-complete poll
    #[serde(default = "default_motion_poll")]
    pub motion_poll_ms: u64,
    /// Torque predicate poll
    #[serde(default = "default_torque_poll")]
    pub torque_poll_ms: u64,
    /// Timeout for motion and torque waits (0 = wait indefinitely)
    #[serde(default)]
    pub wait_timeout_ms: u64,
    /// Per-command transport timeout
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            worker_quantum_ms: default_worker_quantum(),
            worker_idle_ms: default_worker_idle(),
            playback_poll_ms: default_playback_poll(),
            barrier_poll_ms: default_barrier_poll(),
            motion_poll_ms: default_motion_poll(),
            torque_poll_ms: default_torque_poll(),
            wait_timeout_ms: 0,
            command_timeout_ms: default_command_timeout(),
        }
    }
}

impl TimingConfig {
    fn wait_timeout(&self) -> Option<Duration> {
        (self.wait_timeout_ms > 0).then(|| Duration::from_millis(self.wait_timeout_ms))
    }

    /// Intervals for axis workers.
    pub fn axis_timing(&self) -> AxisTiming {
        AxisTiming {
            quantum: Duration::from_millis(self.worker_quantum_ms),
            idle: Duration::from_millis(self.worker_idle_ms),
            motion: WaitPolicy::new(Duration::from_millis(self.motion_poll_ms))
                .with_timeout(self.wait_timeout()),
            torque: WaitPolicy::new(Duration::from_millis(self.torque_poll_ms))
                .with_timeout(self.wait_timeout()),
        }
    }

    /// Intervals for the program executor.
    pub fn executor_timing(&self) -> ExecutorTiming {
        ExecutorTiming {
            playback_poll: Duration::from_millis(self.playback_poll_ms),
            barrier_poll: Duration::from_millis(self.barrier_poll_ms),
        }
    }

    /// Per-command transport timeout.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// Controller link definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerDefinition {
    /// Unique controller identifier
    pub id: String,
    /// `host[:port]`, serial device path, or `sim`
    pub address: String,
    /// Baud rate for serial links
    #[serde(default = "default_baud")]
    pub baud: u32,
}

/// Axis definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisDefinition {
    /// Unique axis name, referenced by programs
    pub name: String,
    /// Controller id
    pub controller: String,
    /// Channel letter A-H
    pub letter: String,
    /// Counts per engineering unit
    #[serde(default = "default_conversion_factor")]
    pub conversion_factor: f64,
}

impl AxisDefinition {
    /// Parsed channel letter.
    pub fn axis_letter(&self) -> Result<AxisLetter, String> {
        self.letter
            .parse()
            .map_err(|e| format!("Axis '{}': {}", self.name, e))
    }
}

// Default value functions
fn default_name() -> String {
    "Galil Sequencer".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_worker_quantum() -> u64 {
    10
}

fn default_worker_idle() -> u64 {
    10
}

fn default_playback_poll() -> u64 {
    1
}

fn default_barrier_poll() -> u64 {
    10
}

fn default_motion_poll() -> u64 {
    20
}

fn default_torque_poll() -> u64 {
    100
}

fn default_command_timeout() -> u64 {
    1000
}

fn default_baud() -> u32 {
    DEFAULT_BAUD
}

fn default_conversion_factor() -> f64 {
    1.0
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            application: ApplicationConfig::default(),
            timing: TimingConfig::default(),
            controllers: Vec::new(),
            axes: Vec::new(),
        }
    }
}

impl MotionConfig {
    /// Load configuration from `config/galil.toml` and environment variables
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path).extract()
    }

    /// Load from `path` and validate.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Self::load_from(path)?;
        config.validate().map_err(MotionError::Configuration)?;
        Ok(config)
    }

    /// The provider stack: defaults, then the TOML file, then the environment.
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::from(Serialized::defaults(MotionConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("GALIL_SEQ_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            ));
        }

        if self.timing.playback_poll_ms == 0
            || self.timing.barrier_poll_ms == 0
            || self.timing.motion_poll_ms == 0
            || self.timing.torque_poll_ms == 0
        {
            return Err("Polling intervals must be at least 1 ms".to_string());
        }

        let mut ids = HashSet::new();
        for controller in &self.controllers {
            validation::is_not_empty(&controller.id)
                .map_err(|e| format!("Controller id: {e}"))?;
            if !ids.insert(controller.id.as_str()) {
                return Err(format!("Duplicate controller ID: {}", controller.id));
            }
        }

        let mut names = HashSet::new();
        let mut channels = HashSet::new();
        for axis in &self.axes {
            validation::is_not_empty(&axis.name).map_err(|e| format!("Axis name: {e}"))?;
            if !names.insert(axis.name.as_str()) {
                return Err(format!("Duplicate axis name: {}", axis.name));
            }
            if !ids.contains(axis.controller.as_str()) {
                return Err(format!(
                    "Axis '{}' references unknown controller '{}'",
                    axis.name, axis.controller
                ));
            }
            let letter = axis.axis_letter()?;
            if !channels.insert((axis.controller.as_str(), letter)) {
                return Err(format!(
                    "Axis '{}' reuses letter {} on controller '{}'",
                    axis.name, letter, axis.controller
                ));
            }
            validation::is_positive_factor(axis.conversion_factor)
                .map_err(|e| format!("Axis '{}': {}", axis.name, e))?;
        }

        Ok(())
    }

    /// Axes bound to one controller
    pub fn axes_of<'a>(&'a self, controller: &'a str) -> impl Iterator<Item = &'a AxisDefinition> {
        self.axes.iter().filter(move |a| a.controller == controller)
    }
}
