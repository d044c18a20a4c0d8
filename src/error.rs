//! Custom error types for the application.
//!
//! Two layers of errors exist:
//!
//! - **`LinkError`**: failures on the physical command link to a controller (socket or
//!   serial I/O, timeouts, a command rejected with `?`, unparseable responses). The
//!   controller facade catches these, logs them, and turns them into sentinels so that
//!   the scheduling layer never sees them as fatal.
//! - **`MotionError`**: application-level errors surfaced to callers that author
//!   programs, load configuration, or request routines the axis cannot perform yet
//!   (for example a range move before homing).
//!
//! By using `#[from]`, errors from the underlying crates convert seamlessly with `?`.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, MotionError>;

/// Errors raised by a controller transport.
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Controller link is not open")]
    NotConnected,

    #[error("I/O error on controller link: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out waiting for response to '{0}'")]
    Timeout(String),

    #[error("Controller rejected command '{command}'")]
    Rejected { command: String },

    #[error("Malformed response to '{command}': {response:?}")]
    MalformedResponse { command: String, response: String },

    #[error("Unsupported controller address '{0}'")]
    UnsupportedAddress(String),
}

#[derive(Error, Debug)]
pub enum MotionError {
    #[error("Controller link error: {0}")]
    Link(#[from] LinkError),

    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Program document error: {0}")]
    Document(#[from] serde_json::Error),

    #[error("Unknown axis '{0}'")]
    UnknownAxis(String),

    #[error("Instruction {index} is invalid: {reason}")]
    InvalidInstruction { index: usize, reason: String },

    #[error("Program has no instructions")]
    EmptyProgram,

    #[error("A program run is already active")]
    AlreadyRunning,

    #[error("Axis '{0}' has not been homed")]
    NotHomed(String),
}

/// Failure of one axis task. The worker logs it and moves on to the next task.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskError {
    #[error("Controller command '{0}' failed")]
    Command(String),

    #[error("Could not read {0}")]
    ReadFailed(&'static str),

    #[error("Property {0} is read-only")]
    ReadOnly(&'static str),

    #[error("Invalid value {value} for {property}")]
    InvalidValue { property: &'static str, value: f64 },

    #[error("Wait interrupted by cancel")]
    Interrupted,

    #[error("Wait timed out")]
    TimedOut,
}

impl MotionError {
    /// Whether an operator can retry after fixing input, as opposed to a broken
    /// environment (bad config file, unreadable disk).
    pub fn can_recover(&self) -> bool {
        !matches!(
            self,
            MotionError::Config(_) | MotionError::Io(_) | MotionError::Configuration(_)
        )
    }
}
