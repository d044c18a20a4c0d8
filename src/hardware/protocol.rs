//! Galil Wire Opcode Contract
//!
//! Commands are two-letter ASCII mnemonics, optionally followed by an axis letter
//! and a `=value` (write) or `=?` (read) suffix:
//!
//! - `JGB=500` sets the jog speed of axis B to 500 counts/s
//! - `TPA=?` queries the position of axis A
//! - `SHC` enables the servo on axis C, `SH` enables all axes
//!
//! The controller terminates every response with `:` and signals a rejected command
//! with `?`. Stripping those terminators is the transport's job; this module only
//! formats commands and parses the payload that remains.

use crate::error::LinkError;
use crate::validation;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Servo here (enable).
pub const SERVO_HERE: &str = "SH";
/// Motor off (disable).
pub const MOTOR_OFF: &str = "MO";
/// Begin motion.
pub const BEGIN: &str = "BG";
/// Stop motion.
pub const STOP: &str = "ST";
/// Define position.
pub const DEFINE_POSITION: &str = "DP";
/// Burn parameters to non-volatile memory.
pub const BURN_PARAMETERS: &str = "BN";
/// Burn the stored program to non-volatile memory.
pub const BURN_PROGRAM: &str = "BP";

/// A physical controller channel, `A` through `H`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AxisLetter(char);

impl AxisLetter {
    /// Build an axis letter, accepting lower case input.
    pub fn new(letter: char) -> Result<Self, &'static str> {
        let mut buf = [0u8; 4];
        validation::is_valid_axis_letter(letter.encode_utf8(&mut buf)).map(Self)
    }

    /// The upper-case letter sent on the wire.
    pub fn as_char(self) -> char {
        self.0
    }

    /// Zero-based channel index (A = 0).
    pub fn index(self) -> usize {
        (self.0 as u8 - b'A') as usize
    }
}

impl fmt::Display for AxisLetter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AxisLetter {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validation::is_valid_axis_letter(s).map(Self)
    }
}

impl TryFrom<String> for AxisLetter {
    type Error = &'static str;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AxisLetter> for String {
    fn from(value: AxisLetter) -> Self {
        value.0.to_string()
    }
}

// =============================================================================
// Command formatting
// =============================================================================

/// `MN` followed by the axis letter, e.g. `BGA`.
pub fn axis_command(mnemonic: &str, axis: AxisLetter) -> String {
    format!("{mnemonic}{axis}")
}

/// Read query, e.g. `TPA=?`.
pub fn read(mnemonic: &str, axis: AxisLetter) -> String {
    format!("{mnemonic}{axis}=?")
}

/// Write command, e.g. `JGB=500`.
pub fn write(mnemonic: &str, axis: AxisLetter, value: f64) -> String {
    format!("{mnemonic}{axis}={}", format_value(value))
}

/// Motion status query: the controller answers `1` while the axis profiler runs.
pub fn motion_status(axis: AxisLetter) -> String {
    format!("MG _BG{axis}")
}

/// Digital input query.
pub fn input(channel: u8) -> String {
    format!("MG@IN[{channel}]")
}

/// Digital output query.
pub fn output(channel: u8) -> String {
    format!("MG@OUT[{channel}]")
}

/// Set (`SB`) or clear (`CB`) a digital output bit.
pub fn set_output(channel: u8, on: bool) -> String {
    if on {
        format!("SB{channel}")
    } else {
        format!("CB{channel}")
    }
}

/// Formats a numeric argument with at most four fractional digits, which is the
/// resolution the controller accepts.
pub fn format_value(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    if value.fract() == 0.0 && value.abs() < 1e15 {
        return format!("{value:.0}");
    }
    let text = format!("{value:.4}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text == "-0" {
        "0".to_string()
    } else {
        text.to_string()
    }
}

// =============================================================================
// Response parsing
// =============================================================================

/// Parses a numeric response payload.
pub fn parse_number(command: &str, response: &str) -> Result<f64, LinkError> {
    response
        .trim()
        .parse::<f64>()
        .map_err(|_| LinkError::MalformedResponse {
            command: command.to_string(),
            response: response.to_string(),
        })
}
