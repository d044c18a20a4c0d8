//! Authored program rows.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Motion action of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// `[speed, duration_ms]`: jog, then stop `duration_ms` later.
    Timed,
    /// `[speed, position_percent]`: absolute move within the homed travel.
    Range,
    /// `[speed, stroke_percent, repeats]`: oscillate around mid travel.
    PingPong,
    /// `[speed]`: jog until stopped.
    Jog,
    /// `[]`: stop, wait and disable.
    Stop,
}

impl Action {
    /// Every action, in editor order.
    pub const ALL: [Action; 5] = [
        Action::Timed,
        Action::Range,
        Action::PingPong,
        Action::Jog,
        Action::Stop,
    ];

    /// Number of arguments the action takes.
    pub fn arity(self) -> usize {
        match self {
            Action::Timed | Action::Range => 2,
            Action::PingPong => 3,
            Action::Jog => 1,
            Action::Stop => 0,
        }
    }

    /// Arguments a newly added row starts with.
    pub fn default_args(self) -> Vec<f64> {
        match self {
            Action::Timed => vec![1.0, 100.0],
            Action::Range => vec![1.0, 50.0],
            Action::PingPong => vec![1.0, 50.0, 1.0],
            Action::Jog => vec![1.0],
            Action::Stop => vec![],
        }
    }

    /// Argument names, for messages and editors.
    pub fn arg_names(self) -> &'static [&'static str] {
        match self {
            Action::Timed => &["speed", "duration_ms"],
            Action::Range => &["speed", "position_percent"],
            Action::PingPong => &["speed", "stroke_percent", "repeats"],
            Action::Jog => &["speed"],
            Action::Stop => &[],
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// One authored row: run `action` on `axis` at `time_ms` after the iteration start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    /// Start time, ms from the beginning of the iteration.
    #[serde(rename = "time")]
    pub time_ms: u64,
    /// Axis name.
    pub axis: String,
    /// What to do.
    pub action: Action,
    /// Positional arguments, see [`Action::arg_names`].
    #[serde(default)]
    pub args: Vec<f64>,
}

impl Instruction {
    /// Builds an instruction.
    pub fn new(time_ms: u64, axis: impl Into<String>, action: Action, args: Vec<f64>) -> Self {
        Self {
            time_ms,
            axis: axis.into(),
            action,
            args,
        }
    }

    /// An instruction with the action's default arguments.
    pub fn with_defaults(time_ms: u64, axis: impl Into<String>, action: Action) -> Self {
        Self::new(time_ms, axis, action, action.default_args())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_arity() {
        for action in Action::ALL {
            assert_eq!(action.default_args().len(), action.arity());
            assert_eq!(action.arg_names().len(), action.arity());
        }
    }

    #[test]
    fn json_shape() {
        let row = Instruction::new(250, "Hopper (Front)", Action::PingPong, vec![2.0, 40.0, 3.0]);
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "time": 250,
                "axis": "Hopper (Front)",
                "action": "PingPong",
                "args": [2.0, 40.0, 3.0]
            })
        );
        let stop: Instruction =
            serde_json::from_str(r#"{"time": 0, "axis": "A", "action": "Stop"}"#).unwrap();
        assert!(stop.args.is_empty());
    }
}
