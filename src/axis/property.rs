//! Axis property table.
//!
//! Every property an axis task can read or write, with its controller mnemonic and
//! whether the value crosses the unit-conversion boundary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named axis property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Property {
    /// `PR`, relative move distance.
    PositionRelative,
    /// `PA`, absolute move target.
    PositionAbsolute,
    /// `SP`, slew speed.
    Speed,
    /// `AC`
    Acceleration,
    /// `DC`
    Deceleration,
    /// `IP`
    IncrementPosition,
    /// `MC`
    InPosition,
    /// `JG`, signed jog speed.
    Jog,
    /// `BR`
    BrushMode,
    /// `IT`
    TimeConstant,
    /// `AM`
    ProfilerComplete,
    /// `KP`
    Kp,
    /// `KI`
    Ki,
    /// `KD`
    Kd,
    /// `OF`
    Offset,
    /// `IL`
    IntegratorLimit,
    /// `TL`
    TorqueLimit,
    /// `TP`, read-only.
    Position,
    /// `TV`, read-only.
    Velocity,
    /// `TT`, read-only.
    Torque,
    /// `TE`, read-only.
    Error,
    /// Travel measured by homing (engineering units), held on the axis.
    Limit,
    /// Whether homing has completed, held on the axis.
    Homed,
    /// Counts per engineering unit, held on the axis.
    ConversionFactor,
}

impl Property {
    /// Every property, in table order.
    pub const ALL: [Property; 24] = [
        Property::PositionRelative,
        Property::PositionAbsolute,
        Property::Speed,
        Property::Acceleration,
        Property::Deceleration,
        Property::IncrementPosition,
        Property::InPosition,
        Property::Jog,
        Property::BrushMode,
        Property::TimeConstant,
        Property::ProfilerComplete,
        Property::Kp,
        Property::Ki,
        Property::Kd,
        Property::Offset,
        Property::IntegratorLimit,
        Property::TorqueLimit,
        Property::Position,
        Property::Velocity,
        Property::Torque,
        Property::Error,
        Property::Limit,
        Property::Homed,
        Property::ConversionFactor,
    ];

    /// Controller mnemonic, `None` for properties held on the axis itself.
    pub fn mnemonic(self) -> Option<&'static str> {
        use Property::*;
        Some(match self {
            PositionRelative => "PR",
            PositionAbsolute => "PA",
            Speed => "SP",
            Acceleration => "AC",
            Deceleration => "DC",
            IncrementPosition => "IP",
            InPosition => "MC",
            Jog => "JG",
            BrushMode => "BR",
            TimeConstant => "IT",
            ProfilerComplete => "AM",
            Kp => "KP",
            Ki => "KI",
            Kd => "KD",
            Offset => "OF",
            IntegratorLimit => "IL",
            TorqueLimit => "TL",
            Position => "TP",
            Velocity => "TV",
            Torque => "TT",
            Error => "TE",
            Limit | Homed | ConversionFactor => return None,
        })
    }

    /// Whether reads divide and writes multiply by the conversion factor.
    pub fn is_scaled(self) -> bool {
        use Property::*;
        matches!(
            self,
            PositionRelative
                | PositionAbsolute
                | Speed
                | Acceleration
                | Deceleration
                | IncrementPosition
                | InPosition
                | Jog
                | Position
                | Velocity
                | Error
        )
    }

    /// Telemetry reports, read with the bare `TPA` form and never written.
    pub fn is_telemetry(self) -> bool {
        matches!(
            self,
            Property::Position | Property::Velocity | Property::Torque | Property::Error
        )
    }

    /// Read-only properties.
    pub fn is_read_only(self) -> bool {
        self.is_telemetry()
    }

    /// Properties stored on the axis rather than the controller.
    pub fn is_local(self) -> bool {
        self.mnemonic().is_none()
    }

    /// Snake-case name used in logs and on the command line.
    pub fn name(self) -> &'static str {
        use Property::*;
        match self {
            PositionRelative => "position_relative",
            PositionAbsolute => "position_absolute",
            Speed => "speed",
            Acceleration => "acceleration",
            Deceleration => "deceleration",
            IncrementPosition => "increment_position",
            InPosition => "in_position",
            Jog => "jog",
            BrushMode => "brush_mode",
            TimeConstant => "time_constant",
            ProfilerComplete => "profiler_complete",
            Kp => "kp",
            Ki => "ki",
            Kd => "kd",
            Offset => "offset",
            IntegratorLimit => "integrator_limit",
            TorqueLimit => "torque_limit",
            Position => "position",
            Velocity => "velocity",
            Torque => "torque",
            Error => "error",
            Limit => "limit",
            Homed => "homed",
            ConversionFactor => "conversion_factor",
        }
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Property {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Property::ALL
            .iter()
            .copied()
            .find(|p| p.name().eq_ignore_ascii_case(wanted) || p.mnemonic() == Some(wanted))
            .ok_or_else(|| format!("unknown property '{s}'"))
    }
}
