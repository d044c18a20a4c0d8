//! Units of serialized axis work.

use super::property::Property;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Zero-argument axis operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Call {
    /// Servo on.
    Enable,
    /// Motor off.
    Disable,
    /// Begin the pending motion.
    Begin,
    /// Stop motion.
    Stop,
    /// Block until the profiler reports motion complete.
    WaitForComplete,
    /// Define the current position as zero.
    DefineHome,
}

/// Operations with arguments, possibly blocking on a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CallWith {
    /// Poll torque until `|torque| >= threshold`.
    BlockUntilTorque {
        /// Torque magnitude that ends the wait.
        threshold: f64,
    },
}

/// Value written by a [`Task::Set`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Literal number in engineering units.
    Number(f64),
    /// Literal flag, written as 1 or 0 to numeric properties.
    Flag(bool),
    /// The current value of another property on the same axis, read when the task runs.
    Read(Property),
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Flag(value)
    }
}

/// One unit of work in an axis queue.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Task {
    /// Invoke a zero-argument operation.
    Call(Call),
    /// Invoke an operation with arguments.
    CallWith(CallWith),
    /// Write a property.
    Set(Property, Value),
}

impl Task {
    /// Shorthand for `Task::Set(property, value.into())`.
    pub fn set(property: Property, value: impl Into<Value>) -> Self {
        Task::Set(property, value.into())
    }

    /// The sequence every cancel leaves behind.
    pub fn cancel_sequence() -> [Task; 3] {
        [
            Task::Call(Call::Stop),
            Task::Call(Call::WaitForComplete),
            Task::Call(Call::Disable),
        ]
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Call(call) => write!(f, "{call:?}"),
            Task::CallWith(CallWith::BlockUntilTorque { threshold }) => {
                write!(f, "BlockUntilTorque({threshold})")
            }
            Task::Set(property, Value::Number(v)) => write!(f, "{property} = {v}"),
            Task::Set(property, Value::Flag(v)) => write!(f, "{property} = {v}"),
            Task::Set(property, Value::Read(source)) => write!(f, "{property} = <{source}>"),
        }
    }
}
