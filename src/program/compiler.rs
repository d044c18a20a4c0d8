//! Program compiler: authored instructions to a sorted event timeline.
//!
//! Expansion per action:
//!
//! | Action   | Events                                                         |
//! |----------|----------------------------------------------------------------|
//! | Jog      | `t`: enable, set jog, begin                                    |
//! | Timed    | `t`: enable, set jog, begin; `t + duration`: stop, wait, disable |
//! | Range    | `t`: range move to `percent / 100` of the travel               |
//! | PingPong | `t`: ping-pong between `0.5 -/+ stroke / 200` of the travel    |
//! | Stop     | `t`: stop, wait, disable                                       |
//!
//! The timeline is ordered by `(time_ms, origin_index)`, so identical input always
//! plays back in the same order.

use super::instruction::{Action, Instruction};
use crate::axis::{Call, Property, Task, MAX_PING_PONG_REPEATS};
use crate::error::{AppResult, MotionError};
use crate::validation;

/// What an event does to its axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operation {
    /// Enable, set jog speed, begin.
    Jog {
        /// Signed jog speed.
        speed: f64,
    },
    /// Stop, wait for completion, disable.
    Stop,
    /// Absolute move to `fraction` of the homed travel.
    Range {
        /// Slew speed.
        speed: f64,
        /// Target as a fraction of the travel, 0..=1.
        fraction: f64,
    },
    /// Oscillate between fractions `a` and `b` of the homed travel.
    PingPong {
        /// Slew speed.
        speed: f64,
        /// Round trips.
        repeats: u32,
        /// First turning point.
        a: f64,
        /// Second turning point.
        b: f64,
    },
}

impl Operation {
    /// Task sequence for operations that do not depend on axis state.
    pub fn fixed_tasks(&self) -> Option<Vec<Task>> {
        match *self {
            Operation::Jog { speed } => Some(vec![
                Task::Call(Call::Enable),
                Task::set(Property::Jog, speed),
                Task::Call(Call::Begin),
            ]),
            Operation::Stop => Some(Task::cancel_sequence().to_vec()),
            Operation::Range { .. } | Operation::PingPong { .. } => None,
        }
    }
}

/// One absolutely-timed unit of the compiled timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Index of the instruction this event came from.
    pub origin_index: usize,
    /// Dispatch time, ms from the iteration start.
    pub time_ms: u64,
    /// Target axis name.
    pub axis: String,
    /// What to do.
    pub operation: Operation,
}

/// A compiled, time-ordered timeline.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    events: Vec<Event>,
}

impl Program {
    /// Events in dispatch order.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the timeline is empty.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Time of the last event.
    pub fn duration_ms(&self) -> u64 {
        self.events.last().map_or(0, |e| e.time_ms)
    }

    /// Distinct axis names, in first-dispatch order.
    pub fn axes(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for event in &self.events {
            if !names.contains(&event.axis.as_str()) {
                names.push(&event.axis);
            }
        }
        names
    }
}

fn invalid(index: usize, reason: impl Into<String>) -> MotionError {
    MotionError::InvalidInstruction {
        index,
        reason: reason.into(),
    }
}

fn check_args(index: usize, instruction: &Instruction) -> AppResult<()> {
    let action = instruction.action;
    if instruction.args.len() != action.arity() {
        return Err(invalid(
            index,
            format!(
                "{action} takes {} argument(s) {:?}, got {}",
                action.arity(),
                action.arg_names(),
                instruction.args.len()
            ),
        ));
    }
    if validation::is_not_empty(&instruction.axis).is_err() {
        return Err(invalid(index, "axis name is empty"));
    }
    for (name, value) in action.arg_names().iter().zip(&instruction.args) {
        validation::is_finite(*value).map_err(|e| invalid(index, format!("{name}: {e}")))?;
    }
    Ok(())
}

/// Expands one instruction into its events.
fn expand(index: usize, instruction: &Instruction, out: &mut Vec<Event>) -> AppResult<()> {
    check_args(index, instruction)?;
    let args = &instruction.args;
    let t = instruction.time_ms;
    let mut push = |time_ms: u64, operation: Operation| {
        out.push(Event {
            origin_index: index,
            time_ms,
            axis: instruction.axis.clone(),
            operation,
        })
    };

    match instruction.action {
        Action::Jog => push(t, Operation::Jog { speed: args[0] }),
        Action::Stop => push(t, Operation::Stop),
        Action::Timed => {
            let duration = args[1];
            if duration < 0.0 {
                return Err(invalid(index, "duration_ms must not be negative"));
            }
            push(t, Operation::Jog { speed: args[0] });
            push(t.saturating_add(duration.round() as u64), Operation::Stop);
        }
        Action::Range => {
            let fraction = (args[1] / 100.0).clamp(0.0, 1.0);
            push(
                t,
                Operation::Range {
                    speed: args[0],
                    fraction,
                },
            );
        }
        Action::PingPong => {
            let stroke = args[1];
            validation::is_in_range(stroke, 0.0..=100.0)
                .map_err(|_| invalid(index, "stroke_percent must be within 0..=100"))?;
            let repeats = args[2];
            if repeats < 0.0 || repeats.fract() != 0.0 {
                return Err(invalid(index, "repeats must be a non-negative integer"));
            }
            if repeats > f64::from(MAX_PING_PONG_REPEATS) {
                return Err(invalid(
                    index,
                    format!("repeats must not exceed {MAX_PING_PONG_REPEATS}"),
                ));
            }
            push(
                t,
                Operation::PingPong {
                    speed: args[0],
                    repeats: repeats as u32,
                    a: 0.5 - stroke / 200.0,
                    b: 0.5 + stroke / 200.0,
                },
            );
        }
    }
    Ok(())
}

/// Compiles instructions into a timeline sorted by time, ties by authoring order.
pub fn compile(instructions: &[Instruction]) -> AppResult<Program> {
    if instructions.is_empty() {
        return Err(MotionError::EmptyProgram);
    }
    let mut events = Vec::with_capacity(instructions.len() * 2);
    for (index, instruction) in instructions.iter().enumerate() {
        expand(index, instruction, &mut events)?;
    }
    events.sort_by_key(|e| (e.time_ms, e.origin_index));
    Ok(Program { events })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(time: u64, axis: &str, action: Action, args: &[f64]) -> Instruction {
        Instruction::new(time, axis, action, args.to_vec())
    }

    #[test]
    fn jog_compiles_to_one_event() {
        let program = compile(&[row(0, "A", Action::Jog, &[10.0])]).unwrap();
        assert_eq!(
            program.events(),
            &[Event {
                origin_index: 0,
                time_ms: 0,
                axis: "A".into(),
                operation: Operation::Jog { speed: 10.0 },
            }]
        );
        assert_eq!(
            program.events()[0].operation.fixed_tasks().unwrap(),
            vec![
                Task::Call(Call::Enable),
                Task::set(Property::Jog, 10.0),
                Task::Call(Call::Begin)
            ]
        );
    }

    #[test]
    fn timed_compiles_to_start_and_stop() {
        let program = compile(&[row(0, "A", Action::Timed, &[10.0, 500.0])]).unwrap();
        let events = program.events();
        assert_eq!(events.len(), 2);
        assert_eq!((events[0].time_ms, events[0].operation), (0, Operation::Jog { speed: 10.0 }));
        assert_eq!((events[1].time_ms, events[1].operation), (500, Operation::Stop));
        assert_eq!(program.duration_ms(), 500);
    }

    #[test]
    fn sort_is_stable_by_authoring_order() {
        let program = compile(&[
            row(300, "B", Action::Stop, &[]),
            row(100, "A", Action::Jog, &[1.0]),
            row(100, "B", Action::Jog, &[2.0]),
            row(0, "A", Action::Timed, &[1.0, 100.0]),
            row(100, "C", Action::Jog, &[3.0]),
        ])
        .unwrap();
        let order: Vec<(u64, usize)> = program
            .events()
            .iter()
            .map(|e| (e.time_ms, e.origin_index))
            .collect();
        assert_eq!(order, vec![(0, 3), (100, 1), (100, 2), (100, 3), (100, 4), (300, 0)]);
        assert_eq!(program.axes(), vec!["A", "B", "C"]);
    }

    #[test]
    fn range_and_ping_pong_arguments() {
        let program = compile(&[
            row(0, "A", Action::Range, &[2.0, 150.0]),
            row(0, "A", Action::PingPong, &[1.0, 40.0, 3.0]),
        ])
        .unwrap();
        assert_eq!(
            program.events()[0].operation,
            Operation::Range { speed: 2.0, fraction: 1.0 }
        );
        match program.events()[1].operation {
            Operation::PingPong { repeats, a, b, .. } => {
                assert_eq!(repeats, 3);
                assert!((a - 0.3).abs() < 1e-12);
                assert!((b - 0.7).abs() < 1e-12);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_programs() {
        assert!(matches!(compile(&[]), Err(MotionError::EmptyProgram)));
        assert!(matches!(
            compile(&[row(0, "A", Action::Jog, &[])]),
            Err(MotionError::InvalidInstruction { index: 0, .. })
        ));
        assert!(compile(&[row(0, "A", Action::Timed, &[1.0, -5.0])]).is_err());
        assert!(compile(&[row(0, "A", Action::PingPong, &[1.0, 120.0, 1.0])]).is_err());
        assert!(compile(&[row(0, "A", Action::PingPong, &[1.0, 50.0, 1.5])]).is_err());
        assert!(compile(&[row(0, " ", Action::Stop, &[])]).is_err());
        assert!(matches!(
            compile(&[row(0, "A", Action::PingPong, &[1.0, 50.0, 4e9])]),
            Err(MotionError::InvalidInstruction { index: 0, .. })
        ));
        let most = f64::from(MAX_PING_PONG_REPEATS);
        assert!(compile(&[row(0, "A", Action::PingPong, &[1.0, 50.0, most])]).is_ok());
        assert!(compile(&[row(0, "A", Action::PingPong, &[1.0, 50.0, most + 1.0])]).is_err());
        assert!(matches!(
            compile(&[row(0, "A", Action::Stop, &[]), row(0, "A", Action::Jog, &[f64::NAN])]),
            Err(MotionError::InvalidInstruction { index: 1, .. })
        ));
    }
}
