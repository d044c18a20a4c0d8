//! # Galil Sequencer Core Library
//!
//! Coordinates multi-axis motion on Galil motion controllers. Named axes are bound to
//! controller channels; each axis serializes its hardware access through a FIFO task
//! queue drained by one worker. Authored programs (timed, per-axis instructions) are
//! compiled into a sorted timeline and replayed against the axes with optional
//! looping.
//!
//! ## Crate Structure
//!
//! - **`hardware`**: The controller facade (`Controller`), its transports (TCP, serial,
//!   simulated) and the Galil command vocabulary.
//! - **`axis`**: `Axis`, its task queue and worker, and the motion routines built on
//!   top of the queue (jog, moves, homing, ping-pong).
//! - **`program`**: Instructions, the compiler, the program executor and the JSON
//!   document format.
//! - **`config`**: Figment-based loading of controllers, axes and timing.
//! - **`logging`**: `tracing` subscriber setup.
//! - **`error`**: Error types shared across the crate.
//! - **`validation`**: Small validation helpers for configuration values.

pub mod axis;
pub mod config;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod program;
pub mod validation;

pub use axis::{Axis, AxisSnapshot, AxisTiming, Property, Task};
pub use error::{AppResult, MotionError};
pub use hardware::{Controller, SimulatedController};
pub use program::{Instruction, ProgramDocument, ProgramExecutor};
