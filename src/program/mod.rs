//! Authored programs: instructions, compilation, playback and persistence.

pub mod compiler;
pub mod document;
pub mod executor;
pub mod instruction;
pub mod state;

pub use compiler::{compile, Event, Operation, Program};
pub use document::ProgramDocument;
pub use executor::{
    ExecutorEvent, ExecutorStatus, ExecutorTiming, ProgramExecutor, RunHandle, RunSummary,
};
pub use instruction::{Action, Instruction};
pub use state::{ExecutorState, RunOutcome};
