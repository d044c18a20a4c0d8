//! Controller Hardware
//!
//! Wire protocol, command links and the serialized controller facade.

pub mod galil;
pub mod mock;
pub mod protocol;
pub mod transport;

pub use galil::{Controller, WaitOutcome, WaitPolicy};
pub use mock::{SimHandle, SimulatedController};
pub use protocol::AxisLetter;
pub use transport::{Address, Transport};
