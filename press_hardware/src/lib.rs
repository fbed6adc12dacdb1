//! Collaborators for the press core outside of unit tests: a simulated
//! ganged axis and a line-oriented serial load cell.

pub mod error;
pub mod serial;
pub mod sim;
pub mod util;

pub use error::HwError;
pub use serial::{LineLoadSensor, LineStats, parse_line};
pub use sim::{DriveId, SimActuator, SimLoadSensor, SimSetup, SimWorkpiece, SimulatedPress};
