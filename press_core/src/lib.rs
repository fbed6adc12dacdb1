#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Press motion core (hardware-agnostic).
//!
//! Drives two ganged linear actuators as one axis: torque-based homing,
//! force-limited moves with pause and resume, retract handling, and energy
//! accounting corrected for frame compliance. Hardware is reached only
//! through `press_traits::Actuator` and `press_traits::LoadSensor`.
//!
//! ## Architecture
//!
//! - **Controller**: one `update()` per loop cycle advances whichever
//!   operation is in flight (`controller`, `homing`, `motion`)
//! - **Commands**: text commands parse into typed `Command`s (`command`)
//! - **Force**: torque smoothing (`torque`), calibration (`calibration`),
//!   compliance model (`strain`) and work integration (`energy`)
//! - **Runner**: paced loop, scripts, and channel-fed command streams
//!   (`runner`)
//!
//! Every state change is reported through an `EventSink` as INFO, START,
//! DONE, or ERROR.

pub mod atomic;
pub mod builder;
pub mod calibration;
pub mod command;
pub mod config;
mod controller;
mod conversions;
pub mod energy;
pub mod error;
pub mod events;
pub mod homing;
pub mod hw_error;
pub mod mocks;
pub mod motion;
pub mod runner;
pub mod status;
pub mod store;
pub mod strain;
pub mod telemetry;
pub mod torque;

pub use builder::{Missing, PressBuilder, Set};
pub use calibration::{
    Calibration, CalibrationStore, ForceMode, LinearMap, MemoryCalibrationStore,
    StoredCalibration,
};
pub use command::{ArgError, Command, LimitAction, MoveArgs, split_line};
pub use config::{
    FaultCfg, ForceCfg, HomingCfg, LoopCfg, MechanicsCfg, MoveCfg, PressCfg, StrainCfg, TorqueCfg,
};
pub use controller::PressController;
pub use error::{BuildError, PressError, Report, Result};
pub use events::{Event, EventKind, EventSink, Tee, TracingSink};
pub use homing::{HomingPhase, HomingTarget};
pub use motion::{ActiveMove, MoveKind, MoveState};
pub use runner::{LoopStats, Runner};
pub use status::MotionState;
pub use store::FileCalibrationStore;
pub use telemetry::Telemetry;
