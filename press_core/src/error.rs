use thiserror::Error;

use crate::command::ArgError;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PressError {
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("actuator fault (A status=0x{status_a:08X}, B status=0x{status_b:08X})")]
    ActuatorFault { status_a: u32, status_b: u32 },
    #[error("motors are disabled")]
    MotorsDisabled,
    #[error("axis is not homed")]
    NotHomed,
    #[error("retract position is not set")]
    RetractNotSet,
    #[error("{0} already in progress")]
    Busy(&'static str),
    #[error("Force sensor disconnected")]
    SensorDisconnected,
    #[error("Force sensor out of range: {reading_kg:.2} kg outside [{min_kg:.1}, {max_kg:.1}] kg")]
    SensorOutOfRange {
        reading_kg: f32,
        min_kg: f32,
        max_kg: f32,
    },
    #[error("force already at {reading_kg:.2} kg, at or above target {target_kg:.2} kg")]
    ForceAlreadyReached { reading_kg: f32, target_kg: f32 },
    #[error(transparent)]
    Argument(#[from] ArgError),
    #[error("invalid calibration: {0}")]
    Calibration(String),
    #[error("timed out after {0} ms waiting for the controller to settle")]
    Timeout(u64),
    #[error("io error: {0}")]
    Io(String),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing actuators")]
    MissingActuators,
    #[error("missing load sensor")]
    MissingLoadSensor,
    #[error("missing event sink")]
    MissingEventSink,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
