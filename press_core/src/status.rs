//! Top-level motion state reported by the controller.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionState {
    Standby,
    Homing,
    Moving,
    /// Latched until an explicit reset re-enables the drives.
    ActuatorFault,
}

impl MotionState {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Standby => "STANDBY",
            Self::Homing => "HOMING",
            Self::Moving => "MOVING",
            Self::ActuatorFault => "FAULT",
        }
    }
}

impl fmt::Display for MotionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
