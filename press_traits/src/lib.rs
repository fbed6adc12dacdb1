//! Collaborator interfaces consumed by the press motion core.
//!
//! The controller never talks to drives or sensors directly. It sees two
//! lockstep [`Actuator`]s, one [`LoadSensor`], and a monotonic [`Clock`].

pub mod clock;

pub use clock::{Clock, MonotonicClock, VirtualClock};

/// Error type returned across the collaborator boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// One linear actuator of the ganged press axis.
///
/// Positions and move lengths are in motor pulses (steps). Velocity is in
/// steps per second and acceleration in steps per second squared.
pub trait Actuator {
    /// Start a relative move of `steps` pulses. The sign selects direction.
    fn command_relative_move(
        &mut self,
        steps: i64,
        velocity_sps: u32,
        accel_sps2: u32,
    ) -> Result<(), BoxError>;

    /// Commanded position in steps since power-on.
    fn commanded_position(&self) -> i64;

    /// True while a commanded move is still executing.
    fn is_moving(&self) -> bool;

    /// True when the drive reports a hardware fault.
    fn is_faulted(&self) -> bool;

    /// Raw drive status register, reported verbatim in fault diagnostics.
    fn status_word(&self) -> u32 {
        0
    }

    /// Instantaneous load feedback in percent of rated torque.
    ///
    /// Drives that have not produced a sample yet return the sentinel
    /// configured in the torque monitor.
    fn load_feedback_percent(&mut self) -> f32;

    /// Decelerate to a stop using the drive's stop ramp.
    fn decelerate_stop(&mut self) -> Result<(), BoxError>;

    fn set_enabled(&mut self, enabled: bool) -> Result<(), BoxError>;

    fn clear_faults(&mut self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// External force transducer.
pub trait LoadSensor {
    /// Latest force reading in kilograms.
    fn reading(&self) -> f32;

    /// True while samples are arriving.
    fn is_connected(&self) -> bool;

    /// Latest raw converter sample.
    fn raw_sample(&self) -> i32;

    /// Current `(scale, offset)` pair used for `kg = raw * scale + offset`.
    fn calibration(&self) -> (f32, f32);

    fn set_offset(&mut self, offset: f32) -> Result<(), BoxError>;

    fn set_scale(&mut self, scale: f32) -> Result<(), BoxError>;
}

impl<T: LoadSensor + ?Sized> LoadSensor for Box<T> {
    fn reading(&self) -> f32 {
        (**self).reading()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn raw_sample(&self) -> i32 {
        (**self).raw_sample()
    }

    fn calibration(&self) -> (f32, f32) {
        (**self).calibration()
    }

    fn set_offset(&mut self, offset: f32) -> Result<(), BoxError> {
        (**self).set_offset(offset)
    }

    fn set_scale(&mut self, scale: f32) -> Result<(), BoxError> {
        (**self).set_scale(scale)
    }
}
