//! Maps `Box<dyn Error>` from collaborator boundaries to typed `PressError`.
//!
//! The traits in `press_traits` return boxed errors; this module converts
//! them, with a feature-gated path for `press_hardware::HwError`.

use crate::error::PressError;

/// Map a trait-boundary error to a typed `PressError`.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> PressError {
    #[cfg(feature = "hardware-errors")]
    {
        use press_hardware::error::HwError;
        if let Some(hw) = e.downcast_ref::<HwError>() {
            return match hw {
                HwError::Disconnected => PressError::SensorDisconnected,
                HwError::Io(msg) => PressError::Io(msg.clone()),
                HwError::InvalidCalibration(what) => PressError::Calibration((*what).to_string()),
                other => PressError::Hardware(other.to_string()),
            };
        }
    }

    if let Some(io) = e.downcast_ref::<std::io::Error>() {
        return PressError::Io(io.to_string());
    }
    PressError::Hardware(e.to_string())
}
