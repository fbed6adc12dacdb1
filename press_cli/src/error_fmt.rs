//! Human-readable error descriptions and structured JSON error formatting.

use crate::session::SessionError;
use press_core::calibration::CalibrationError;
use press_core::{BuildError, PressError};
use press_hardware::HwError;

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingActuators => {
                "What happened: No drives were provided to the press controller.\nLikely causes: The drive pair failed to initialize or was not wired into the builder.\nHow to fix: Ensure both actuators are created and passed via with_actuators(...).".to_string()
            }
            BuildError::MissingLoadSensor => {
                "What happened: No load sensor was provided to the press controller.\nLikely causes: The load cell failed to initialize or was not wired into the builder.\nHow to fix: Ensure the load sensor is created and passed via with_load_sensor(...).".to_string()
            }
            BuildError::MissingEventSink => {
                "What happened: No event sink was provided to the press controller.\nLikely causes: The host side was not wired into the builder.\nHow to fix: Pass a sink via with_event_sink(...).".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun. See etc/press.toml for a sample."
            ),
        };
    }

    if let Some(se) = err.downcast_ref::<SessionError>() {
        return match se {
            SessionError::CommandErrors { count, first } => format!(
                "What happened: {count} command(s) reported errors. First: {first}.\nLikely causes: The axis is not homed, a drive faulted, or an argument was out of range.\nHow to fix: Check the ERROR lines above; run `home` first and keep arguments within the configured limits."
            ),
            SessionError::NoCalibrationFile => {
                "What happened: Nowhere to persist the calibration.\nLikely causes: storage.calibration_file is not set in the config.\nHow to fix: Add [storage] calibration_file = \"...\" to the config, or rerun without --persist.".to_string()
            }
            SessionError::InvalidFit(e) => format!(
                "What happened: The fitted calibration is out of range ({e}).\nLikely causes: Samples in the wrong units, swapped columns, or too few points.\nHow to fix: Check the CSV columns and units, then fit again."
            ),
            SessionError::SelfCheck(problems) => format!(
                "What happened: Self-check failed: {problems}.\nLikely causes: Drive fault, disabled drives, or no load cell signal.\nHow to fix: Check drive power and status LEDs, and the load cell cable."
            ),
        };
    }

    if let Some(pe) = err.downcast_ref::<PressError>() {
        return match pe {
            PressError::Timeout(ms) => format!(
                "What happened: The press did not settle within {ms} ms.\nLikely causes: A move longer than the step timeout, a paused move waiting for resume, or a stalled drive.\nHow to fix: Raise runner.step_timeout_ms, or end paused moves with `resume` or `cancel` in the script."
            ),
            PressError::ActuatorFault { .. } => format!(
                "What happened: {pe}.\nLikely causes: Overload, wiring fault, or a drive alarm.\nHow to fix: Clear the drive alarm, then `reset` and `home` again."
            ),
            PressError::SensorDisconnected | PressError::SensorOutOfRange { .. } => format!(
                "What happened: {pe}.\nLikely causes: Load cell cable unplugged or converter not streaming.\nHow to fix: Check the load cell wiring and load_cell.device, or switch to `set_force_mode motor_torque`."
            ),
            _ => format!(
                "What happened: {pe}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    if let Some(he) = err.downcast_ref::<HwError>() {
        return match he {
            HwError::Timeout(ms) => format!(
                "What happened: The load cell sent no sample within {ms} ms.\nLikely causes: Wrong device, wrong baud rate, or the converter is unpowered.\nHow to fix: Check load_cell.device and load_cell.baud, or raise load_cell.first_sample_timeout_ms."
            ),
            HwError::Serial(msg) => format!(
                "What happened: The load cell port could not be opened ({msg}).\nLikely causes: Wrong device path or missing permission on the serial device.\nHow to fix: Fix load_cell.device; add the user to the dialout group."
            ),
            _ => format!(
                "What happened: {he}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug for more detail."
            ),
        };
    }

    if let Some(ce) = err.downcast_ref::<CalibrationError>() {
        return format!(
            "What happened: Invalid calibration ({ce}).\nLikely causes: A fit from bad samples or a hand-edited calibration file.\nHow to fix: Fit again from fresh samples."
        );
    }

    // String-based heuristics for errors coming from init or config
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    // Header problems sit under the "fit ... from FILE" context.
    if let Some(link) = err
        .chain()
        .map(ToString::to_string)
        .find(|l| l.to_ascii_lowercase().contains("calibration csv must have headers"))
    {
        return format!(
            "Invalid headers in calibration CSV ({link}).\nHow to fix: Use 'kg,torque_pct' for fit-torque or 'raw,kg' for fit-load-cell."
        );
    }

    if lower.contains("read config") || lower.contains("parse config") {
        let cause = err.root_cause();
        return format!(
            "What happened: The config file could not be loaded ({cause}).\nLikely causes: Wrong path or a TOML syntax error.\nHow to fix: Check the --config path and the TOML syntax."
        );
    }

    if lower.contains("invalid config") || lower.contains("must be") {
        let cause = err.root_cause();
        return format!(
            "What happened: Configuration is invalid ({cause}).\nLikely causes: Out-of-range or inconsistent values.\nHow to fix: Edit the TOML config and try again."
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes: 3 command errors, 4 timeout, 5 drive fault, 6 sensor, else 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if let Some(SessionError::CommandErrors { .. }) = err.downcast_ref::<SessionError>() {
        return 3;
    }
    if let Some(pe) = err.downcast_ref::<PressError>() {
        return match pe {
            PressError::Timeout(_) => 4,
            PressError::ActuatorFault { .. } => 5,
            PressError::SensorDisconnected | PressError::SensorOutOfRange { .. } => 6,
            _ => 1,
        };
    }
    if let Some(HwError::Timeout(_) | HwError::Serial(_)) = err.downcast_ref::<HwError>() {
        return 6;
    }
    1
}

fn reason_name(err: &eyre::Report) -> &'static str {
    if let Some(se) = err.downcast_ref::<SessionError>() {
        return match se {
            SessionError::CommandErrors { .. } => "CommandErrors",
            SessionError::NoCalibrationFile => "NoCalibrationFile",
            SessionError::InvalidFit(_) => "InvalidFit",
            SessionError::SelfCheck(_) => "SelfCheck",
        };
    }
    if let Some(pe) = err.downcast_ref::<PressError>() {
        return match pe {
            PressError::Timeout(_) => "Timeout",
            PressError::ActuatorFault { .. } => "ActuatorFault",
            PressError::SensorDisconnected | PressError::SensorOutOfRange { .. } => "Sensor",
            _ => "Press",
        };
    }
    if err.downcast_ref::<HwError>().is_some() {
        return "Hardware";
    }
    if err.downcast_ref::<BuildError>().is_some() {
        return "Build";
    }
    "Error"
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    let msg = humanize(err);
    if let Some(SessionError::CommandErrors { count, first }) = err.downcast_ref::<SessionError>()
    {
        return json!({
            "reason": reason_name(err),
            "details": { "count": count, "first": first },
            "message": msg,
        })
        .to_string();
    }
    json!({ "reason": reason_name(err), "message": msg }).to_string()
}
