#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and calibration file formats for the press.
//!
//! - `Config` and its sections are deserialized from TOML and validated.
//!   Every section is optional; omitted keys take the device defaults.
//! - `PersistedCalibration` is the on-disk calibration record. Fields are
//!   optional so a partially written file still loads.
//! - The `fit` module turns calibration CSVs into linear maps using a
//!   least-squares fit with one robust refit pass.
use serde::{Deserialize, Serialize};

pub mod fit;

pub use fit::{
    LinearFit, LoadCellRow, TorqueRow, fit_load_cell_rows, fit_torque_rows, load_load_cell_csv,
    load_torque_csv,
};

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Mechanics {
    /// Motor pulses per millimetre of axis travel
    pub steps_per_mm: f32,
}

impl Default for Mechanics {
    fn default() -> Self {
        // 800 pulses per revolution on a 5 mm pitch screw
        Self {
            steps_per_mm: 160.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Homing {
    pub stroke_mm: f32,
    pub rapid_speed_mms: f32,
    pub touch_speed_mms: f32,
    pub backoff_speed_mms: f32,
    pub accel_mmss: f32,
    /// Torque ceiling while searching for the hard stop (percent)
    pub search_torque_pct: f32,
    /// Torque ceiling while backing away from the stop (percent)
    pub backoff_torque_pct: f32,
    pub backoff_mm: f32,
    /// Deadline for the drives to report motion after each homing command
    pub start_timeout_ms: u64,
    /// Hard cap for the whole procedure
    pub max_duration_ms: u64,
}

impl Default for Homing {
    fn default() -> Self {
        Self {
            stroke_mm: 500.0,
            rapid_speed_mms: 5.0,
            touch_speed_mms: 1.0,
            backoff_speed_mms: 1.0,
            accel_mmss: 100.0,
            search_torque_pct: 10.0,
            backoff_torque_pct: 40.0,
            backoff_mm: 1.0,
            start_timeout_ms: 500,
            max_duration_ms: 100_000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Motion {
    pub default_speed_mms: f32,
    pub accel_mmss: f32,
    /// Torque ceiling used when a move carries no force target (percent)
    pub default_torque_limit_pct: f32,
    /// Speed requests above this are clamped
    pub max_speed_mms: f32,
    pub start_timeout_ms: u64,
    pub retract_speed_mms: f32,
    /// Settling pause after an abort, before new commands are issued
    pub post_abort_settle_ms: u64,
}

impl Default for Motion {
    fn default() -> Self {
        Self {
            default_speed_mms: 6.25,
            accel_mmss: 62.5,
            default_torque_limit_pct: 80.0,
            max_speed_mms: 100.0,
            start_timeout_ms: 250,
            retract_speed_mms: 25.0,
            post_abort_settle_ms: 100,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Torque {
    /// EWMA smoothing factor in (0, 1]
    pub ewma_alpha: f32,
    /// Added to the smoothed value (percent)
    pub offset_pct: f32,
    /// Raw value drives report before their first sample
    pub no_reading_sentinel: f32,
}

impl Default for Torque {
    fn default() -> Self {
        Self {
            ewma_alpha: 0.2,
            offset_pct: -2.4,
            no_reading_sentinel: -9999.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Force {
    pub sensor_min_kg: f32,
    pub sensor_max_kg: f32,
    /// Readings above `sensor_max_kg * safety_factor` are treated as a fault
    pub safety_factor: f32,
    pub load_cell_target_min_kg: f32,
    pub load_cell_target_max_kg: f32,
    pub torque_target_min_kg: f32,
    pub torque_target_max_kg: f32,
    /// Force limit reported in telemetry while idle, per mode
    pub idle_limit_load_cell_kg: f32,
    pub idle_limit_torque_kg: f32,
    /// Upper clamp for the torque-derived force estimate
    pub torque_force_ceiling_kg: f32,
}

impl Default for Force {
    fn default() -> Self {
        Self {
            sensor_min_kg: -10.0,
            sensor_max_kg: 1200.0,
            safety_factor: 1.2,
            load_cell_target_min_kg: 0.2,
            load_cell_target_max_kg: 1000.0,
            torque_target_min_kg: 50.0,
            torque_target_max_kg: 2000.0,
            idle_limit_load_cell_kg: 1000.0,
            idle_limit_torque_kg: 2000.0,
            torque_force_ceiling_kg: 1000.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Strain {
    /// Nominal deflection bound used to seed the inverse search
    pub max_deflection_mm: f32,
    /// Force above which the workpiece counts as engaged
    pub contact_force_kg: f32,
}

impl Default for Strain {
    fn default() -> Self {
        Self {
            max_deflection_mm: 2.0,
            contact_force_kg: 3.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Faults {
    /// Fault flags are ignored for this long after a reset
    pub grace_ms: u64,
}

impl Default for Faults {
    fn default() -> Self {
        Self { grace_ms: 500 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Runner {
    /// Control loop period
    pub period_ms: u64,
    /// A single `update()` taking longer than this is logged as an overrun
    pub watchdog_ms: u64,
    /// Longest a scripted command may run before the runner gives up
    pub step_timeout_ms: u64,
}

impl Default for Runner {
    fn default() -> Self {
        Self {
            period_ms: 5,
            watchdog_ms: 100,
            step_timeout_ms: 300_000,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Storage {
    /// Where calibration is persisted; in-memory only when absent
    pub calibration_file: Option<String>,
}

/// Simulated axis used when no real drives are attached.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Simulator {
    /// Carriage position at power-on, mm above the lower hard stop
    pub start_mm: f32,
    /// Distance between the two hard stops
    pub travel_mm: f32,
    /// Workpiece surface, mm above the lower hard stop
    pub workpiece_mm: Option<f32>,
    pub workpiece_kg_per_mm: f32,
    pub running_torque_pct: f32,
    pub stall_torque_pct: f32,
    pub torque_pct_per_kg: f32,
}

impl Default for Simulator {
    fn default() -> Self {
        Self {
            start_mm: 50.0,
            travel_mm: 400.0,
            workpiece_mm: Some(120.0),
            workpiece_kg_per_mm: 40.0,
            running_torque_pct: 5.0,
            stall_torque_pct: 35.0,
            torque_pct_per_kg: 0.0335,
        }
    }
}

/// Serial load cell. The simulated one is used when `device` is absent.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoadCell {
    pub device: Option<String>,
    pub baud: u32,
    /// Samples older than this mark the sensor disconnected
    pub stale_ms: u64,
    /// How long startup waits for the first sample
    pub first_sample_timeout_ms: u64,
}

impl Default for LoadCell {
    fn default() -> Self {
        Self {
            device: None,
            baud: 115_200,
            stale_ms: 1000,
            first_sample_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub mechanics: Mechanics,
    pub homing: Homing,
    pub motion: Motion,
    pub torque: Torque,
    pub force: Force,
    pub strain: Strain,
    pub faults: Faults,
    pub runner: Runner,
    pub logging: Logging,
    pub storage: Storage,
    pub simulator: Simulator,
    pub load_cell: LoadCell,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Calibration record as stored on disk.
///
/// Absent fields mean "never written"; the controller substitutes defaults
/// for them and for any value outside its valid range.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedCalibration {
    /// "load_cell" or "motor_torque"
    pub force_mode: Option<String>,
    /// Torque percent per kilogram
    pub torque_scale: Option<f32>,
    /// Torque percent at zero force
    pub torque_offset: Option<f32>,
    /// Kilograms per raw count
    pub load_cell_scale: Option<f32>,
    pub load_cell_offset: Option<f32>,
    /// Deflection polynomial, highest order first
    pub strain_coeffs: Option<[f32; 5]>,
}

impl PersistedCalibration {
    pub fn from_toml(s: &str) -> eyre::Result<Self> {
        toml::from_str(s).map_err(|e| eyre::eyre!("parse calibration file: {e}"))
    }

    pub fn to_toml(&self) -> eyre::Result<String> {
        toml::to_string_pretty(self).map_err(|e| eyre::eyre!("serialize calibration: {e}"))
    }
}

fn finite_positive(v: f32) -> bool {
    v.is_finite() && v > 0.0
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        if !finite_positive(self.mechanics.steps_per_mm) {
            eyre::bail!("mechanics.steps_per_mm must be > 0");
        }

        let h = &self.homing;
        if !finite_positive(h.stroke_mm) {
            eyre::bail!("homing.stroke_mm must be > 0");
        }
        if !finite_positive(h.rapid_speed_mms)
            || !finite_positive(h.touch_speed_mms)
            || !finite_positive(h.backoff_speed_mms)
        {
            eyre::bail!("homing speeds must be > 0");
        }
        if !finite_positive(h.accel_mmss) {
            eyre::bail!("homing.accel_mmss must be > 0");
        }
        if !(0.0..=100.0).contains(&h.search_torque_pct) || h.search_torque_pct == 0.0 {
            eyre::bail!("homing.search_torque_pct must be in (0, 100]");
        }
        if !(0.0..=100.0).contains(&h.backoff_torque_pct) || h.backoff_torque_pct == 0.0 {
            eyre::bail!("homing.backoff_torque_pct must be in (0, 100]");
        }
        if !finite_positive(h.backoff_mm) || h.backoff_mm >= h.stroke_mm {
            eyre::bail!("homing.backoff_mm must be > 0 and smaller than homing.stroke_mm");
        }
        if h.start_timeout_ms == 0 {
            eyre::bail!("homing.start_timeout_ms must be >= 1");
        }
        if h.max_duration_ms <= h.start_timeout_ms {
            eyre::bail!("homing.max_duration_ms must exceed homing.start_timeout_ms");
        }

        let m = &self.motion;
        if !finite_positive(m.default_speed_mms) || !finite_positive(m.max_speed_mms) {
            eyre::bail!("motion speeds must be > 0");
        }
        if m.default_speed_mms > m.max_speed_mms || m.retract_speed_mms > m.max_speed_mms {
            eyre::bail!("motion.max_speed_mms must be >= default and retract speeds");
        }
        if !finite_positive(m.retract_speed_mms) {
            eyre::bail!("motion.retract_speed_mms must be > 0");
        }
        if !finite_positive(m.accel_mmss) {
            eyre::bail!("motion.accel_mmss must be > 0");
        }
        if !(0.0..=100.0).contains(&m.default_torque_limit_pct) || m.default_torque_limit_pct == 0.0
        {
            eyre::bail!("motion.default_torque_limit_pct must be in (0, 100]");
        }
        if m.start_timeout_ms == 0 {
            eyre::bail!("motion.start_timeout_ms must be >= 1");
        }
        if m.post_abort_settle_ms > 1000 {
            eyre::bail!("motion.post_abort_settle_ms must be <= 1000");
        }

        let t = &self.torque;
        if !(t.ewma_alpha > 0.0 && t.ewma_alpha <= 1.0) {
            eyre::bail!("torque.ewma_alpha must be in (0.0, 1.0]");
        }
        if !t.offset_pct.is_finite() || !t.no_reading_sentinel.is_finite() {
            eyre::bail!("torque.offset_pct and torque.no_reading_sentinel must be finite");
        }

        let f = &self.force;
        if !(f.sensor_min_kg.is_finite() && f.sensor_max_kg.is_finite())
            || f.sensor_min_kg >= f.sensor_max_kg
        {
            eyre::bail!("force.sensor_min_kg must be < force.sensor_max_kg");
        }
        if !(f.safety_factor.is_finite() && f.safety_factor >= 1.0) {
            eyre::bail!("force.safety_factor must be >= 1.0");
        }
        if !finite_positive(f.load_cell_target_min_kg)
            || f.load_cell_target_min_kg >= f.load_cell_target_max_kg
        {
            eyre::bail!("force.load_cell_target range must be positive and non-empty");
        }
        if !finite_positive(f.torque_target_min_kg)
            || f.torque_target_min_kg >= f.torque_target_max_kg
        {
            eyre::bail!("force.torque_target range must be positive and non-empty");
        }
        if !finite_positive(f.idle_limit_load_cell_kg)
            || !finite_positive(f.idle_limit_torque_kg)
            || !finite_positive(f.torque_force_ceiling_kg)
        {
            eyre::bail!("force idle limits and ceiling must be > 0");
        }

        if !finite_positive(self.strain.max_deflection_mm) {
            eyre::bail!("strain.max_deflection_mm must be > 0");
        }
        if !(self.strain.contact_force_kg.is_finite() && self.strain.contact_force_kg >= 0.0) {
            eyre::bail!("strain.contact_force_kg must be >= 0");
        }

        if self.faults.grace_ms > 10_000 {
            eyre::bail!("faults.grace_ms is unreasonably large (>10s)");
        }

        let r = &self.runner;
        if r.period_ms == 0 {
            eyre::bail!("runner.period_ms must be >= 1");
        }
        if r.watchdog_ms <= r.period_ms {
            eyre::bail!("runner.watchdog_ms must exceed runner.period_ms");
        }
        if r.step_timeout_ms == 0 {
            eyre::bail!("runner.step_timeout_ms must be >= 1");
        }

        let sim = &self.simulator;
        if !finite_positive(sim.travel_mm) {
            eyre::bail!("simulator.travel_mm must be > 0");
        }
        if !(sim.start_mm.is_finite() && (0.0..=sim.travel_mm).contains(&sim.start_mm)) {
            eyre::bail!("simulator.start_mm must lie between the hard stops");
        }
        if let Some(w) = sim.workpiece_mm
            && !(w.is_finite() && w > 0.0 && w < sim.travel_mm)
        {
            eyre::bail!("simulator.workpiece_mm must lie between the hard stops");
        }
        if !(sim.workpiece_kg_per_mm.is_finite() && sim.workpiece_kg_per_mm >= 0.0) {
            eyre::bail!("simulator.workpiece_kg_per_mm must be >= 0");
        }
        if !(0.0..=100.0).contains(&sim.running_torque_pct)
            || !(0.0..=100.0).contains(&sim.stall_torque_pct)
        {
            eyre::bail!("simulator torques must be in [0, 100]");
        }

        let lc = &self.load_cell;
        if lc.baud == 0 {
            eyre::bail!("load_cell.baud must be > 0");
        }
        if lc.stale_ms == 0 {
            eyre::bail!("load_cell.stale_ms must be >= 1");
        }
        Ok(())
    }
}
