//! Runtime configuration for the press controller.
//!
//! Defaults are the device constants; `press_config` supplies overrides
//! from TOML through the `From` impls in `conversions`.

/// Axis geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MechanicsCfg {
    /// Motor pulses per millimetre of travel
    pub steps_per_mm: f32,
}

impl Default for MechanicsCfg {
    fn default() -> Self {
        Self {
            steps_per_mm: 160.0,
        }
    }
}

impl MechanicsCfg {
    #[allow(clippy::cast_possible_truncation)]
    pub fn mm_to_steps(&self, mm: f32) -> i64 {
        (f64::from(mm) * f64::from(self.steps_per_mm)).round() as i64
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn steps_to_mm(&self, steps: i64) -> f32 {
        (steps as f64 / f64::from(self.steps_per_mm)) as f32
    }

    /// Convert a speed or acceleration in mm/s (mm/s²) to steps, at least 1.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn rate_to_steps(&self, mm_per_s: f32) -> u32 {
        (f64::from(mm_per_s) * f64::from(self.steps_per_mm))
            .round()
            .clamp(1.0, f64::from(u32::MAX)) as u32
    }
}

/// Torque-based hard-stop search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HomingCfg {
    pub stroke_mm: f32,
    pub rapid_speed_mms: f32,
    pub touch_speed_mms: f32,
    pub backoff_speed_mms: f32,
    pub accel_mmss: f32,
    pub search_torque_pct: f32,
    pub backoff_torque_pct: f32,
    pub backoff_mm: f32,
    pub start_timeout_ms: u64,
    pub max_duration_ms: u64,
}

impl Default for HomingCfg {
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

/// Moves and retracts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveCfg {
    pub default_speed_mms: f32,
    pub accel_mmss: f32,
    pub default_torque_limit_pct: f32,
    pub max_speed_mms: f32,
    pub start_timeout_ms: u64,
    pub retract_speed_mms: f32,
    pub post_abort_settle_ms: u64,
}

impl Default for MoveCfg {
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

/// Load feedback smoothing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TorqueCfg {
    pub ewma_alpha: f32,
    pub offset_pct: f32,
    pub no_reading_sentinel: f32,
}

impl Default for TorqueCfg {
    fn default() -> Self {
        Self {
            ewma_alpha: 0.2,
            offset_pct: -2.4,
            no_reading_sentinel: -9999.0,
        }
    }
}

/// Force sensing ranges and limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForceCfg {
    pub sensor_min_kg: f32,
    pub sensor_max_kg: f32,
    pub safety_factor: f32,
    pub load_cell_target_min_kg: f32,
    pub load_cell_target_max_kg: f32,
    pub torque_target_min_kg: f32,
    pub torque_target_max_kg: f32,
    pub idle_limit_load_cell_kg: f32,
    pub idle_limit_torque_kg: f32,
    pub torque_force_ceiling_kg: f32,
}

impl Default for ForceCfg {
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

impl ForceCfg {
    /// Highest reading accepted before the sensor counts as out of range.
    pub fn sensor_ceiling_kg(&self) -> f32 {
        self.sensor_max_kg * self.safety_factor
    }
}

/// Frame compliance model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrainCfg {
    pub max_deflection_mm: f32,
    pub contact_force_kg: f32,
}

impl Default for StrainCfg {
    fn default() -> Self {
        Self {
            max_deflection_mm: 2.0,
            contact_force_kg: 3.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaultCfg {
    pub grace_ms: u64,
}

impl Default for FaultCfg {
    fn default() -> Self {
        Self { grace_ms: 500 }
    }
}

/// Complete controller configuration.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PressCfg {
    pub mechanics: MechanicsCfg,
    pub homing: HomingCfg,
    pub moves: MoveCfg,
    pub torque: TorqueCfg,
    pub force: ForceCfg,
    pub strain: StrainCfg,
    pub faults: FaultCfg,
}

/// Cooperative loop pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopCfg {
    pub period_ms: u64,
    pub watchdog_ms: u64,
    pub step_timeout_ms: u64,
}

impl Default for LoopCfg {
    fn default() -> Self {
        Self {
            period_ms: 5,
            watchdog_ms: 100,
            step_timeout_ms: 300_000,
        }
    }
}
