//! `From` implementations bridging `press_config` types to `press_core` types.

use crate::config::{
    FaultCfg, ForceCfg, HomingCfg, LoopCfg, MechanicsCfg, MoveCfg, PressCfg, StrainCfg, TorqueCfg,
};

// ── Mechanics ────────────────────────────────────────────────────────────────

impl From<&press_config::Mechanics> for MechanicsCfg {
    fn from(c: &press_config::Mechanics) -> Self {
        Self {
            steps_per_mm: c.steps_per_mm,
        }
    }
}

// ── Homing ───────────────────────────────────────────────────────────────────

impl From<&press_config::Homing> for HomingCfg {
    fn from(c: &press_config::Homing) -> Self {
        Self {
            stroke_mm: c.stroke_mm,
            rapid_speed_mms: c.rapid_speed_mms,
            touch_speed_mms: c.touch_speed_mms,
            backoff_speed_mms: c.backoff_speed_mms,
            accel_mmss: c.accel_mmss,
            search_torque_pct: c.search_torque_pct,
            backoff_torque_pct: c.backoff_torque_pct,
            backoff_mm: c.backoff_mm,
            start_timeout_ms: c.start_timeout_ms,
            max_duration_ms: c.max_duration_ms,
        }
    }
}

// ── Motion ───────────────────────────────────────────────────────────────────

impl From<&press_config::Motion> for MoveCfg {
    fn from(c: &press_config::Motion) -> Self {
        Self {
            default_speed_mms: c.default_speed_mms,
            accel_mmss: c.accel_mmss,
            default_torque_limit_pct: c.default_torque_limit_pct,
            max_speed_mms: c.max_speed_mms,
            start_timeout_ms: c.start_timeout_ms,
            retract_speed_mms: c.retract_speed_mms,
            post_abort_settle_ms: c.post_abort_settle_ms,
        }
    }
}

// ── Torque / force / strain ──────────────────────────────────────────────────

impl From<&press_config::Torque> for TorqueCfg {
    fn from(c: &press_config::Torque) -> Self {
        Self {
            ewma_alpha: c.ewma_alpha,
            offset_pct: c.offset_pct,
            no_reading_sentinel: c.no_reading_sentinel,
        }
    }
}

impl From<&press_config::Force> for ForceCfg {
    fn from(c: &press_config::Force) -> Self {
        Self {
            sensor_min_kg: c.sensor_min_kg,
            sensor_max_kg: c.sensor_max_kg,
            safety_factor: c.safety_factor,
            load_cell_target_min_kg: c.load_cell_target_min_kg,
            load_cell_target_max_kg: c.load_cell_target_max_kg,
            torque_target_min_kg: c.torque_target_min_kg,
            torque_target_max_kg: c.torque_target_max_kg,
            idle_limit_load_cell_kg: c.idle_limit_load_cell_kg,
            idle_limit_torque_kg: c.idle_limit_torque_kg,
            torque_force_ceiling_kg: c.torque_force_ceiling_kg,
        }
    }
}

impl From<&press_config::Strain> for StrainCfg {
    fn from(c: &press_config::Strain) -> Self {
        Self {
            max_deflection_mm: c.max_deflection_mm,
            contact_force_kg: c.contact_force_kg,
        }
    }
}

impl From<&press_config::Faults> for FaultCfg {
    fn from(c: &press_config::Faults) -> Self {
        Self {
            grace_ms: c.grace_ms,
        }
    }
}

impl From<&press_config::Runner> for LoopCfg {
    fn from(c: &press_config::Runner) -> Self {
        Self {
            period_ms: c.period_ms,
            watchdog_ms: c.watchdog_ms,
            step_timeout_ms: c.step_timeout_ms,
        }
    }
}

// ── Whole config ─────────────────────────────────────────────────────────────

impl From<&press_config::Config> for PressCfg {
    fn from(c: &press_config::Config) -> Self {
        Self {
            mechanics: (&c.mechanics).into(),
            homing: (&c.homing).into(),
            moves: (&c.motion).into(),
            torque: (&c.torque).into(),
            force: (&c.force).into(),
            strain: (&c.strain).into(),
            faults: (&c.faults).into(),
        }
    }
}
