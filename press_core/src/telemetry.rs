//! Snapshot of controller state for the host.

/// Filled by [`PressController::populate_telemetry`].
///
/// Force fields are kilograms, positions millimetres relative to machine
/// home, torques percent of rated.
///
/// [`PressController::populate_telemetry`]: crate::PressController::populate_telemetry
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Telemetry {
    pub motion_state: &'static str,
    pub homing_phase: &'static str,
    pub move_state: &'static str,
    pub enabled: bool,

    pub torque_a_pct: f32,
    pub torque_b_pct: f32,
    pub torque_avg_pct: f32,
    pub torque_limit_pct: f32,

    pub force_load_cell_kg: f32,
    /// Force inferred from drive torque through the torque map
    pub force_torque_kg: f32,
    /// `load_cell` or `motor_torque`
    pub force_source: &'static str,
    /// Reading from the authoritative source
    pub force_kg: f32,
    pub force_limit_kg: f32,
    pub sensor_connected: bool,
    pub raw_sample: i32,

    pub joules: f64,
    pub machine_joules: f64,

    pub current_position_mm: f32,
    pub target_position_mm: f32,
    pub retract_position_mm: f32,
    pub homed: bool,
    pub retract_homed: bool,
    pub last_distance_mm: f32,
    pub cumulative_distance_mm: f64,
}
