//! The press controller: owns the drives, sensor, and calibration, and
//! advances homing and moves one `update()` at a time.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use press_traits::{Actuator, Clock, LoadSensor};

use crate::calibration::{
    Calibration, CalibrationStore, ForceMode, LinearMap, validate_load_cell_offset,
    validate_load_cell_scale, validate_strain_coeffs, validate_torque_offset,
    validate_torque_scale,
};
use crate::command::Command;
use crate::config::PressCfg;
use crate::energy::EnergyIntegrator;
use crate::error::PressError;
use crate::events::{EventKind, EventSink};
use crate::homing::{HomingJob, HomingPhase, HomingTarget};
use crate::hw_error::map_hw_error;
use crate::motion::{ActiveMove, MoveState};
use crate::status::MotionState;
use crate::strain::StrainModel;
use crate::telemetry::Telemetry;
use crate::torque::TorqueMonitor;

const ACTUATOR_NAMES: [&str; 2] = ["A", "B"];

/// What the controller is doing. Exactly one operation can be in flight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Activity {
    Idle,
    Homing(HomingJob),
    Moving(ActiveMove),
    Faulted { status: [u32; 2] },
}

pub struct PressController {
    pub(crate) actuators: [Box<dyn Actuator + Send>; 2],
    pub(crate) sensor: Box<dyn LoadSensor + Send>,
    pub(crate) sink: Box<dyn EventSink + Send>,
    pub(crate) store: Box<dyn CalibrationStore + Send>,
    pub(crate) clock: Arc<dyn Clock + Send + Sync>,
    pub(crate) epoch: Instant,
    pub(crate) cfg: PressCfg,
    pub(crate) calibration: Calibration,
    pub(crate) torque: TorqueMonitor,
    pub(crate) torque_limit_pct: f32,
    pub(crate) energy: EnergyIntegrator,
    pub(crate) activity: Activity,
    pub(crate) last_move_state: MoveState,
    /// Machine zero in absolute steps
    pub(crate) machine_home: Option<i64>,
    /// Retract reference in absolute steps
    pub(crate) retract_ref: Option<i64>,
    pub(crate) retract_speed_mms: f32,
    pub(crate) enabled: bool,
    pub(crate) fault_grace_until_ms: u64,
    pub(crate) target_position_mm: f32,
    pub(crate) last_distance_mm: f32,
    pub(crate) cumulative_distance_mm: f64,
}

impl fmt::Debug for PressController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PressController")
            .field("cfg", &self.cfg)
            .field("calibration", &self.calibration)
            .field("activity", &self.activity)
            .field("machine_home", &self.machine_home)
            .field("retract_ref", &self.retract_ref)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl PressController {
    /// Assemble a controller from validated parts. Use `PressBuilder`.
    pub(crate) fn from_parts(
        actuators: [Box<dyn Actuator + Send>; 2],
        sensor: Box<dyn LoadSensor + Send>,
        sink: Box<dyn EventSink + Send>,
        store: Box<dyn CalibrationStore + Send>,
        clock: Arc<dyn Clock + Send + Sync>,
        cfg: PressCfg,
        calibration: Calibration,
    ) -> Self {
        let epoch = clock.now();
        Self {
            actuators,
            sensor,
            sink,
            store,
            epoch,
            torque: TorqueMonitor::new(&cfg.torque),
            torque_limit_pct: cfg.moves.default_torque_limit_pct,
            energy: EnergyIntegrator::new(
                StrainModel::new(calibration.strain_coeffs, cfg.strain.max_deflection_mm),
                cfg.strain.contact_force_kg,
            ),
            activity: Activity::Idle,
            last_move_state: MoveState::Standby,
            machine_home: None,
            retract_ref: None,
            retract_speed_mms: cfg.moves.retract_speed_mms,
            enabled: true,
            fault_grace_until_ms: 0,
            target_position_mm: 0.0,
            last_distance_mm: 0.0,
            cumulative_distance_mm: 0.0,
            clock,
            cfg,
            calibration,
        }
    }

    /// Advance the controller by one cycle. Never blocks except for the
    /// short settle delay after an abort.
    pub fn update(&mut self) {
        let now = self.now_ms();
        self.check_faults(now);
        self.sample_torque();
        match self.activity {
            Activity::Homing(job) => self.step_homing(job, now),
            Activity::Moving(op) => self.step_move(op, now),
            Activity::Idle | Activity::Faulted { .. } => {}
        }
    }

    /// Parse and execute one text command. Parse failures and rejections
    /// are reported as `ERROR` events.
    pub fn handle_command(&mut self, name: &str, args: &str) {
        match Command::parse(name, args) {
            Ok(cmd) => self.execute(cmd),
            Err(e) => {
                tracing::warn!(command = name, error = %e, "command rejected");
                self.emit(EventKind::Error, e.to_string());
            }
        }
    }

    pub fn execute(&mut self, cmd: Command) {
        let name = cmd.name();
        tracing::debug!(command = name, "executing");
        if let Err(e) = self.dispatch(cmd) {
            tracing::warn!(command = name, error = %e, "command rejected");
            let text = match &e {
                PressError::Argument(arg) => arg.to_string(),
                other => format!("{name} rejected: {other}"),
            };
            self.emit(EventKind::Error, text);
        }
    }

    fn dispatch(&mut self, cmd: Command) -> Result<(), PressError> {
        match cmd {
            Command::Home => self.start_homing(HomingTarget::MachineHome),
            Command::HomeRetract => self.start_homing(HomingTarget::RetractReference),
            Command::MoveAbs(args) => self.start_move("move_abs", args, true),
            Command::MoveInc(args) => self.start_move("move_inc", args, false),
            Command::SetRetract {
                position_mm,
                speed_mms,
            } => self.set_retract(position_mm, speed_mms),
            Command::Retract { speed_mms } => self.retract(speed_mms),
            Command::Pause => {
                self.pause();
                Ok(())
            }
            Command::Resume => self.resume(),
            Command::Cancel => {
                self.cancel();
                Ok(())
            }
            Command::SetForceMode(mode) => {
                self.set_force_mode(mode);
                Ok(())
            }
            Command::SetForceOffset(v) => self.set_force_offset(v),
            Command::SetForceScale(v) => self.set_force_scale(v),
            Command::SetForceZero => self.set_force_zero(),
            Command::SetStrainCal(coeffs) => self.set_strain_coeffs(coeffs),
            Command::Enable => self.enable(),
            Command::Disable => {
                self.disable();
                Ok(())
            }
            Command::Reset => {
                self.reset();
                Ok(())
            }
            Command::DumpCalibration => {
                self.dump_calibration();
                Ok(())
            }
        }
    }

    // ---- queries ----

    pub fn motion_state(&self) -> MotionState {
        match self.activity {
            Activity::Idle => MotionState::Standby,
            Activity::Homing(_) => MotionState::Homing,
            Activity::Moving(_) => MotionState::Moving,
            Activity::Faulted { .. } => MotionState::ActuatorFault,
        }
    }

    pub fn homing_phase(&self) -> HomingPhase {
        match self.activity {
            Activity::Homing(job) => job.phase,
            _ => HomingPhase::Idle,
        }
    }

    /// State of the current move, or how the last one ended.
    pub fn move_state(&self) -> MoveState {
        match self.activity {
            Activity::Moving(op) => op.state,
            _ => self.last_move_state,
        }
    }

    pub fn active_move(&self) -> Option<&ActiveMove> {
        match &self.activity {
            Activity::Moving(op) => Some(op),
            _ => None,
        }
    }

    pub const fn machine_home_steps(&self) -> Option<i64> {
        self.machine_home
    }

    pub const fn retract_steps(&self) -> Option<i64> {
        self.retract_ref
    }

    pub const fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub const fn energy(&self) -> &EnergyIntegrator {
        &self.energy
    }

    pub const fn torque_limit_pct(&self) -> f32 {
        self.torque_limit_pct
    }

    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub const fn config(&self) -> &PressCfg {
        &self.cfg
    }

    /// True when nothing will change without a new command.
    pub fn is_settled(&self) -> bool {
        match self.activity {
            Activity::Idle | Activity::Faulted { .. } => true,
            Activity::Moving(op) => op.state == MoveState::Paused { notified: true },
            Activity::Homing(_) => false,
        }
    }

    /// Current position relative to machine home (absolute when not homed).
    pub fn position_mm(&self) -> f32 {
        let rel = self.position_steps() - self.machine_home.unwrap_or(0);
        self.cfg.mechanics.steps_to_mm(rel)
    }

    pub fn populate_telemetry(&self, t: &mut Telemetry) {
        let [torque_a, torque_b] = self.torque.latest();
        let torque_avg = self.torque.average();
        let force = &self.cfg.force;
        let load_cell_kg = self.sensor.reading();
        let torque_kg = self
            .calibration
            .torque
            .invert(torque_avg)
            .map_or(0.0, |kg| kg.clamp(0.0, force.torque_force_ceiling_kg));

        t.motion_state = self.motion_state().name();
        t.homing_phase = self.homing_phase().name();
        t.move_state = self.move_state().name();
        t.enabled = self.enabled;
        t.torque_a_pct = torque_a;
        t.torque_b_pct = torque_b;
        t.torque_avg_pct = torque_avg;
        t.torque_limit_pct = self.torque_limit_pct;
        t.force_load_cell_kg = load_cell_kg;
        t.force_torque_kg = torque_kg;
        t.force_source = self.calibration.force_mode.as_str();
        t.force_kg = match self.calibration.force_mode {
            ForceMode::LoadCell => load_cell_kg,
            ForceMode::ActuatorTorque => torque_kg,
        };
        t.force_limit_kg = match self.active_move() {
            Some(op) if op.is_force_limited() => op.force_target_kg,
            _ => match self.calibration.force_mode {
                ForceMode::LoadCell => force.idle_limit_load_cell_kg,
                ForceMode::ActuatorTorque => force.idle_limit_torque_kg,
            },
        };
        t.sensor_connected = self.sensor.is_connected();
        t.raw_sample = self.sensor.raw_sample();
        t.joules = self.energy.state().net_joules;
        t.machine_joules = self.energy.state().machine_joules;
        t.current_position_mm = self.position_mm();
        t.target_position_mm = self.target_position_mm;
        t.retract_position_mm = self.retract_ref.map_or(0.0, |r| {
            self.cfg
                .mechanics
                .steps_to_mm(r - self.machine_home.unwrap_or(0))
        });
        t.homed = self.machine_home.is_some();
        t.retract_homed = self.retract_ref.is_some();
        t.last_distance_mm = self.last_distance_mm;
        t.cumulative_distance_mm = self.cumulative_distance_mm;
    }

    pub fn telemetry(&self) -> Telemetry {
        let mut t = Telemetry::default();
        self.populate_telemetry(&mut t);
        t
    }

    // ---- shared helpers ----

    pub(crate) fn now_ms(&self) -> u64 {
        self.clock.ms_since(self.epoch)
    }

    pub(crate) fn emit(&mut self, kind: EventKind, text: impl AsRef<str>) {
        let text = text.as_ref();
        tracing::trace!(kind = %kind, text, "event");
        self.sink.emit(kind, text);
    }

    pub(crate) fn position_steps(&self) -> i64 {
        self.actuators[0].commanded_position()
    }

    pub(crate) fn is_moving(&self) -> bool {
        self.enabled && self.actuators.iter().any(|a| a.is_moving())
    }

    pub(crate) fn status_words(&self) -> [u32; 2] {
        [
            self.actuators[0].status_word(),
            self.actuators[1].status_word(),
        ]
    }

    /// Reject a new operation unless the press is idle, enabled, and healthy.
    pub(crate) fn ensure_can_start(&self) -> Result<(), PressError> {
        let status = match self.activity {
            Activity::Faulted { status } => Some(status),
            _ if self.actuators.iter().any(|a| a.is_faulted()) => Some(self.status_words()),
            _ => None,
        };
        if let Some([status_a, status_b]) = status {
            return Err(PressError::ActuatorFault { status_a, status_b });
        }
        if !self.enabled {
            return Err(PressError::MotorsDisabled);
        }
        match self.activity {
            Activity::Homing(_) => Err(PressError::Busy("homing")),
            Activity::Moving(_) => Err(PressError::Busy("move")),
            Activity::Idle | Activity::Faulted { .. } => Ok(()),
        }
    }

    /// Current load cell reading, or why it cannot be trusted.
    pub(crate) fn sensor_health(&self) -> Result<f32, PressError> {
        if !self.sensor.is_connected() {
            return Err(PressError::SensorDisconnected);
        }
        let reading = self.sensor.reading();
        let min_kg = self.cfg.force.sensor_min_kg;
        let max_kg = self.cfg.force.sensor_ceiling_kg();
        if !reading.is_finite() || reading < min_kg || reading > max_kg {
            return Err(PressError::SensorOutOfRange {
                reading_kg: reading,
                min_kg,
                max_kg,
            });
        }
        Ok(reading)
    }

    /// Command both drives identically. On failure neither is left moving.
    pub(crate) fn start_motion(
        &mut self,
        steps: i64,
        velocity_sps: u32,
        accel_sps2: u32,
    ) -> Result<(), PressError> {
        self.torque.reset();
        for i in 0..2 {
            if let Err(e) = self.actuators[i].command_relative_move(steps, velocity_sps, accel_sps2)
            {
                let err = map_hw_error(&*e);
                tracing::warn!(actuator = ACTUATOR_NAMES[i], error = %err, "move command failed");
                self.stop_actuators();
                return Err(err);
            }
        }
        tracing::debug!(steps, velocity_sps, accel_sps2, "move commanded");
        Ok(())
    }

    /// Decelerate both drives and give them a moment to settle.
    pub(crate) fn abort_motion(&mut self) {
        self.stop_actuators();
        let settle = self.cfg.moves.post_abort_settle_ms;
        if settle > 0 {
            self.clock.sleep(Duration::from_millis(settle));
        }
    }

    fn stop_actuators(&mut self) {
        for (name, act) in ACTUATOR_NAMES.iter().zip(self.actuators.iter_mut()) {
            if let Err(e) = act.decelerate_stop() {
                tracing::warn!(actuator = name, error = %e, "decelerate_stop failed");
            }
        }
    }

    fn sample_torque(&mut self) {
        let raw = [
            self.actuators[0].load_feedback_percent(),
            self.actuators[1].load_feedback_percent(),
        ];
        let moving = if self.enabled {
            [self.actuators[0].is_moving(), self.actuators[1].is_moving()]
        } else {
            [false; 2]
        };
        let hold = matches!(
            self.activity,
            Activity::Moving(ActiveMove {
                state: MoveState::Active,
                ..
            })
        );
        self.torque.sample(raw, moving, hold);
    }

    // ---- faults, enable, reset ----

    fn check_faults(&mut self, now: u64) {
        if now < self.fault_grace_until_ms || matches!(self.activity, Activity::Faulted { .. }) {
            return;
        }
        if self.actuators.iter().any(|a| a.is_faulted()) {
            self.enter_fault("drive reported a fault");
        }
    }

    /// Stop everything and latch the fault state until `reset`.
    pub fn enter_fault(&mut self, reason: &str) {
        let status = self.status_words();
        self.stop_actuators();
        self.energy.stop();
        if matches!(self.activity, Activity::Moving(_)) {
            self.last_move_state = MoveState::Cancelled;
        }
        self.activity = Activity::Faulted { status };
        self.torque_limit_pct = self.cfg.moves.default_torque_limit_pct;
        let [a, b] = status;
        tracing::error!(status_a = a, status_b = b, reason, "actuator fault");
        self.emit(
            EventKind::Error,
            format!("Actuator fault: {reason} (A status=0x{a:08X}, B status=0x{b:08X})"),
        );
    }

    fn set_drives_enabled(&mut self, enabled: bool) -> Result<(), PressError> {
        for (name, act) in ACTUATOR_NAMES.iter().zip(self.actuators.iter_mut()) {
            act.set_enabled(enabled).map_err(|e| {
                let err = map_hw_error(&*e);
                tracing::warn!(actuator = name, enabled, error = %err, "set_enabled failed");
                err
            })?;
        }
        Ok(())
    }

    fn enable(&mut self) -> Result<(), PressError> {
        if let Activity::Faulted {
            status: [status_a, status_b],
        } = self.activity
        {
            return Err(PressError::ActuatorFault { status_a, status_b });
        }
        self.set_drives_enabled(true)?;
        self.enabled = true;
        tracing::info!("drives enabled");
        self.emit(EventKind::Done, "enable");
        Ok(())
    }

    fn disable(&mut self) {
        match self.activity {
            Activity::Homing(_) | Activity::Moving(_) => {
                self.abort_motion();
                if let Activity::Moving(op) = self.activity {
                    self.finalize(op, false);
                }
                self.activity = Activity::Idle;
                self.emit(EventKind::Info, "Operation cancelled: drives disabled.");
            }
            Activity::Idle | Activity::Faulted { .. } => {}
        }
        if let Err(e) = self.set_drives_enabled(false) {
            self.emit(EventKind::Error, format!("disable: {e}"));
        }
        self.enabled = false;
        tracing::info!("drives disabled");
        self.emit(EventKind::Done, "disable");
    }

    fn reset(&mut self) {
        self.stop_actuators();
        self.energy.stop();
        if let Activity::Moving(op) = self.activity {
            self.finalize(op, false);
        }
        for (name, act) in ACTUATOR_NAMES.iter().zip(self.actuators.iter_mut()) {
            if let Err(e) = act.clear_faults() {
                tracing::warn!(actuator = name, error = %e, "clear_faults failed");
            }
        }
        if let Err(e) = self.set_drives_enabled(true) {
            self.emit(EventKind::Error, format!("reset: {e}"));
        } else {
            self.enabled = true;
        }
        self.activity = Activity::Idle;
        self.torque.reset();
        self.torque_limit_pct = self.cfg.moves.default_torque_limit_pct;
        self.fault_grace_until_ms = self.now_ms() + self.cfg.faults.grace_ms;
        tracing::info!(grace_ms = self.cfg.faults.grace_ms, "controller reset");
        self.emit(EventKind::Done, "reset");
    }

    // ---- calibration ----

    fn persist(
        &mut self,
        what: &str,
        write: impl FnOnce(&mut dyn CalibrationStore) -> Result<(), press_traits::BoxError>,
    ) {
        if let Err(e) = write(self.store.as_mut()) {
            tracing::warn!(field = what, error = %e, "calibration not persisted");
            self.emit(
                EventKind::Error,
                format!("Calibration updated but not persisted ({what}): {e}"),
            );
        }
    }

    fn set_force_mode(&mut self, mode: ForceMode) {
        self.calibration.force_mode = mode;
        self.energy.reset();
        self.persist("force_mode", |s| s.set_force_mode(mode));
        tracing::info!(mode = mode.as_str(), "force mode changed");
        self.emit(EventKind::Info, format!("Force mode set to {mode}."));
        self.emit(EventKind::Done, "set_force_mode");
    }

    fn set_force_offset(&mut self, offset: f32) -> Result<(), PressError> {
        let calibration_err = |e: crate::calibration::CalibrationError| {
            PressError::Calibration(e.to_string())
        };
        match self.calibration.force_mode {
            ForceMode::ActuatorTorque => {
                validate_torque_offset(offset).map_err(calibration_err)?;
                self.calibration.torque.offset = offset;
                let map = self.calibration.torque;
                self.persist("torque_map", |s| s.set_torque_map(map));
            }
            ForceMode::LoadCell => {
                validate_load_cell_offset(offset).map_err(calibration_err)?;
                self.sensor
                    .set_offset(offset)
                    .map_err(|e| map_hw_error(&*e))?;
                self.persist_load_cell_map();
            }
        }
        self.energy.reset();
        self.emit(
            EventKind::Info,
            format!("Force offset set to {offset} ({} mode).", self.calibration.force_mode),
        );
        self.emit(EventKind::Done, "set_force_offset");
        Ok(())
    }

    fn set_force_scale(&mut self, scale: f32) -> Result<(), PressError> {
        let calibration_err = |e: crate::calibration::CalibrationError| {
            PressError::Calibration(e.to_string())
        };
        match self.calibration.force_mode {
            ForceMode::ActuatorTorque => {
                validate_torque_scale(scale).map_err(calibration_err)?;
                self.calibration.torque.scale = scale;
                let map = self.calibration.torque;
                self.persist("torque_map", |s| s.set_torque_map(map));
            }
            ForceMode::LoadCell => {
                validate_load_cell_scale(scale).map_err(calibration_err)?;
                self.sensor.set_scale(scale).map_err(|e| map_hw_error(&*e))?;
                self.persist_load_cell_map();
            }
        }
        self.energy.reset();
        self.emit(
            EventKind::Info,
            format!("Force scale set to {scale} ({} mode).", self.calibration.force_mode),
        );
        self.emit(EventKind::Done, "set_force_scale");
        Ok(())
    }

    /// Tare the active force source at the current reading.
    fn set_force_zero(&mut self) -> Result<(), PressError> {
        let calibration_err = |e: crate::calibration::CalibrationError| {
            PressError::Calibration(e.to_string())
        };
        match self.calibration.force_mode {
            ForceMode::LoadCell => {
                let reading = self.sensor_health()?;
                let (_, offset) = self.sensor.calibration();
                let new_offset = offset - reading;
                validate_load_cell_offset(new_offset).map_err(calibration_err)?;
                self.sensor
                    .set_offset(new_offset)
                    .map_err(|e| map_hw_error(&*e))?;
                self.persist_load_cell_map();
                self.emit(
                    EventKind::Info,
                    format!("Force zeroed; load cell offset now {new_offset:.4}."),
                );
            }
            ForceMode::ActuatorTorque => {
                // Whatever the drives report now is taken as zero force.
                let new_offset = self.torque.average();
                validate_torque_offset(new_offset).map_err(calibration_err)?;
                self.calibration.torque.offset = new_offset;
                let map = self.calibration.torque;
                self.persist("torque_map", |s| s.set_torque_map(map));
                self.emit(
                    EventKind::Info,
                    format!("Force zeroed; torque offset now {new_offset:.4}."),
                );
            }
        }
        self.energy.reset();
        self.emit(EventKind::Done, "set_force_zero");
        Ok(())
    }

    fn persist_load_cell_map(&mut self) {
        let (scale, offset) = self.sensor.calibration();
        let map = LinearMap::new(scale, offset);
        self.persist("load_cell_map", |s| s.set_load_cell_map(map));
    }

    fn set_strain_coeffs(&mut self, coeffs: [f32; 5]) -> Result<(), PressError> {
        validate_strain_coeffs(&coeffs).map_err(|e| PressError::Calibration(e.to_string()))?;
        self.calibration.strain_coeffs = coeffs;
        self.energy.set_model(StrainModel::new(
            coeffs,
            self.cfg.strain.max_deflection_mm,
        ));
        self.persist("strain_coeffs", |s| s.set_strain_coeffs(coeffs));
        tracing::info!(?coeffs, "strain model updated");
        self.emit(EventKind::Info, "Machine strain calibration updated.");
        self.emit(EventKind::Done, "set_strain_cal");
        Ok(())
    }

    fn dump_calibration(&mut self) {
        let cal = self.calibration;
        let (lc_scale, lc_offset) = self.sensor.calibration();
        let [c4, c3, c2, c1, c0] = cal.strain_coeffs;
        self.emit(EventKind::Info, format!("force_mode: {}", cal.force_mode));
        self.emit(
            EventKind::Info,
            format!(
                "torque_map: scale={} offset={}",
                cal.torque.scale, cal.torque.offset
            ),
        );
        self.emit(
            EventKind::Info,
            format!("load_cell_map: scale={lc_scale} offset={lc_offset}"),
        );
        self.emit(
            EventKind::Info,
            format!("strain_coeffs: {c4} {c3} {c2} {c1} {c0}"),
        );
        self.emit(EventKind::Done, "dump_cal");
    }
}
