//! Force-limited moves, pause/resume, and retracts.

use crate::calibration::ForceMode;
use crate::command::{ArgError, LimitAction, MoveArgs};
use crate::controller::{Activity, PressController};
use crate::error::PressError;
use crate::events::EventKind;

/// Force targets at or below this are treated as "no limit".
pub const FORCE_LIMIT_EPSILON_KG: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MoveState {
    #[default]
    Standby,
    Starting,
    Active,
    /// `notified` flips once the remaining distance has been reported.
    Paused {
        notified: bool,
    },
    Resuming,
    MovingToReference,
    Cancelled,
    Completed,
}

impl MoveState {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Standby => "STANDBY",
            Self::Starting => "STARTING",
            Self::Active => "ACTIVE",
            Self::Paused { .. } => "PAUSED",
            Self::Resuming => "RESUMING",
            Self::MovingToReference => "MOVING_TO_REFERENCE",
            Self::Cancelled => "CANCELLED",
            Self::Completed => "COMPLETED",
        }
    }

    /// States in which the drives are (or are about to be) in motion.
    pub const fn is_in_motion(self) -> bool {
        matches!(
            self,
            Self::Starting | Self::Active | Self::Resuming | Self::MovingToReference
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveKind {
    /// Operator move with optional force limit
    Move,
    /// Return to the retract reference
    Retract,
}

/// Everything the controller tracks about the move in progress.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveMove {
    /// Command name reported in START/DONE events
    pub command: &'static str,
    pub kind: MoveKind,
    pub state: MoveState,
    pub initial_steps: i64,
    /// +1 or -1
    pub direction: i64,
    pub total_steps: u64,
    pub remaining_steps: u64,
    pub velocity_sps: u32,
    pub accel_sps2: u32,
    pub torque_limit_pct: f32,
    /// Zero when the move is not force limited
    pub force_target_kg: f32,
    pub action: LimitAction,
    pub force_mode: ForceMode,
    pub distance_mm: f32,
    pub(crate) state_since_ms: u64,
}

impl ActiveMove {
    pub fn is_force_limited(&self) -> bool {
        self.force_target_kg > FORCE_LIMIT_EPSILON_KG
    }

    /// Work is only integrated for operator moves measured by the load cell.
    pub(crate) fn integrates_energy(&self) -> bool {
        self.kind == MoveKind::Move && self.force_mode == ForceMode::LoadCell
    }
}

/// Why an active move has to stop.
enum Trip {
    Sensing(PressError),
    Limit { what: String, detail: String },
}

impl PressController {
    /// Start a `move_abs` or `move_inc`.
    pub(crate) fn start_move(
        &mut self,
        command: &'static str,
        args: MoveArgs,
        absolute: bool,
    ) -> Result<(), PressError> {
        self.ensure_can_start()?;
        let home = self.machine_home.ok_or(PressError::NotHomed)?;
        let mode = self.calibration.force_mode;
        let target_kg = args.force_kg.unwrap_or(0.0);
        let torque_limit_pct = self.torque_limit_for(command, mode, target_kg)?;

        if mode == ForceMode::LoadCell {
            let reading = self.sensor_health()?;
            if args.action == LimitAction::Hold
                && target_kg > FORCE_LIMIT_EPSILON_KG
                && reading >= target_kg
            {
                return Err(PressError::ForceAlreadyReached {
                    reading_kg: reading,
                    target_kg,
                });
            }
        }

        let field = if absolute { "position" } else { "distance" };
        let travel = self.travel_steps(command, field, args.value_mm)?;
        let mech = self.cfg.mechanics;
        let current = self.position_steps();
        let overflow =
            || out_of_range(command, field, args.value_mm, "outside the axis range".into());
        let (steps, target_mm) = if absolute {
            let steps = home
                .checked_add(travel)
                .and_then(|target| target.checked_sub(current))
                .ok_or_else(overflow)?;
            (steps, args.value_mm)
        } else {
            let from_home = current
                .checked_add(travel)
                .and_then(|target| target.checked_sub(home))
                .ok_or_else(overflow)?;
            (travel, mech.steps_to_mm(from_home))
        };
        let speed = self.clamp_speed(args.speed_mms.unwrap_or(self.cfg.moves.default_speed_mms));
        self.target_position_mm = target_mm;

        let op = ActiveMove {
            command,
            kind: MoveKind::Move,
            state: MoveState::Standby,
            initial_steps: current,
            direction: 1,
            total_steps: 0,
            remaining_steps: 0,
            velocity_sps: mech.rate_to_steps(speed),
            accel_sps2: mech.rate_to_steps(self.cfg.moves.accel_mmss),
            torque_limit_pct,
            force_target_kg: target_kg.max(0.0),
            action: args.action,
            force_mode: mode,
            distance_mm: 0.0,
            state_since_ms: 0,
        };
        self.begin_move(
            op,
            steps,
            format!("{command} to {target_mm:.2} mm (mode: {mode})"),
        )
    }

    /// Torque ceiling for a move, validating the force target for the mode.
    fn torque_limit_for(
        &self,
        command: &'static str,
        mode: ForceMode,
        target_kg: f32,
    ) -> Result<f32, PressError> {
        let default = self.cfg.moves.default_torque_limit_pct;
        if target_kg <= 0.0 {
            return Ok(default);
        }
        let f = &self.cfg.force;
        let (min, max) = match mode {
            ForceMode::LoadCell => (f.load_cell_target_min_kg, f.load_cell_target_max_kg),
            ForceMode::ActuatorTorque => (f.torque_target_min_kg, f.torque_target_max_kg),
        };
        if !(min..=max).contains(&target_kg) {
            return Err(ArgError::OutOfRange {
                command,
                field: "force",
                value: target_kg,
                expected: format!("{min}..={max} kg in {mode} mode"),
            }
            .into());
        }
        Ok(match mode {
            ForceMode::LoadCell => default,
            ForceMode::ActuatorTorque => self.calibration.torque.apply(target_kg),
        })
    }

    /// Convert a position or distance to steps, bounded by the homing stroke.
    fn travel_steps(
        &self,
        command: &'static str,
        field: &'static str,
        value_mm: f32,
    ) -> Result<i64, PressError> {
        let stroke = self.cfg.homing.stroke_mm;
        if value_mm.abs() > stroke {
            return Err(out_of_range(
                command,
                field,
                value_mm,
                format!("-{stroke}..={stroke} mm"),
            ));
        }
        Ok(self.cfg.mechanics.mm_to_steps(value_mm))
    }

    /// Clamp a requested speed to the configured maximum.
    pub(crate) fn clamp_speed(&mut self, speed_mms: f32) -> f32 {
        let max = self.cfg.moves.max_speed_mms;
        if speed_mms > max {
            self.emit(
                EventKind::Info,
                format!("Speed limited to {max} mm/s for safety."),
            );
            max
        } else {
            speed_mms
        }
    }

    pub(crate) fn set_retract(
        &mut self,
        position_mm: f32,
        speed_mms: Option<f32>,
    ) -> Result<(), PressError> {
        let home = self.machine_home.ok_or(PressError::NotHomed)?;
        let travel = self.travel_steps("set_retract", "position", position_mm)?;
        let reference = home.checked_add(travel).ok_or_else(|| {
            out_of_range("set_retract", "position", position_mm, "outside the axis range".into())
        })?;
        let speed = self.clamp_speed(speed_mms.unwrap_or(self.cfg.moves.retract_speed_mms));
        self.retract_ref = Some(reference);
        self.retract_speed_mms = speed;
        tracing::info!(position_mm, speed_mms = speed, "retract position set");
        self.emit(
            EventKind::Info,
            format!("Retract position set to {position_mm:.2} mm at {speed:.2} mm/s."),
        );
        self.emit(EventKind::Done, "set_retract");
        Ok(())
    }

    pub(crate) fn retract(&mut self, speed_mms: Option<f32>) -> Result<(), PressError> {
        self.ensure_can_start()?;
        if self.machine_home.is_none() {
            return Err(PressError::NotHomed);
        }
        let speed = speed_mms.unwrap_or(self.retract_speed_mms);
        self.launch_retract(speed)
    }

    /// Command a move back to the retract reference.
    fn launch_retract(&mut self, speed_mms: f32) -> Result<(), PressError> {
        let target = self.retract_ref.ok_or(PressError::RetractNotSet)?;
        let speed = self.clamp_speed(speed_mms);
        let mech = self.cfg.mechanics;
        let current = self.position_steps();
        let target_mm = mech.steps_to_mm(target - self.machine_home.unwrap_or(0));
        self.target_position_mm = target_mm;
        let op = ActiveMove {
            command: "retract",
            kind: MoveKind::Retract,
            state: MoveState::Standby,
            initial_steps: current,
            direction: 1,
            total_steps: 0,
            remaining_steps: 0,
            velocity_sps: mech.rate_to_steps(speed),
            accel_sps2: mech.rate_to_steps(self.cfg.moves.accel_mmss),
            torque_limit_pct: self.cfg.moves.default_torque_limit_pct,
            force_target_kg: 0.0,
            action: LimitAction::Skip,
            force_mode: self.calibration.force_mode,
            distance_mm: 0.0,
            state_since_ms: 0,
        };
        self.begin_move(op, target - current, format!("retract to {target_mm:.2} mm"))
    }

    fn begin_move(
        &mut self,
        mut op: ActiveMove,
        steps: i64,
        start_text: String,
    ) -> Result<(), PressError> {
        op.direction = if steps < 0 { -1 } else { 1 };
        op.total_steps = steps.unsigned_abs();
        op.remaining_steps = op.total_steps;
        op.initial_steps = self.position_steps();
        op.state_since_ms = self.now_ms();

        if op.total_steps == 0 {
            self.emit(EventKind::Start, &start_text);
            self.emit(EventKind::Info, "Already at target position.");
            self.complete(op);
            return Ok(());
        }

        // A non-hold move that starts at its force target has nothing to do
        // but its limit action.
        if op.integrates_energy() && op.is_force_limited() {
            let reading = self.sensor.reading();
            if reading >= op.force_target_kg {
                self.emit(EventKind::Start, &start_text);
                op.state = MoveState::Active;
                self.on_limit_reached(
                    op,
                    format!("Force limit of {:.2} kg", op.force_target_kg),
                    format!("measured {reading:.2} kg"),
                );
                return Ok(());
            }
        }

        self.energy.reset();
        self.torque_limit_pct = op.torque_limit_pct;
        self.start_motion(steps, op.velocity_sps, op.accel_sps2)?;
        op.state = MoveState::Starting;
        self.activity = Activity::Moving(op);
        tracing::info!(
            command = op.command,
            steps,
            velocity_sps = op.velocity_sps,
            force_target_kg = op.force_target_kg,
            "move started"
        );
        self.emit(EventKind::Start, &start_text);
        Ok(())
    }

    pub(crate) fn step_move(&mut self, mut op: ActiveMove, now: u64) {
        if op.state == MoveState::Active {
            match self.check_move_limits(&op) {
                Some(Trip::Sensing(err)) => {
                    self.abort_motion();
                    self.energy.stop();
                    op.state = MoveState::Paused { notified: false };
                    self.activity = Activity::Moving(op);
                    tracing::warn!(
                        command = op.command,
                        error = %err,
                        "move stopped by sensor fault"
                    );
                    self.emit(EventKind::Error, format!("Move stopped: {err}"));
                    return;
                }
                Some(Trip::Limit { what, detail }) => {
                    self.on_limit_reached(op, what, detail);
                    return;
                }
                None => {}
            }
        }

        let moving = self.is_moving();
        let pos = self.position_steps();
        let traveled = (pos - op.initial_steps).unsigned_abs();

        match op.state {
            MoveState::Starting | MoveState::Resuming => {
                if moving {
                    let resumed = op.state == MoveState::Resuming;
                    op.state = match op.kind {
                        MoveKind::Move => MoveState::Active,
                        MoveKind::Retract => MoveState::MovingToReference,
                    };
                    op.state_since_ms = now;
                    if op.integrates_energy() {
                        if resumed {
                            self.energy.resume();
                        } else {
                            self.energy.start();
                        }
                    }
                    tracing::debug!(
                        command = op.command,
                        state = op.state.name(),
                        "motion confirmed"
                    );
                } else if traveled >= op.total_steps {
                    self.complete(op);
                    return;
                } else if now.saturating_sub(op.state_since_ms) > self.cfg.moves.start_timeout_ms {
                    let [a, b] = self.status_words();
                    tracing::warn!(
                        command = op.command,
                        status_a = a,
                        status_b = b,
                        "move did not start"
                    );
                    self.emit(
                        EventKind::Error,
                        format!(
                            "Move timeout: {} did not start within {} ms (A status=0x{a:08X}, B status=0x{b:08X})",
                            op.command, self.cfg.moves.start_timeout_ms
                        ),
                    );
                    self.finalize(op, false);
                    return;
                }
            }
            MoveState::Active | MoveState::MovingToReference => {
                if !moving {
                    self.complete(op);
                    return;
                }
            }
            MoveState::Paused { notified: false } if !moving => {
                op.remaining_steps = op.total_steps.saturating_sub(traveled);
                op.state = MoveState::Paused { notified: true };
                let remaining_mm = self
                    .cfg
                    .mechanics
                    .steps_to_mm(i64::try_from(op.remaining_steps).unwrap_or(i64::MAX));
                self.emit(
                    EventKind::Info,
                    format!(
                        "{} paused with {remaining_mm:.3} mm remaining. Send resume or cancel.",
                        op.command
                    ),
                );
            }
            _ => {}
        }

        op.distance_mm = self
            .cfg
            .mechanics
            .steps_to_mm(i64::try_from(traveled).unwrap_or(i64::MAX));
        if op.state == MoveState::Active && op.integrates_energy() {
            let position_mm = f64::from(self.position_mm());
            let force = self.sensor.reading();
            self.energy.sample(position_mm, force, op.force_target_kg);
        }
        self.activity = Activity::Moving(op);
    }

    fn check_move_limits(&self, op: &ActiveMove) -> Option<Trip> {
        match op.force_mode {
            ForceMode::LoadCell => {
                if op.kind == MoveKind::Retract {
                    return None;
                }
                let reading = match self.sensor_health() {
                    Ok(r) => r,
                    Err(e) => return Some(Trip::Sensing(e)),
                };
                (op.is_force_limited() && reading >= op.force_target_kg).then(|| Trip::Limit {
                    what: format!("Force limit of {:.2} kg", op.force_target_kg),
                    detail: format!("measured {reading:.2} kg"),
                })
            }
            ForceMode::ActuatorTorque => {
                (self.is_moving() && self.torque.exceeds(op.torque_limit_pct)).then(|| {
                    let [a, b] = self.torque.latest();
                    Trip::Limit {
                        what: format!("Torque limit of {:.1}%", op.torque_limit_pct),
                        detail: format!("A {a:.1}%, B {b:.1}%"),
                    }
                })
            }
        }
    }

    fn on_limit_reached(&mut self, mut op: ActiveMove, what: String, detail: String) {
        self.abort_motion();
        self.energy.stop();
        tracing::info!(
            command = op.command,
            action = op.action.as_str(),
            %detail,
            "{what} reached"
        );
        self.emit(EventKind::Info, format!("{what} reached ({detail})."));
        match op.action {
            LimitAction::Hold => {
                op.state = MoveState::Paused { notified: false };
                self.activity = Activity::Moving(op);
            }
            LimitAction::Skip => self.complete(op),
            LimitAction::Retract => {
                self.complete(op);
                if self.retract_ref.is_none() {
                    self.emit(
                        EventKind::Error,
                        "Cannot retract: retract position is not set.",
                    );
                } else if let Err(e) = self.launch_retract(self.retract_speed_mms) {
                    tracing::warn!(error = %e, "automatic retract failed");
                    self.emit(EventKind::Error, format!("retract rejected: {e}"));
                }
            }
        }
    }

    pub(crate) fn pause(&mut self) {
        match self.activity {
            Activity::Moving(mut op) if op.state.is_in_motion() => {
                self.abort_motion();
                self.energy.stop();
                op.state = MoveState::Paused { notified: false };
                self.activity = Activity::Moving(op);
                tracing::info!(command = op.command, "move paused");
                self.emit(EventKind::Info, format!("{} paused.", op.command));
            }
            Activity::Homing(_) => {
                self.emit(EventKind::Info, "Homing cannot be paused; use cancel.");
            }
            _ => self.emit(EventKind::Info, "No active move to pause."),
        }
        self.emit(EventKind::Done, "pause");
    }

    pub(crate) fn resume(&mut self) -> Result<(), PressError> {
        let Activity::Moving(mut op) = self.activity else {
            self.emit(EventKind::Info, "No paused move to resume.");
            self.emit(EventKind::Done, "resume");
            return Ok(());
        };
        if !matches!(op.state, MoveState::Paused { .. }) {
            self.emit(EventKind::Info, "Move is not paused.");
            self.emit(EventKind::Done, "resume");
            return Ok(());
        }

        if op.integrates_energy() {
            let reading = self.sensor_health()?;
            if op.action == LimitAction::Hold
                && op.is_force_limited()
                && reading >= op.force_target_kg
            {
                return Err(PressError::ForceAlreadyReached {
                    reading_kg: reading,
                    target_kg: op.force_target_kg,
                });
            }
        }

        let traveled = (self.position_steps() - op.initial_steps).unsigned_abs();
        op.remaining_steps = op.total_steps.saturating_sub(traveled);
        if op.remaining_steps == 0 {
            self.emit(EventKind::Info, "Move already complete.");
            self.complete(op);
            self.emit(EventKind::Done, "resume");
            return Ok(());
        }

        let steps = op.direction * i64::try_from(op.remaining_steps).unwrap_or(i64::MAX);
        self.torque_limit_pct = op.torque_limit_pct;
        self.start_motion(steps, op.velocity_sps, op.accel_sps2)?;
        op.state = MoveState::Resuming;
        op.state_since_ms = self.now_ms();
        self.activity = Activity::Moving(op);
        let remaining_mm = self.cfg.mechanics.steps_to_mm(steps.abs());
        tracing::info!(command = op.command, remaining_mm, "move resumed");
        self.emit(
            EventKind::Info,
            format!("Resuming {}: {remaining_mm:.3} mm remaining.", op.command),
        );
        self.emit(EventKind::Done, "resume");
        Ok(())
    }

    pub(crate) fn cancel(&mut self) {
        match self.activity {
            Activity::Homing(job) => {
                self.abort_motion();
                self.torque_limit_pct = self.cfg.moves.default_torque_limit_pct;
                self.activity = Activity::Idle;
                tracing::info!(target = ?job.target, "homing cancelled");
                self.emit(
                    EventKind::Info,
                    format!("{} cancelled.", job.target.command_name()),
                );
            }
            Activity::Moving(op) => {
                self.abort_motion();
                self.finalize(op, false);
                self.emit(EventKind::Info, format!("{} cancelled.", op.command));
            }
            Activity::Idle | Activity::Faulted { .. } => {
                self.emit(EventKind::Info, "No operation to cancel.");
            }
        }
        self.emit(EventKind::Done, "cancel");
    }

    fn complete(&mut self, op: ActiveMove) {
        self.emit(EventKind::Done, op.command);
        self.finalize(op, true);
    }

    /// Book-keeping shared by every way a move can end.
    pub(crate) fn finalize(&mut self, mut op: ActiveMove, success: bool) {
        self.energy.stop();
        let traveled = (self.position_steps() - op.initial_steps).abs();
        op.distance_mm = self.cfg.mechanics.steps_to_mm(traveled);
        op.remaining_steps = 0;
        if success {
            self.last_distance_mm = op.distance_mm;
            self.cumulative_distance_mm += f64::from(op.distance_mm);
        }
        op.state = if success {
            MoveState::Completed
        } else {
            MoveState::Cancelled
        };
        self.last_move_state = op.state;
        self.torque_limit_pct = self.cfg.moves.default_torque_limit_pct;
        self.activity = Activity::Idle;
        tracing::info!(
            command = op.command,
            success,
            distance_mm = op.distance_mm,
            "move finished"
        );
    }
}

fn out_of_range(
    command: &'static str,
    field: &'static str,
    value: f32,
    expected: String,
) -> PressError {
    ArgError::OutOfRange {
        command,
        field,
        value,
        expected,
    }
    .into()
}

