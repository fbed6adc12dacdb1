//! Scripted collaborators for driving the controller without hardware.
//!
//! The actuator integrates position from the clock, so tests that use a
//! manually advanced clock get exact, repeatable motion. Clones share state,
//! which lets a test keep a handle after moving one into the builder.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use press_traits::{Actuator, BoxError, Clock, LoadSensor};

use crate::calibration::DEFAULT_LOAD_CELL_MAP;
use crate::events::{Event, EventKind, EventSink};

/// A workpiece in the +direction of travel that pushes back linearly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Workpiece {
    /// Position of first contact, steps
    pub surface_steps: i64,
    pub kg_per_step: f32,
    /// Drive load added per kilogram of contact force
    pub torque_pct_per_kg: f32,
}

#[derive(Debug, Clone, Copy)]
struct Motion {
    origin: i64,
    steps: i64,
    velocity_sps: u32,
    started: Instant,
}

#[derive(Debug)]
struct ActuatorState {
    position: i64,
    motion: Option<Motion>,
    lower_stop: Option<i64>,
    upper_stop: Option<i64>,
    workpiece: Option<Workpiece>,
    enabled: bool,
    faulted: bool,
    status_word: u32,
    running_torque_pct: f32,
    stall_torque_pct: f32,
    feedback_override: Option<f32>,
    refuse_motion: bool,
    fail_commands: bool,
    commands: Vec<i64>,
    stops: usize,
}

#[derive(Debug, Clone, Copy)]
struct Kinematics {
    position: i64,
    moving: bool,
    stalled: bool,
}

impl ActuatorState {
    fn kinematics(&self, now: Instant) -> Kinematics {
        let Some(m) = self.motion else {
            return Kinematics {
                position: self.position,
                moving: false,
                stalled: false,
            };
        };
        let elapsed = now.saturating_duration_since(m.started).as_secs_f64();
        #[allow(clippy::cast_possible_truncation)]
        let travel = ((f64::from(m.velocity_sps) * elapsed).floor() as i64).min(m.steps.abs());
        let ideal = m.origin + m.steps.signum() * travel;
        let target = m.origin + m.steps;

        let stop = if m.steps < 0 {
            self.lower_stop.filter(|s| target < *s && ideal <= *s)
        } else {
            self.upper_stop.filter(|s| target > *s && ideal >= *s)
        };
        match stop {
            Some(s) => Kinematics {
                position: s,
                moving: true,
                stalled: true,
            },
            None => Kinematics {
                position: ideal,
                moving: travel < m.steps.abs(),
                stalled: false,
            },
        }
    }

    fn contact_force_kg(&self, position: i64) -> f32 {
        self.workpiece.map_or(0.0, |w| {
            #[allow(clippy::cast_precision_loss)]
            let depth = (position - w.surface_steps).max(0) as f32;
            depth * w.kg_per_step
        })
    }

    fn settle(&mut self, now: Instant) {
        self.position = self.kinematics(now).position;
        self.motion = None;
    }
}

/// Clock-driven actuator with optional hard stops and workpiece.
#[derive(Clone)]
pub struct ScriptedActuator {
    inner: Arc<Mutex<ActuatorState>>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl std::fmt::Debug for ScriptedActuator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedActuator")
            .field("state", &self.inner)
            .finish_non_exhaustive()
    }
}

impl ScriptedActuator {
    pub fn new(clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ActuatorState {
                position: 0,
                motion: None,
                lower_stop: None,
                upper_stop: None,
                workpiece: None,
                enabled: false,
                faulted: false,
                status_word: 0,
                running_torque_pct: 5.0,
                stall_torque_pct: 35.0,
                feedback_override: None,
                refuse_motion: false,
                fail_commands: false,
                commands: Vec::new(),
                stops: 0,
            })),
            clock,
        }
    }

    fn state(&self) -> MutexGuard<'_, ActuatorState> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn with_position(self, steps: i64) -> Self {
        self.state().position = steps;
        self
    }

    /// Hard stop below the current position (homing end).
    pub fn with_lower_stop(self, steps: i64) -> Self {
        self.state().lower_stop = Some(steps);
        self
    }

    pub fn with_upper_stop(self, steps: i64) -> Self {
        self.state().upper_stop = Some(steps);
        self
    }

    pub fn with_workpiece(self, workpiece: Workpiece) -> Self {
        self.state().workpiece = Some(workpiece);
        self
    }

    pub fn with_torques(self, running_pct: f32, stall_pct: f32) -> Self {
        {
            let mut s = self.state();
            s.running_torque_pct = running_pct;
            s.stall_torque_pct = stall_pct;
        }
        self
    }

    pub fn set_upper_stop(&self, steps: Option<i64>) {
        self.state().upper_stop = steps;
    }

    /// Accept move commands but never start moving.
    pub fn set_refuse_motion(&self, refuse: bool) {
        self.state().refuse_motion = refuse;
    }

    /// Return an error from every move command.
    pub fn set_fail_commands(&self, fail: bool) {
        self.state().fail_commands = fail;
    }

    pub fn set_fault(&self, faulted: bool, status_word: u32) {
        let mut s = self.state();
        s.faulted = faulted;
        s.status_word = status_word;
    }

    /// Report this value from `load_feedback_percent` regardless of motion.
    pub fn set_feedback_override(&self, pct: Option<f32>) {
        self.state().feedback_override = pct;
    }

    pub fn position(&self) -> i64 {
        self.state().kinematics(self.clock.now()).position
    }

    pub fn is_enabled(&self) -> bool {
        self.state().enabled
    }

    /// Force the workpiece exerts at the current position.
    pub fn contact_force_kg(&self) -> f32 {
        let s = self.state();
        let pos = s.kinematics(self.clock.now()).position;
        s.contact_force_kg(pos)
    }

    /// Step counts of every accepted move command, in order.
    pub fn commands(&self) -> Vec<i64> {
        self.state().commands.clone()
    }

    pub fn stop_count(&self) -> usize {
        self.state().stops
    }
}

impl Actuator for ScriptedActuator {
    fn command_relative_move(
        &mut self,
        steps: i64,
        velocity_sps: u32,
        _accel_sps2: u32,
    ) -> Result<(), BoxError> {
        let now = self.clock.now();
        let mut s = self.state();
        if s.fail_commands {
            return Err("scripted command failure".into());
        }
        if !s.enabled {
            return Err("drive disabled".into());
        }
        s.settle(now);
        s.commands.push(steps);
        if !s.refuse_motion && steps != 0 {
            s.motion = Some(Motion {
                origin: s.position,
                steps,
                velocity_sps,
                started: now,
            });
        }
        Ok(())
    }

    fn commanded_position(&self) -> i64 {
        self.position()
    }

    fn is_moving(&self) -> bool {
        self.state().kinematics(self.clock.now()).moving
    }

    fn is_faulted(&self) -> bool {
        self.state().faulted
    }

    fn status_word(&self) -> u32 {
        self.state().status_word
    }

    fn load_feedback_percent(&mut self) -> f32 {
        let now = self.clock.now();
        let s = self.state();
        if let Some(pct) = s.feedback_override {
            return pct;
        }
        let k = s.kinematics(now);
        if !k.moving {
            return 0.0;
        }
        if k.stalled {
            return s.stall_torque_pct;
        }
        let load = s
            .workpiece
            .map_or(0.0, |w| s.contact_force_kg(k.position) * w.torque_pct_per_kg);
        s.running_torque_pct + load
    }

    fn decelerate_stop(&mut self) -> Result<(), BoxError> {
        let now = self.clock.now();
        let mut s = self.state();
        s.settle(now);
        s.stops += 1;
        Ok(())
    }

    fn set_enabled(&mut self, enabled: bool) -> Result<(), BoxError> {
        let now = self.clock.now();
        let mut s = self.state();
        if !enabled {
            s.settle(now);
        }
        s.enabled = enabled;
        Ok(())
    }

    fn clear_faults(&mut self) -> Result<(), BoxError> {
        let mut s = self.state();
        s.faulted = false;
        s.status_word = 0;
        Ok(())
    }
}

#[derive(Debug)]
struct SensorState {
    base_kg: f32,
    connected: bool,
    scale: f32,
    offset: f32,
    fail_writes: bool,
}

/// Load cell whose true force is a manual value plus the contact force of
/// an optional linked actuator.
#[derive(Debug, Clone)]
pub struct ScriptedLoadSensor {
    inner: Arc<Mutex<SensorState>>,
    linked: Option<ScriptedActuator>,
}

impl Default for ScriptedLoadSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedLoadSensor {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SensorState {
                base_kg: 0.0,
                connected: true,
                scale: DEFAULT_LOAD_CELL_MAP.scale,
                offset: DEFAULT_LOAD_CELL_MAP.offset,
                fail_writes: false,
            })),
            linked: None,
        }
    }

    /// Add the workpiece force seen by `actuator` to every reading.
    pub fn linked_to(mut self, actuator: &ScriptedActuator) -> Self {
        self.linked = Some(actuator.clone());
        self
    }

    fn state(&self) -> MutexGuard<'_, SensorState> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn set_force_kg(&self, kg: f32) {
        self.state().base_kg = kg;
    }

    pub fn set_connected(&self, connected: bool) {
        self.state().connected = connected;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }

    fn true_force_kg(&self) -> f32 {
        let base = self.state().base_kg;
        base + self.linked.as_ref().map_or(0.0, ScriptedActuator::contact_force_kg)
    }

    /// Converter counts the true force produces under the factory map.
    fn raw(&self) -> f64 {
        let d = DEFAULT_LOAD_CELL_MAP;
        (f64::from(self.true_force_kg()) - f64::from(d.offset)) / f64::from(d.scale)
    }
}

impl LoadSensor for ScriptedLoadSensor {
    fn reading(&self) -> f32 {
        let raw = self.raw();
        let s = self.state();
        #[allow(clippy::cast_possible_truncation)]
        let kg = raw.mul_add(f64::from(s.scale), f64::from(s.offset)) as f32;
        kg
    }

    fn is_connected(&self) -> bool {
        self.state().connected
    }

    fn raw_sample(&self) -> i32 {
        #[allow(clippy::cast_possible_truncation)]
        let raw = self.raw().round() as i32;
        raw
    }

    fn calibration(&self) -> (f32, f32) {
        let s = self.state();
        (s.scale, s.offset)
    }

    fn set_offset(&mut self, offset: f32) -> Result<(), BoxError> {
        let mut s = self.state();
        if s.fail_writes {
            return Err("scripted sensor write failure".into());
        }
        s.offset = offset;
        Ok(())
    }

    fn set_scale(&mut self, scale: f32) -> Result<(), BoxError> {
        let mut s = self.state();
        if s.fail_writes {
            return Err("scripted sensor write failure".into());
        }
        s.scale = scale;
        Ok(())
    }
}

/// Records events; clones share the log.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<Event>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, Vec<Event>> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn events(&self) -> Vec<Event> {
        self.guard().clone()
    }

    pub fn clear(&self) {
        self.guard().clear();
    }

    /// Texts of every event of `kind`, in order.
    pub fn texts(&self, kind: EventKind) -> Vec<String> {
        self.guard()
            .iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.text.clone())
            .collect()
    }

    /// True when some event of `kind` contains `needle`.
    pub fn contains(&self, kind: EventKind, needle: &str) -> bool {
        self.guard()
            .iter()
            .any(|e| e.kind == kind && e.text.contains(needle))
    }

    /// Number of events of `kind` whose text equals `text`.
    pub fn count(&self, kind: EventKind, text: &str) -> usize {
        self.guard()
            .iter()
            .filter(|e| e.kind == kind && e.text == text)
            .count()
    }
}

impl EventSink for EventLog {
    fn emit(&mut self, kind: EventKind, text: &str) {
        self.guard().push(Event {
            kind,
            text: text.to_string(),
        });
    }
}
