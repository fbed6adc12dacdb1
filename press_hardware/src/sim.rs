//! Simulated press axis.
//!
//! Two drives push one carriage between a lower and an upper hard stop. Each
//! drive runs its own trapezoidal profile, so commanding only one of them
//! shows up as skew. A compliant workpiece sits in the +direction and the
//! simulated load cell reports its reaction force in raw converter counts.
//!
//! Motion is integrated from the injected clock: with a manually advanced
//! clock every position is exact and repeatable.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use press_traits::{Actuator, BoxError, Clock, LoadSensor};
use tracing::{debug, warn};

use crate::error::HwError;

/// A workpiece that pushes back linearly once the carriage passes its surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimWorkpiece {
    pub surface_steps: i64,
    pub kg_per_step: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimSetup {
    pub start_steps: i64,
    pub lower_stop_steps: i64,
    pub upper_stop_steps: i64,
    pub workpiece: Option<SimWorkpiece>,
    /// Drive load while moving freely, percent
    pub running_torque_pct: f32,
    /// Drive load while pushing against a hard stop, percent
    pub stall_torque_pct: f32,
    /// Drive load added per kilogram of contact force
    pub torque_pct_per_kg: f32,
    /// Factory map of the converter: kg = raw * scale + offset
    pub load_cell_scale: f32,
    pub load_cell_offset: f32,
}

impl Default for SimSetup {
    fn default() -> Self {
        Self {
            start_steps: 8_000,
            lower_stop_steps: 0,
            upper_stop_steps: 64_000,
            workpiece: Some(SimWorkpiece {
                surface_steps: 19_200,
                kg_per_step: 0.25,
            }),
            running_torque_pct: 5.0,
            stall_torque_pct: 35.0,
            torque_pct_per_kg: 0.0335,
            load_cell_scale: -0.000_230_76,
            load_cell_offset: 6.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveId {
    A,
    B,
}

impl DriveId {
    const fn index(self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
        }
    }
}

/// Trapezoidal velocity profile of one relative move.
#[derive(Debug, Clone, Copy)]
struct Profile {
    origin: i64,
    steps: i64,
    velocity: f64,
    accel: f64,
    started: Instant,
}

impl Profile {
    /// Distance covered `t` seconds after the start, and whether the
    /// profile has run to completion.
    #[allow(clippy::cast_precision_loss)]
    fn travel(&self, t: f64) -> (f64, bool) {
        let total = self.steps.unsigned_abs() as f64;
        let v = self.velocity.max(1.0);
        if self.accel <= 0.0 {
            let d = v * t;
            return if d >= total { (total, true) } else { (d, false) };
        }
        let a = self.accel;
        // Short moves never reach cruise speed.
        let peak = v.min((total * a).sqrt());
        let t_ramp = peak / a;
        let d_ramp = 0.5 * a * t_ramp * t_ramp;
        let t_cruise = ((total - 2.0 * d_ramp) / peak).max(0.0);
        let t_total = 2.0f64.mul_add(t_ramp, t_cruise);
        if t >= t_total {
            return (total, true);
        }
        let d = if t < t_ramp {
            0.5 * a * t * t
        } else if t < t_ramp + t_cruise {
            peak.mul_add(t - t_ramp, d_ramp)
        } else {
            let left = t_total - t;
            (0.5 * a * left).mul_add(-left, total)
        };
        (d.min(total), false)
    }
}

#[derive(Debug, Clone, Copy)]
struct Drive {
    position: i64,
    profile: Option<Profile>,
    enabled: bool,
    faulted: bool,
    status_word: u32,
}

#[derive(Debug, Clone, Copy)]
struct Kinematics {
    position: i64,
    moving: bool,
    stalled: bool,
}

#[derive(Debug)]
struct AxisState {
    setup: SimSetup,
    drives: [Drive; 2],
    sensor_connected: bool,
    sensor_scale: f32,
    sensor_offset: f32,
}

impl AxisState {
    fn kinematics(&self, idx: usize, now: Instant) -> Kinematics {
        let drive = &self.drives[idx];
        let Some(p) = drive.profile else {
            return Kinematics {
                position: drive.position,
                moving: false,
                stalled: false,
            };
        };
        let elapsed = now.saturating_duration_since(p.started).as_secs_f64();
        let (travel, done) = p.travel(elapsed);
        #[allow(clippy::cast_possible_truncation)]
        let ideal = p.origin + p.steps.signum() * (travel.floor() as i64);
        let target = p.origin + p.steps;

        let (lower, upper) = (self.setup.lower_stop_steps, self.setup.upper_stop_steps);
        if p.steps < 0 && target < lower && ideal <= lower {
            return Kinematics {
                position: lower,
                moving: true,
                stalled: true,
            };
        }
        if p.steps > 0 && target > upper && ideal >= upper {
            return Kinematics {
                position: upper,
                moving: true,
                stalled: true,
            };
        }
        Kinematics {
            position: ideal,
            moving: !done,
            stalled: false,
        }
    }

    fn settle(&mut self, idx: usize, now: Instant) {
        self.drives[idx].position = self.kinematics(idx, now).position;
        self.drives[idx].profile = None;
    }

    fn carriage(&self, now: Instant) -> i64 {
        let a = self.kinematics(0, now).position;
        let b = self.kinematics(1, now).position;
        (a + b) / 2
    }

    fn contact_force_kg(&self, now: Instant) -> f32 {
        let position = self.carriage(now);
        self.setup.workpiece.map_or(0.0, |w| {
            #[allow(clippy::cast_precision_loss)]
            let depth = (position - w.surface_steps).max(0) as f32;
            depth * w.kg_per_step
        })
    }

    /// Converter counts the true force produces under the factory map.
    fn raw_counts(&self, now: Instant) -> i32 {
        let kg = f64::from(self.contact_force_kg(now));
        let raw = (kg - f64::from(self.setup.load_cell_offset))
            / f64::from(self.setup.load_cell_scale);
        #[allow(clippy::cast_possible_truncation)]
        let raw = raw.round().clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32;
        raw
    }
}

/// Shared model of the whole axis. Clones observe the same carriage.
#[derive(Clone)]
pub struct SimulatedPress {
    inner: Arc<Mutex<AxisState>>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl std::fmt::Debug for SimulatedPress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedPress")
            .field("state", &self.inner)
            .finish_non_exhaustive()
    }
}

impl SimulatedPress {
    pub fn new(setup: SimSetup, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        let drive = Drive {
            position: setup.start_steps,
            profile: None,
            enabled: false,
            faulted: false,
            status_word: 0,
        };
        let (scale, offset) = (setup.load_cell_scale, setup.load_cell_offset);
        Self {
            inner: Arc::new(Mutex::new(AxisState {
                setup,
                drives: [drive; 2],
                sensor_connected: true,
                sensor_scale: scale,
                sensor_offset: offset,
            })),
            clock,
        }
    }

    fn state(&self) -> MutexGuard<'_, AxisState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn actuators(&self) -> (SimActuator, SimActuator) {
        (self.actuator(DriveId::A), self.actuator(DriveId::B))
    }

    pub fn actuator(&self, id: DriveId) -> SimActuator {
        SimActuator {
            press: self.clone(),
            id,
        }
    }

    pub fn load_sensor(&self) -> SimLoadSensor {
        SimLoadSensor {
            press: self.clone(),
        }
    }

    /// Mean position of the two drives, steps.
    pub fn carriage_position(&self) -> i64 {
        self.state().carriage(self.clock.now())
    }

    /// Position of A minus position of B.
    pub fn skew_steps(&self) -> i64 {
        let now = self.clock.now();
        let s = self.state();
        s.kinematics(0, now).position - s.kinematics(1, now).position
    }

    pub fn contact_force_kg(&self) -> f32 {
        self.state().contact_force_kg(self.clock.now())
    }

    pub fn set_workpiece(&self, workpiece: Option<SimWorkpiece>) {
        self.state().setup.workpiece = workpiece;
    }

    /// Latch a drive fault. Motion on that drive stops where it is.
    pub fn inject_fault(&self, id: DriveId, status_word: u32) {
        let now = self.clock.now();
        let mut s = self.state();
        s.settle(id.index(), now);
        let d = &mut s.drives[id.index()];
        d.faulted = true;
        d.status_word = status_word;
        warn!(drive = ?id, status_word, "sim: drive fault injected");
    }

    pub fn set_sensor_connected(&self, connected: bool) {
        self.state().sensor_connected = connected;
    }
}

/// One drive of the simulated axis.
#[derive(Debug, Clone)]
pub struct SimActuator {
    press: SimulatedPress,
    id: DriveId,
}

impl SimActuator {
    pub const fn id(&self) -> DriveId {
        self.id
    }

    pub fn is_enabled(&self) -> bool {
        self.press.state().drives[self.id.index()].enabled
    }
}

impl Actuator for SimActuator {
    fn command_relative_move(
        &mut self,
        steps: i64,
        velocity_sps: u32,
        accel_sps2: u32,
    ) -> Result<(), BoxError> {
        let now = self.press.clock.now();
        let idx = self.id.index();
        let mut s = self.press.state();
        let drive = s.drives[idx];
        if drive.faulted {
            return Err(Box::new(HwError::DriveFaulted(drive.status_word)));
        }
        if !drive.enabled {
            return Err(Box::new(HwError::DriveDisabled));
        }
        s.settle(idx, now);
        let origin = s.drives[idx].position;
        s.drives[idx].profile = (steps != 0).then_some(Profile {
            origin,
            steps,
            velocity: f64::from(velocity_sps),
            accel: f64::from(accel_sps2),
            started: now,
        });
        debug!(drive = ?self.id, origin, steps, velocity_sps, accel_sps2, "sim: move");
        Ok(())
    }

    fn commanded_position(&self) -> i64 {
        let now = self.press.clock.now();
        self.press.state().kinematics(self.id.index(), now).position
    }

    fn is_moving(&self) -> bool {
        let now = self.press.clock.now();
        self.press.state().kinematics(self.id.index(), now).moving
    }

    fn is_faulted(&self) -> bool {
        self.press.state().drives[self.id.index()].faulted
    }

    fn status_word(&self) -> u32 {
        self.press.state().drives[self.id.index()].status_word
    }

    fn load_feedback_percent(&mut self) -> f32 {
        let now = self.press.clock.now();
        let s = self.press.state();
        let k = s.kinematics(self.id.index(), now);
        if !k.moving {
            return 0.0;
        }
        if k.stalled {
            return s.setup.stall_torque_pct;
        }
        s.contact_force_kg(now)
            .mul_add(s.setup.torque_pct_per_kg, s.setup.running_torque_pct)
    }

    fn decelerate_stop(&mut self) -> Result<(), BoxError> {
        let now = self.press.clock.now();
        self.press.state().settle(self.id.index(), now);
        Ok(())
    }

    fn set_enabled(&mut self, enabled: bool) -> Result<(), BoxError> {
        let now = self.press.clock.now();
        let idx = self.id.index();
        let mut s = self.press.state();
        if !enabled {
            s.settle(idx, now);
        }
        s.drives[idx].enabled = enabled;
        Ok(())
    }

    fn clear_faults(&mut self) -> Result<(), BoxError> {
        let d = &mut self.press.state().drives[self.id.index()];
        d.faulted = false;
        d.status_word = 0;
        Ok(())
    }
}

/// Load cell mounted under the simulated workpiece.
#[derive(Debug, Clone)]
pub struct SimLoadSensor {
    press: SimulatedPress,
}

impl LoadSensor for SimLoadSensor {
    fn reading(&self) -> f32 {
        let now = self.press.clock.now();
        let s = self.press.state();
        let raw = f64::from(s.raw_counts(now));
        #[allow(clippy::cast_possible_truncation)]
        let kg = raw.mul_add(f64::from(s.sensor_scale), f64::from(s.sensor_offset)) as f32;
        kg
    }

    fn is_connected(&self) -> bool {
        self.press.state().sensor_connected
    }

    fn raw_sample(&self) -> i32 {
        self.press.state().raw_counts(self.press.clock.now())
    }

    fn calibration(&self) -> (f32, f32) {
        let s = self.press.state();
        (s.sensor_scale, s.sensor_offset)
    }

    fn set_offset(&mut self, offset: f32) -> Result<(), BoxError> {
        let mut s = self.press.state();
        if !s.sensor_connected {
            return Err(Box::new(HwError::Disconnected));
        }
        if !offset.is_finite() {
            return Err(Box::new(HwError::InvalidCalibration("load cell offset")));
        }
        s.sensor_offset = offset;
        Ok(())
    }

    fn set_scale(&mut self, scale: f32) -> Result<(), BoxError> {
        let mut s = self.press.state();
        if !s.sensor_connected {
            return Err(Box::new(HwError::Disconnected));
        }
        if !scale.is_finite() || scale == 0.0 {
            return Err(Box::new(HwError::InvalidCalibration("load cell scale")));
        }
        s.sensor_scale = scale;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use press_traits::clock::test_clock::TestClock;
    use rstest::rstest;

    fn rig(setup: SimSetup) -> (SimulatedPress, TestClock) {
        let clock = TestClock::new();
        let press = SimulatedPress::new(setup, Arc::new(clock.clone()));
        (press, clock)
    }

    fn enabled_pair(press: &SimulatedPress) -> (SimActuator, SimActuator) {
        let (mut a, mut b) = press.actuators();
        a.set_enabled(true).unwrap();
        b.set_enabled(true).unwrap();
        (a, b)
    }

    #[rstest]
    #[case::cruise(1_500, 500, 250, 2_000 + 1_000 + 2_000)]
    #[case::triangle(100, 1_000, 100, 2_000)]
    #[case::no_ramp(800, 400, 0, 2_000)]
    fn profile_completes_on_time(
        #[case] steps: i64,
        #[case] velocity: u32,
        #[case] accel: u32,
        #[case] total_ms: u64,
    ) {
        let (press, clock) = rig(SimSetup::default());
        let (mut a, _b) = enabled_pair(&press);
        let start = a.commanded_position();
        a.command_relative_move(steps, velocity, accel).unwrap();

        clock.advance_ms(total_ms - 20);
        assert!(a.is_moving());
        assert!(a.commanded_position() - start < steps);
        clock.advance_ms(20);
        assert!(!a.is_moving());
        assert_eq!(a.commanded_position() - start, steps);
    }

    #[test]
    fn ramp_covers_half_the_distance_at_the_midpoint() {
        let (press, clock) = rig(SimSetup::default());
        let (mut a, _b) = enabled_pair(&press);
        // 100 steps at 100 sps^2: peak 100 sps after 1 s, done after 2 s.
        a.command_relative_move(100, 1_000, 100).unwrap();
        clock.advance_ms(1_000);
        assert_eq!(a.commanded_position(), 8_050);
    }

    #[test]
    fn hard_stop_stalls_the_drive() {
        let (press, clock) = rig(SimSetup::default());
        let (mut a, _b) = enabled_pair(&press);
        a.command_relative_move(-20_000, 4_000, 0).unwrap();
        clock.advance_ms(1_000);
        assert!(a.is_moving());
        assert!(a.load_feedback_percent() < 10.0);
        clock.advance_ms(1_500);
        assert_eq!(a.commanded_position(), 0);
        assert!(a.is_moving());
        assert!((a.load_feedback_percent() - 35.0).abs() < f32::EPSILON);

        a.decelerate_stop().unwrap();
        assert!(!a.is_moving());
        assert_eq!(a.commanded_position(), 0);
        assert!(a.load_feedback_percent().abs() < f32::EPSILON);
    }

    #[test]
    fn ganged_moves_keep_the_carriage_square() {
        let (press, clock) = rig(SimSetup::default());
        let (mut a, mut b) = enabled_pair(&press);
        a.command_relative_move(1_600, 800, 0).unwrap();
        b.command_relative_move(1_600, 800, 0).unwrap();
        clock.advance_ms(2_000);
        assert_eq!(press.skew_steps(), 0);
        assert_eq!(press.carriage_position(), 9_600);

        a.command_relative_move(400, 800, 0).unwrap();
        clock.advance_ms(1_000);
        assert_eq!(press.skew_steps(), 400);
    }

    #[test]
    fn workpiece_force_reaches_the_load_cell() {
        let (press, clock) = rig(SimSetup {
            start_steps: 19_000,
            ..SimSetup::default()
        });
        let (mut a, mut b) = enabled_pair(&press);
        let sensor = press.load_sensor();
        assert!(sensor.reading().abs() < 0.01);

        a.command_relative_move(600, 600, 0).unwrap();
        b.command_relative_move(600, 600, 0).unwrap();
        clock.advance_ms(1_000);
        // 400 steps past the surface at 0.25 kg/step
        assert!((press.contact_force_kg() - 100.0).abs() < 1e-3);
        assert!((sensor.reading() - 100.0).abs() < 0.01);
        assert!(sensor.raw_sample() < 0);
    }

    #[test]
    fn pressing_raises_drive_load() {
        let (press, clock) = rig(SimSetup {
            start_steps: 19_200,
            ..SimSetup::default()
        });
        let (mut a, mut b) = enabled_pair(&press);
        a.command_relative_move(2_000, 200, 0).unwrap();
        b.command_relative_move(2_000, 200, 0).unwrap();
        clock.advance_ms(5_000);
        // 1000 steps deep: 250 kg, 5 % + 250 * 0.0335 %
        assert!((a.load_feedback_percent() - 13.375).abs() < 1e-3);
    }

    #[test]
    fn disabled_or_faulted_drives_refuse_moves() {
        let (press, _clock) = rig(SimSetup::default());
        let (mut a, mut b) = press.actuators();
        let err = a.command_relative_move(10, 100, 0).unwrap_err();
        assert!(matches!(err.downcast_ref::<HwError>(), Some(HwError::DriveDisabled)));

        b.set_enabled(true).unwrap();
        press.inject_fault(DriveId::B, 0x44);
        assert!(b.is_faulted());
        assert_eq!(b.status_word(), 0x44);
        let err = b.command_relative_move(10, 100, 0).unwrap_err();
        assert_eq!(err.to_string(), "drive faulted (status=0x00000044)");

        b.clear_faults().unwrap();
        assert!(!b.is_faulted());
        b.command_relative_move(10, 100, 0).unwrap();
    }

    #[test]
    fn fault_freezes_motion() {
        let (press, clock) = rig(SimSetup::default());
        let (mut a, _b) = enabled_pair(&press);
        a.command_relative_move(1_000, 100, 0).unwrap();
        clock.advance_ms(1_000);
        press.inject_fault(DriveId::A, 1);
        clock.advance_ms(1_000);
        assert!(!a.is_moving());
        assert_eq!(a.commanded_position(), 8_100);
    }

    #[test]
    fn sensor_writes_need_a_connected_sensor() {
        let (press, _clock) = rig(SimSetup::default());
        let mut sensor = press.load_sensor();
        sensor.set_offset(1.0).unwrap();
        sensor.set_scale(-0.0002).unwrap();
        assert_eq!(sensor.calibration(), (-0.0002, 1.0));

        let err = sensor.set_scale(0.0).unwrap_err();
        assert_eq!(err.to_string(), "invalid calibration: load cell scale");

        press.set_sensor_connected(false);
        assert!(!sensor.is_connected());
        let err = sensor.set_offset(2.0).unwrap_err();
        assert!(matches!(err.downcast_ref::<HwError>(), Some(HwError::Disconnected)));
        assert_eq!(sensor.calibration(), (-0.0002, 1.0));
    }
}
