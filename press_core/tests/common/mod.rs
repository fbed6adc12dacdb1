#![allow(dead_code)]

use std::sync::Arc;

use press_core::mocks::{EventLog, ScriptedActuator, ScriptedLoadSensor, Workpiece};
use press_core::{
    EventKind, LoopCfg, MemoryCalibrationStore, PressCfg, PressController, Runner, Telemetry,
};
use press_traits::Clock;
use press_traits::clock::test_clock::TestClock;

/// Machine zero sits this far above the lower stop after homing.
pub const BACKOFF_STEPS: i64 = 160;
pub const LOWER_STOP: i64 = 4000;
pub const START: i64 = 8000;

pub struct Rig {
    pub runner: Runner,
    pub a: ScriptedActuator,
    pub b: ScriptedActuator,
    pub sensor: ScriptedLoadSensor,
    pub log: EventLog,
    pub clock: TestClock,
    pub store: MemoryCalibrationStore,
}

pub struct RigOptions {
    pub start: i64,
    pub lower_stop: Option<i64>,
    pub workpiece: Option<Workpiece>,
    pub cfg: PressCfg,
    pub store: MemoryCalibrationStore,
}

impl Default for RigOptions {
    fn default() -> Self {
        Self {
            start: START,
            lower_stop: Some(LOWER_STOP),
            workpiece: None,
            cfg: PressCfg::default(),
            store: MemoryCalibrationStore::new(),
        }
    }
}

impl Rig {
    pub fn new() -> Self {
        Self::with(RigOptions::default())
    }

    pub fn with(opts: RigOptions) -> Self {
        let clock = TestClock::new();
        let shared: Arc<dyn Clock + Send + Sync> = Arc::new(clock.clone());
        let make = || {
            let mut act = ScriptedActuator::new(Arc::clone(&shared)).with_position(opts.start);
            if let Some(stop) = opts.lower_stop {
                act = act.with_lower_stop(stop);
            }
            if let Some(w) = opts.workpiece {
                act = act.with_workpiece(w);
            }
            act
        };
        let a = make();
        let b = make();
        let sensor = ScriptedLoadSensor::new().linked_to(&a);
        let log = EventLog::new();
        let press = PressController::builder()
            .with_actuators(a.clone(), b.clone())
            .with_load_sensor(sensor.clone())
            .with_event_sink(log.clone())
            .with_calibration_store(opts.store.clone())
            .with_clock(Box::new(clock.clone()))
            .with_config(opts.cfg)
            .build()
            .unwrap();
        Self {
            runner: Runner::new(press, LoopCfg::default()),
            a,
            b,
            sensor,
            log,
            clock,
            store: opts.store,
        }
    }

    pub fn press(&self) -> &PressController {
        self.runner.controller()
    }

    pub fn press_mut(&mut self) -> &mut PressController {
        self.runner.controller_mut()
    }

    /// Run a command and let the controller settle.
    pub fn run(&mut self, line: &str) {
        self.runner.run_line(line).unwrap();
    }

    /// Issue a command without cycling.
    pub fn send(&mut self, name: &str, args: &str) {
        self.press_mut().handle_command(name, args);
    }

    pub fn cycle(&mut self) {
        self.runner.cycle();
    }

    /// Cycle until `pred` holds, failing after `max_cycles`.
    pub fn cycle_until(&mut self, max_cycles: usize, pred: impl Fn(&Self) -> bool) {
        for _ in 0..max_cycles {
            if pred(self) {
                return;
            }
            self.cycle();
        }
        assert!(pred(self), "condition not reached in {max_cycles} cycles");
    }

    pub fn home(&mut self) {
        self.run("home");
        assert!(
            self.log.contains(EventKind::Done, "home"),
            "homing did not finish: {:?}",
            self.log.events()
        );
        self.log.clear();
    }

    pub fn telemetry(&self) -> Telemetry {
        self.press().telemetry()
    }

    pub fn errors(&self) -> Vec<String> {
        self.log.texts(EventKind::Error)
    }
}
