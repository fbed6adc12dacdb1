//! Press assembly from config, and the console side of a session.

use std::io::BufRead;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use eyre::WrapErr;
use press_core::calibration::DEFAULT_LOAD_CELL_MAP;
use press_core::{
    CalibrationStore, EventKind, EventSink, FileCalibrationStore, LoopCfg, LoopStats,
    MechanicsCfg, MemoryCalibrationStore, PressCfg, PressController, Runner, Telemetry, Tee,
    TracingSink,
};
use press_hardware::{LineLoadSensor, SimSetup, SimWorkpiece, SimulatedPress};
use press_traits::{Clock, LoadSensor, MonotonicClock, VirtualClock};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("{count} command(s) reported errors; first: {first}")]
    CommandErrors { count: usize, first: String },
    #[error("persisting calibration needs storage.calibration_file")]
    NoCalibrationFile,
    #[error("fitted calibration rejected: {0}")]
    InvalidFit(#[from] press_core::calibration::CalibrationError),
    #[error("self-check failed: {0}")]
    SelfCheck(String),
}

/// ERROR events seen by the console, shared with the session.
#[derive(Debug, Clone, Default)]
pub struct ErrorLog(Arc<Mutex<Vec<String>>>);

impl ErrorLog {
    fn push(&self, text: &str) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(text.to_string());
    }

    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Prints every event on stdout, as `KIND: text` or one JSON object per line.
#[derive(Debug)]
pub struct ConsoleSink {
    json: bool,
    errors: ErrorLog,
}

impl EventSink for ConsoleSink {
    fn emit(&mut self, kind: EventKind, text: &str) {
        if kind == EventKind::Error {
            self.errors.push(text);
        }
        if self.json {
            println!("{}", json!({ "event": kind.as_str(), "text": text }));
        } else {
            println!("{kind}: {text}");
        }
    }
}

/// Simulator geometry in steps, from the millimetre config.
pub fn sim_setup(cfg: &press_config::Config) -> SimSetup {
    let mech = MechanicsCfg::from(&cfg.mechanics);
    let s = &cfg.simulator;
    SimSetup {
        start_steps: mech.mm_to_steps(s.start_mm),
        lower_stop_steps: 0,
        upper_stop_steps: mech.mm_to_steps(s.travel_mm),
        workpiece: s.workpiece_mm.map(|mm| SimWorkpiece {
            surface_steps: mech.mm_to_steps(mm),
            kg_per_step: s.workpiece_kg_per_mm / mech.steps_per_mm,
        }),
        running_torque_pct: s.running_torque_pct,
        stall_torque_pct: s.stall_torque_pct,
        torque_pct_per_kg: s.torque_pct_per_kg,
        load_cell_scale: DEFAULT_LOAD_CELL_MAP.scale,
        load_cell_offset: DEFAULT_LOAD_CELL_MAP.offset,
    }
}

fn open_load_cell(
    cfg: &press_config::LoadCell,
    device: &str,
    clock: Arc<dyn Clock + Send + Sync>,
) -> eyre::Result<LineLoadSensor> {
    let sensor = LineLoadSensor::open(
        Path::new(device),
        cfg.baud,
        clock,
        DEFAULT_LOAD_CELL_MAP.scale,
        DEFAULT_LOAD_CELL_MAP.offset,
    )
    .wrap_err_with(|| format!("open load cell {device}"))?
    .with_stale_after(Duration::from_millis(cfg.stale_ms));
    sensor
        .wait_for_sample(Duration::from_millis(cfg.first_sample_timeout_ms))
        .wrap_err_with(|| format!("wait for load cell {device}"))?;
    tracing::info!(device, "load cell streaming");
    Ok(sensor)
}

/// A controller on the simulated axis, with a console attached.
pub struct Session {
    pub runner: Runner,
    loop_cfg: LoopCfg,
    errors: ErrorLog,
    json: bool,
}

impl Session {
    pub fn build(cfg: &press_config::Config, json: bool, virtual_time: bool) -> eyre::Result<Self> {
        let clock: Arc<dyn Clock + Send + Sync> = if virtual_time {
            Arc::new(VirtualClock::new())
        } else {
            Arc::new(MonotonicClock::new())
        };
        let sim = SimulatedPress::new(sim_setup(cfg), Arc::clone(&clock));
        let (a, b) = sim.actuators();

        let sensor: Box<dyn LoadSensor + Send> = match &cfg.load_cell.device {
            Some(device) => Box::new(open_load_cell(&cfg.load_cell, device, Arc::clone(&clock))?),
            None => Box::new(sim.load_sensor()),
        };
        let store: Box<dyn CalibrationStore + Send> = match &cfg.storage.calibration_file {
            Some(path) => Box::new(FileCalibrationStore::open(path)?),
            None => Box::new(MemoryCalibrationStore::new()),
        };

        let errors = ErrorLog::default();
        let console = ConsoleSink {
            json,
            errors: errors.clone(),
        };
        let press = PressController::builder()
            .with_actuators(a, b)
            .with_load_sensor(sensor)
            .with_event_sink(Tee(TracingSink, console))
            .with_calibration_store(store)
            .with_clock(Box::new(clock))
            .with_config(PressCfg::from(cfg))
            .build()
            .wrap_err("assemble press controller")?;
        // Startup repairs (defaults written back to the store) are not
        // command failures.
        let startup = errors.take();
        if !startup.is_empty() {
            tracing::warn!(count = startup.len(), "errors reported during startup");
        }

        let loop_cfg = LoopCfg::from(&cfg.runner);
        Ok(Self {
            runner: Runner::new(press, loop_cfg),
            loop_cfg,
            errors,
            json,
        })
    }

    /// Fail with `CommandErrors` if any ERROR event was seen since the last check.
    pub fn check_errors(&self) -> eyre::Result<()> {
        let errors = self.errors.take();
        match errors.first() {
            None => Ok(()),
            Some(first) => Err(SessionError::CommandErrors {
                count: errors.len(),
                first: first.clone(),
            }
            .into()),
        }
    }

    pub fn run_script(&mut self, script: &str) -> eyre::Result<()> {
        self.runner.run_script(script).wrap_err("run script")?;
        self.check_errors()
    }

    pub fn exec(&mut self, line: &str) -> eyre::Result<()> {
        self.runner
            .run_line(line)
            .wrap_err_with(|| format!("execute `{line}`"))?;
        self.check_errors()
    }

    /// Feed stdin lines to the loop until EOF or `shutdown`.
    pub fn serve_stdin(&mut self, shutdown: &AtomicBool) -> eyre::Result<()> {
        let (tx, rx) = crossbeam_channel::unbounded::<String>();
        std::thread::Builder::new()
            .name("stdin".into())
            .spawn(move || {
                for line in std::io::stdin().lock().lines() {
                    let Ok(line) = line else { break };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            })
            .wrap_err("spawn stdin reader")?;
        self.runner.serve(&rx, shutdown);
        // Interactive errors were already printed as they happened.
        let seen = self.errors.take().len();
        if seen > 0 {
            tracing::info!(errors = seen, "session ended with command errors");
        }
        Ok(())
    }

    pub fn telemetry(&self) -> Telemetry {
        self.runner.controller().telemetry()
    }

    pub fn print_telemetry(&self) {
        let t = self.telemetry();
        if self.json {
            println!("{}", telemetry_json(&t));
        } else {
            println!("{}", telemetry_line(&t));
        }
    }

    /// Control loop stats on stderr, so stdout stays machine-readable.
    pub fn print_stats(&self) {
        let stats = self.runner.stats();
        if self.json {
            eprintln!("{}", stats_json(stats, self.loop_cfg));
        } else {
            eprintln!("{}", stats_text(stats, self.loop_cfg));
        }
    }
}

pub fn stats_json(stats: LoopStats, cfg: LoopCfg) -> serde_json::Value {
    json!({
        "stats": {
            "cycles": stats.cycles,
            "period_ms": cfg.period_ms,
            "max_update_us": stats.max_update_us,
            "watchdog_ms": cfg.watchdog_ms,
            "overruns": stats.overruns,
        }
    })
}

pub fn stats_text(stats: LoopStats, cfg: LoopCfg) -> String {
    format!(
        "--- Press Loop Stats ---\nCycles: {}\nPeriod (ms): {}\nMax update (us): {}\nWatchdog overruns (> {} ms): {}\n------------------------",
        stats.cycles, cfg.period_ms, stats.max_update_us, cfg.watchdog_ms, stats.overruns
    )
}

pub fn telemetry_json(t: &Telemetry) -> serde_json::Value {
    json!({
        "telemetry": {
            "motion_state": t.motion_state,
            "homing_phase": t.homing_phase,
            "move_state": t.move_state,
            "enabled": t.enabled,
            "homed": t.homed,
            "retract_homed": t.retract_homed,
            "position_mm": t.current_position_mm,
            "target_mm": t.target_position_mm,
            "retract_mm": t.retract_position_mm,
            "force_kg": t.force_kg,
            "force_source": t.force_source,
            "force_limit_kg": t.force_limit_kg,
            "force_load_cell_kg": t.force_load_cell_kg,
            "force_torque_kg": t.force_torque_kg,
            "sensor_connected": t.sensor_connected,
            "raw_sample": t.raw_sample,
            "torque_a_pct": t.torque_a_pct,
            "torque_b_pct": t.torque_b_pct,
            "torque_avg_pct": t.torque_avg_pct,
            "torque_limit_pct": t.torque_limit_pct,
            "joules": t.joules,
            "machine_joules": t.machine_joules,
            "last_distance_mm": t.last_distance_mm,
            "cumulative_distance_mm": t.cumulative_distance_mm,
        }
    })
}

pub fn telemetry_line(t: &Telemetry) -> String {
    format!(
        "TELEMETRY: state={} homed={} position={:.2}mm force={:.2}kg ({}) torque={:.1}% joules={:.3}",
        t.motion_state,
        t.homed,
        t.current_position_mm,
        t.force_kg,
        t.force_source,
        t.torque_avg_pct,
        t.joules,
    )
}
