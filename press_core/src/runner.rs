//! Cooperative control loop around a `PressController`.
//!
//! The controller itself never sleeps between cycles; the runner paces
//! `update()` at the configured period, measures each cycle against the
//! watchdog, and feeds commands in from scripts or a channel.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, TryRecvError};
use press_traits::Clock;

use crate::command::{ArgError, split_line};
use crate::config::LoopCfg;
use crate::controller::PressController;
use crate::error::PressError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub cycles: u64,
    /// Cycles whose `update()` took longer than the watchdog
    pub overruns: u64,
    pub max_update_us: u64,
}

pub struct Runner {
    controller: PressController,
    clock: Arc<dyn Clock + Send + Sync>,
    cfg: LoopCfg,
    stats: LoopStats,
}

impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("controller", &self.controller)
            .field("cfg", &self.cfg)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Runner {
    pub fn new(controller: PressController, cfg: LoopCfg) -> Self {
        let clock = Arc::clone(&controller.clock);
        Self {
            controller,
            clock,
            cfg,
            stats: LoopStats::default(),
        }
    }

    pub const fn controller(&self) -> &PressController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut PressController {
        &mut self.controller
    }

    pub fn into_inner(self) -> PressController {
        self.controller
    }

    pub const fn stats(&self) -> LoopStats {
        self.stats
    }

    fn elapsed_ms(&self, since: Instant) -> u64 {
        self.clock.ms_since(since)
    }

    /// One paced cycle: update, then sleep out the rest of the period.
    pub fn cycle(&mut self) {
        let started = self.clock.now();
        self.controller.update();
        let took = self.clock.now().saturating_duration_since(started);

        let took_us = u64::try_from(took.as_micros()).unwrap_or(u64::MAX);
        self.stats.cycles += 1;
        self.stats.max_update_us = self.stats.max_update_us.max(took_us);
        if took > Duration::from_millis(self.cfg.watchdog_ms) {
            self.stats.overruns += 1;
            tracing::warn!(
                took_us,
                watchdog_ms = self.cfg.watchdog_ms,
                "control cycle overran watchdog"
            );
        }
        self.clock
            .sleep(Duration::from_millis(self.cfg.period_ms).saturating_sub(took));
    }

    /// Cycle until the controller needs a new command.
    ///
    /// Returns the elapsed milliseconds, or `Timeout` after `step_timeout_ms`.
    pub fn run_until_settled(&mut self) -> Result<u64, PressError> {
        let start = self.clock.now();
        loop {
            self.cycle();
            let elapsed = self.elapsed_ms(start);
            if self.controller.is_settled() {
                return Ok(elapsed);
            }
            if elapsed > self.cfg.step_timeout_ms {
                tracing::warn!(elapsed_ms = elapsed, "controller did not settle");
                return Err(PressError::Timeout(self.cfg.step_timeout_ms));
            }
        }
    }

    /// Cycle for at least `ms` milliseconds regardless of state.
    pub fn run_for(&mut self, ms: u64) {
        let start = self.clock.now();
        while self.elapsed_ms(start) < ms {
            self.cycle();
        }
    }

    /// Execute one script line and wait for the controller to settle.
    ///
    /// Besides controller commands, `wait <ms>` keeps cycling for a fixed time.
    pub fn run_line(&mut self, line: &str) -> Result<(), PressError> {
        let Some((name, args)) = split_line(line) else {
            return Ok(());
        };
        if name == "wait" {
            let ms = args.parse::<u64>().map_err(|_| ArgError::Invalid {
                command: "wait",
                field: "milliseconds",
                value: args.to_string(),
            })?;
            self.run_for(ms);
            return Ok(());
        }
        tracing::debug!(command = name, args, "script command");
        self.controller.handle_command(name, args);
        self.run_until_settled().map(|_| ())
    }

    /// Run a whole script. Stops at the first line that times out.
    pub fn run_script(&mut self, script: &str) -> Result<(), PressError> {
        for (n, line) in script.lines().enumerate() {
            if let Err(e) = self.run_line(line) {
                tracing::warn!(line = n + 1, error = %e, "script aborted");
                return Err(e);
            }
        }
        Ok(())
    }

    /// Serve commands from a channel until it closes or `shutdown` is set.
    ///
    /// Commands are applied between cycles, so a `cancel` or `pause` takes
    /// effect within one period. On shutdown any operation in flight is
    /// cancelled before returning.
    pub fn serve(&mut self, commands: &Receiver<String>, shutdown: &AtomicBool) {
        let mut closed = false;
        loop {
            if shutdown.load(Ordering::Relaxed) {
                tracing::info!("shutdown requested");
                if !self.controller.is_settled() {
                    self.controller.handle_command("cancel", "");
                }
                break;
            }
            while !closed {
                match commands.try_recv() {
                    Ok(line) => {
                        if let Some((name, args)) = split_line(&line) {
                            self.controller.handle_command(name, args);
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => closed = true,
                }
            }
            self.cycle();
            if closed && self.controller.is_settled() {
                tracing::info!(cycles = self.stats.cycles, "command stream closed");
                break;
            }
        }
    }
}
