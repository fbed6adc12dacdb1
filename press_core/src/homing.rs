//! Torque-based homing against a hard stop.
//!
//! There is no limit switch at the working end of travel, so the reference
//! is found by driving into the stop with a low torque ceiling:
//! rapid search, back off, slow search, offset move, then latch.

use crate::controller::{Activity, PressController};
use crate::error::PressError;
use crate::events::EventKind;

/// Which reference a homing run establishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomingTarget {
    /// Machine zero at the retracted end of travel
    MachineHome,
    /// Retract reference at the opposite hard stop
    RetractReference,
}

impl HomingTarget {
    /// Command name, also used to tag the completion event.
    pub const fn command_name(self) -> &'static str {
        match self {
            Self::MachineHome => "home",
            Self::RetractReference => "home_retract",
        }
    }

    /// Direction of travel toward this target's hard stop.
    pub const fn toward_stop(self) -> i64 {
        match self {
            Self::MachineHome => -1,
            Self::RetractReference => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomingPhase {
    Idle,
    RapidSearchStart,
    RapidSearchWaitStart,
    RapidSearchMoving,
    BackoffStart,
    BackoffWaitStart,
    BackoffMoving,
    SlowSearchStart,
    SlowSearchWaitStart,
    SlowSearchMoving,
    SetOffsetStart,
    SetOffsetWaitStart,
    SetOffsetMoving,
    SetZero,
    Error,
}

impl HomingPhase {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::RapidSearchStart => "RAPID_SEARCH_START",
            Self::RapidSearchWaitStart => "RAPID_SEARCH_WAIT_START",
            Self::RapidSearchMoving => "RAPID_SEARCH_MOVING",
            Self::BackoffStart => "BACKOFF_START",
            Self::BackoffWaitStart => "BACKOFF_WAIT_START",
            Self::BackoffMoving => "BACKOFF_MOVING",
            Self::SlowSearchStart => "SLOW_SEARCH_START",
            Self::SlowSearchWaitStart => "SLOW_SEARCH_WAIT_START",
            Self::SlowSearchMoving => "SLOW_SEARCH_MOVING",
            Self::SetOffsetStart => "SET_OFFSET_START",
            Self::SetOffsetWaitStart => "SET_OFFSET_WAIT_START",
            Self::SetOffsetMoving => "SET_OFFSET_MOVING",
            Self::SetZero => "SET_ZERO",
            Self::Error => "ERROR",
        }
    }

    /// Phase entered once the drives confirm motion.
    const fn moving_phase(self) -> Option<Self> {
        match self {
            Self::RapidSearchWaitStart => Some(Self::RapidSearchMoving),
            Self::BackoffWaitStart => Some(Self::BackoffMoving),
            Self::SlowSearchWaitStart => Some(Self::SlowSearchMoving),
            Self::SetOffsetWaitStart => Some(Self::SetOffsetMoving),
            _ => None,
        }
    }
}

/// An in-flight homing run. The target travels with the phase so the two
/// can never disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HomingJob {
    pub target: HomingTarget,
    pub phase: HomingPhase,
    pub(crate) started_ms: u64,
    pub(crate) phase_started_ms: u64,
}

impl HomingJob {
    pub(crate) const fn new(target: HomingTarget, now_ms: u64) -> Self {
        Self {
            target,
            phase: HomingPhase::RapidSearchStart,
            started_ms: now_ms,
            phase_started_ms: now_ms,
        }
    }
}

/// Parameters of one commanded homing segment.
struct Segment {
    steps: i64,
    speed_mms: f32,
    torque_pct: f32,
    next: HomingPhase,
    note: &'static str,
}

impl PressController {
    pub(crate) fn start_homing(&mut self, target: HomingTarget) -> Result<(), PressError> {
        self.ensure_can_start()?;
        // The old reference is invalid until this run latches a new one.
        match target {
            HomingTarget::MachineHome => self.machine_home = None,
            HomingTarget::RetractReference => self.retract_ref = None,
        }
        let now = self.now_ms();
        self.activity = Activity::Homing(HomingJob::new(target, now));
        tracing::info!(target = ?target, "homing started");
        self.emit(EventKind::Start, target.command_name());
        Ok(())
    }

    pub(crate) fn step_homing(&mut self, mut job: HomingJob, now: u64) {
        let cfg = self.cfg.homing;
        if now.saturating_sub(job.started_ms) > cfg.max_duration_ms {
            self.homing_failed(job, format!("exceeded {} ms", cfg.max_duration_ms));
            return;
        }

        let toward = job.target.toward_stop();
        let stroke = self.cfg.mechanics.mm_to_steps(cfg.stroke_mm);
        let backoff = self.cfg.mechanics.mm_to_steps(cfg.backoff_mm);
        let moving = self.is_moving();
        let in_phase_ms = now.saturating_sub(job.phase_started_ms);

        let segment = match job.phase {
            HomingPhase::RapidSearchStart => Some(Segment {
                steps: toward * stroke,
                speed_mms: cfg.rapid_speed_mms,
                torque_pct: cfg.search_torque_pct,
                next: HomingPhase::RapidSearchWaitStart,
                note: "rapid search",
            }),
            HomingPhase::BackoffStart => Some(Segment {
                steps: -toward * backoff,
                speed_mms: cfg.backoff_speed_mms,
                torque_pct: cfg.backoff_torque_pct,
                next: HomingPhase::BackoffWaitStart,
                note: "backing off",
            }),
            HomingPhase::SlowSearchStart => Some(Segment {
                steps: toward * 2 * backoff,
                speed_mms: cfg.touch_speed_mms,
                torque_pct: cfg.search_torque_pct,
                next: HomingPhase::SlowSearchWaitStart,
                note: "slow search",
            }),
            HomingPhase::SetOffsetStart => Some(Segment {
                steps: -toward * backoff,
                speed_mms: cfg.backoff_speed_mms,
                torque_pct: cfg.backoff_torque_pct,
                next: HomingPhase::SetOffsetWaitStart,
                note: "moving to offset",
            }),
            _ => None,
        };

        if let Some(seg) = segment {
            self.torque_limit_pct = seg.torque_pct;
            let v = self.cfg.mechanics.rate_to_steps(seg.speed_mms);
            let a = self.cfg.mechanics.rate_to_steps(cfg.accel_mmss);
            if let Err(e) = self.start_motion(seg.steps, v, a) {
                self.homing_failed(job, format!("move command failed: {e}"));
                return;
            }
            self.emit(EventKind::Info, format!("Homing: {}.", seg.note));
            self.enter_phase(&mut job, seg.next, now);
            return;
        }

        match job.phase {
            HomingPhase::RapidSearchWaitStart
            | HomingPhase::BackoffWaitStart
            | HomingPhase::SlowSearchWaitStart
            | HomingPhase::SetOffsetWaitStart => {
                if moving {
                    if let Some(next) = job.phase.moving_phase() {
                        self.enter_phase(&mut job, next, now);
                    }
                } else if in_phase_ms > cfg.start_timeout_ms {
                    let [a, b] = self.status_words();
                    self.homing_failed(
                        job,
                        format!(
                            "motion did not start within {} ms (A status=0x{a:08X}, B status=0x{b:08X})",
                            cfg.start_timeout_ms
                        ),
                    );
                    return;
                }
            }
            HomingPhase::RapidSearchMoving | HomingPhase::SlowSearchMoving => {
                if self.torque.exceeds(self.torque_limit_pct) {
                    self.abort_motion();
                    let [a, b] = self.torque.latest();
                    tracing::debug!(
                        phase = ?job.phase,
                        torque_a = a,
                        torque_b = b,
                        "hard stop detected"
                    );
                    self.emit(
                        EventKind::Info,
                        format!("Homing: contact detected (torque A {a:.1}%, B {b:.1}%)."),
                    );
                    let next = if job.phase == HomingPhase::RapidSearchMoving {
                        HomingPhase::BackoffStart
                    } else {
                        HomingPhase::SetOffsetStart
                    };
                    self.enter_phase(&mut job, next, now);
                } else if !moving {
                    self.homing_failed(
                        job,
                        "axis stopped before the torque limit was reached".to_string(),
                    );
                    return;
                }
            }
            // Pulling away from the stall reads near stall torque, so only
            // the end of travel matters here.
            HomingPhase::BackoffMoving | HomingPhase::SetOffsetMoving => {
                if !moving {
                    let next = if job.phase == HomingPhase::BackoffMoving {
                        HomingPhase::SlowSearchStart
                    } else {
                        HomingPhase::SetZero
                    };
                    self.enter_phase(&mut job, next, now);
                }
            }
            HomingPhase::SetZero => {
                self.latch_reference(job);
                return;
            }
            HomingPhase::Idle
            | HomingPhase::Error
            | HomingPhase::RapidSearchStart
            | HomingPhase::BackoffStart
            | HomingPhase::SlowSearchStart
            | HomingPhase::SetOffsetStart => {
                self.homing_failed(job, format!("unexpected phase {}", job.phase.name()));
                return;
            }
        }
        self.activity = Activity::Homing(job);
    }

    fn enter_phase(&mut self, job: &mut HomingJob, phase: HomingPhase, now: u64) {
        tracing::debug!(target = ?job.target, from = ?job.phase, to = ?phase, "homing phase");
        job.phase = phase;
        job.phase_started_ms = now;
        self.activity = Activity::Homing(*job);
    }

    fn latch_reference(&mut self, job: HomingJob) {
        let pos = self.position_steps();
        match job.target {
            HomingTarget::MachineHome => self.machine_home = Some(pos),
            HomingTarget::RetractReference => self.retract_ref = Some(pos),
        }
        self.torque_limit_pct = self.cfg.moves.default_torque_limit_pct;
        self.activity = Activity::Idle;
        tracing::info!(target = ?job.target, reference_steps = pos, "homing complete");
        self.emit(
            EventKind::Info,
            format!("Homing complete; reference latched at {pos} steps."),
        );
        self.emit(EventKind::Done, job.target.command_name());
    }

    pub(crate) fn homing_failed(&mut self, mut job: HomingJob, reason: String) {
        self.abort_motion();
        let failed_in = job.phase;
        job.phase = HomingPhase::Error;
        self.torque_limit_pct = self.cfg.moves.default_torque_limit_pct;
        self.activity = Activity::Idle;
        tracing::warn!(target = ?job.target, phase = ?failed_in, %reason, "homing failed");
        self.emit(
            EventKind::Error,
            format!(
                "{} failed during {}: {reason}",
                job.target.command_name(),
                failed_in.name()
            ),
        );
    }
}
