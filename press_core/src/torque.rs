//! Load feedback smoothing for the two ganged actuators.

use crate::config::TorqueCfg;

#[derive(Debug, Clone, Copy, Default)]
struct Channel {
    smoothed: f32,
    primed: bool,
}

/// Per-actuator EWMA of load feedback plus a fixed offset.
#[derive(Debug, Clone)]
pub struct TorqueMonitor {
    alpha: f32,
    offset: f32,
    sentinel: f32,
    channels: [Channel; 2],
    latest: [f32; 2],
}

impl TorqueMonitor {
    pub fn new(cfg: &TorqueCfg) -> Self {
        Self {
            alpha: cfg.ewma_alpha,
            offset: cfg.offset_pct,
            sentinel: cfg.no_reading_sentinel,
            channels: [Channel::default(); 2],
            latest: [0.0; 2],
        }
    }

    /// Forget history, e.g. before a new move.
    pub fn reset(&mut self) {
        self.channels = [Channel::default(); 2];
        self.latest = [0.0; 2];
    }

    /// Fold one raw sample per actuator into the averages.
    ///
    /// An actuator that is not moving reports zero and loses its history,
    /// unless `hold` is set. With `hold` set a missing sample repeats the
    /// last smoothed value instead of dropping to zero.
    pub fn sample(&mut self, raw: [f32; 2], moving: [bool; 2], hold: bool) -> [f32; 2] {
        for i in 0..2 {
            self.latest[i] = self.sample_channel(i, raw[i], moving[i], hold);
        }
        self.latest
    }

    fn sample_channel(&mut self, i: usize, raw: f32, moving: bool, hold: bool) -> f32 {
        let ch = &mut self.channels[i];
        if !moving && !hold {
            *ch = Channel::default();
            return 0.0;
        }
        #[allow(clippy::float_cmp)]
        let missing = raw == self.sentinel || !raw.is_finite();
        if missing {
            return if hold && ch.primed {
                ch.smoothed + self.offset
            } else {
                0.0
            };
        }
        if ch.primed {
            ch.smoothed = self.alpha.mul_add(raw, (1.0 - self.alpha) * ch.smoothed);
        } else {
            ch.smoothed = raw;
            ch.primed = true;
        }
        ch.smoothed + self.offset
    }

    /// Most recent smoothed torque per actuator (percent).
    pub const fn latest(&self) -> [f32; 2] {
        self.latest
    }

    pub fn average(&self) -> f32 {
        (self.latest[0] + self.latest[1]) * 0.5
    }

    /// True when either actuator's magnitude exceeds `limit_pct`.
    pub fn exceeds(&self, limit_pct: f32) -> bool {
        self.latest.iter().any(|t| t.abs() > limit_pct)
    }
}
