//! Line-oriented load cell reader.
//!
//! The converter board streams one raw, tared ADC value per line
//! (`"123456\r\n"`). A background thread parses the stream; readers see the
//! latest sample converted with `kg = raw * scale + offset`. The sensor
//! counts as connected while samples keep arriving.

use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use press_traits::{BoxError, Clock, LoadSensor};
use tracing::{debug, trace, warn};

use crate::error::{HwError, Result};
use crate::util::wait_until_with_timeout;

/// Longest accepted line. Longer lines are dropped whole.
const MAX_LINE: usize = 64;

/// No sample for this long means the sensor is disconnected.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_millis(1000);

/// Parse the leading integer of one line. Trailing text is ignored.
pub fn parse_line(line: &str) -> Result<i32> {
    let t = line.trim();
    let digits_from = usize::from(t.starts_with(['-', '+']));
    let end = t[digits_from..]
        .find(|c: char| !c.is_ascii_digit())
        .map_or(t.len(), |i| i + digits_from);
    if end == digits_from {
        return Err(HwError::Parse(t.to_string()));
    }
    t[..end]
        .parse::<i32>()
        .map_err(|_| HwError::Parse(t.to_string()))
}

#[derive(Debug)]
struct Shared {
    raw: i32,
    last_sample: Option<Instant>,
    scale: f32,
    offset: f32,
    samples: u64,
    rejected: u64,
}

/// Counters of the reader thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineStats {
    pub samples: u64,
    pub rejected: u64,
}

#[derive(Clone)]
pub struct LineLoadSensor {
    shared: Arc<Mutex<Shared>>,
    clock: Arc<dyn Clock + Send + Sync>,
    stale_after: Duration,
}

impl std::fmt::Debug for LineLoadSensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineLoadSensor")
            .field("shared", &self.shared)
            .field("stale_after", &self.stale_after)
            .finish_non_exhaustive()
    }
}

impl LineLoadSensor {
    /// A sensor with no input yet. Feed it with [`feed`](Self::feed) or
    /// use [`spawn`](Self::spawn).
    pub fn new(clock: Arc<dyn Clock + Send + Sync>, scale: f32, offset: f32) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                raw: 0,
                last_sample: None,
                scale,
                offset,
                samples: 0,
                rejected: 0,
            })),
            clock,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    #[must_use]
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Read `reader` on a background thread until it ends or fails.
    pub fn spawn<R: Read + Send + 'static>(
        reader: R,
        clock: Arc<dyn Clock + Send + Sync>,
        scale: f32,
        offset: f32,
    ) -> Result<Self> {
        let sensor = Self::new(clock, scale, offset);
        let worker = sensor.clone();
        std::thread::Builder::new()
            .name("load-cell".into())
            .spawn(move || worker.feed(reader))
            .map_err(HwError::from)?;
        Ok(sensor)
    }

    /// Open a serial device (or any readable file) and start reading it.
    pub fn open(
        path: &Path,
        baud: u32,
        clock: Arc<dyn Clock + Send + Sync>,
        scale: f32,
        offset: f32,
    ) -> Result<Self> {
        let file = std::fs::File::open(path)
            .map_err(|e| HwError::Serial(format!("open {}: {e}", path.display())))?;
        configure_port(&file, baud)?;
        debug!(path = %path.display(), baud, "load cell port open");
        Self::spawn(file, clock, scale, offset)
    }

    fn state(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Consume `reader` on the calling thread, line by line.
    pub fn feed(&self, reader: impl Read) {
        let mut reader = BufReader::new(reader);
        let mut line = Vec::with_capacity(MAX_LINE);
        let mut overflow = false;
        loop {
            let buf = match reader.fill_buf() {
                Ok([]) => break,
                Ok(buf) => buf,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "load cell read failed; reader stopped");
                    break;
                }
            };
            let n = buf.len();
            for &byte in buf {
                match byte {
                    b'\n' | b'\r' => {
                        if overflow {
                            self.reject("line too long");
                        } else if !line.is_empty() {
                            self.accept_line(&line);
                        }
                        line.clear();
                        overflow = false;
                    }
                    _ if line.len() < MAX_LINE => line.push(byte),
                    _ => overflow = true,
                }
            }
            reader.consume(n);
        }
        debug!("load cell stream ended");
    }

    fn accept_line(&self, line: &[u8]) {
        let text = String::from_utf8_lossy(line);
        match parse_line(&text) {
            Ok(raw) => {
                let now = self.clock.now();
                let mut s = self.state();
                s.raw = raw;
                s.last_sample = Some(now);
                s.samples += 1;
                trace!(raw, "load cell sample");
            }
            Err(e) => self.reject(&e.to_string()),
        }
    }

    fn reject(&self, why: &str) {
        let mut s = self.state();
        s.rejected += 1;
        debug!(rejected = s.rejected, why, "load cell line rejected");
    }

    pub fn stats(&self) -> LineStats {
        let s = self.state();
        LineStats {
            samples: s.samples,
            rejected: s.rejected,
        }
    }

    /// Block (in real time) until the first sample arrives.
    pub fn wait_for_sample(&self, timeout: Duration) -> Result<()> {
        wait_until_with_timeout(
            || self.state().last_sample.is_some(),
            timeout,
            Duration::from_millis(5),
        )
    }
}

impl LoadSensor for LineLoadSensor {
    fn reading(&self) -> f32 {
        let s = self.state();
        #[allow(clippy::cast_precision_loss)]
        let raw = s.raw as f32;
        raw.mul_add(s.scale, s.offset)
    }

    fn is_connected(&self) -> bool {
        let last = self.state().last_sample;
        last.is_some_and(|t| self.clock.now().saturating_duration_since(t) < self.stale_after)
    }

    fn raw_sample(&self) -> i32 {
        self.state().raw
    }

    fn calibration(&self) -> (f32, f32) {
        let s = self.state();
        (s.scale, s.offset)
    }

    fn set_offset(&mut self, offset: f32) -> std::result::Result<(), BoxError> {
        if !offset.is_finite() {
            return Err(Box::new(HwError::InvalidCalibration("load cell offset")));
        }
        self.state().offset = offset;
        Ok(())
    }

    fn set_scale(&mut self, scale: f32) -> std::result::Result<(), BoxError> {
        if !scale.is_finite() || scale == 0.0 {
            return Err(Box::new(HwError::InvalidCalibration("load cell scale")));
        }
        self.state().scale = scale;
        Ok(())
    }
}

#[cfg(all(feature = "hardware", unix))]
fn configure_port(file: &std::fs::File, baud: u32) -> Result<()> {
    use nix::sys::termios::{self, BaudRate, SetArg};

    let rate = match baud {
        9_600 => BaudRate::B9600,
        19_200 => BaudRate::B19200,
        38_400 => BaudRate::B38400,
        57_600 => BaudRate::B57600,
        115_200 => BaudRate::B115200,
        other => return Err(HwError::Serial(format!("unsupported baud rate {other}"))),
    };
    let serial = |e: nix::Error| HwError::Serial(e.to_string());
    let mut tio = termios::tcgetattr(file).map_err(serial)?;
    termios::cfmakeraw(&mut tio);
    termios::cfsetspeed(&mut tio, rate).map_err(serial)?;
    termios::tcsetattr(file, SetArg::TCSANOW, &tio).map_err(serial)?;
    Ok(())
}

#[cfg(not(all(feature = "hardware", unix)))]
fn configure_port(_file: &std::fs::File, baud: u32) -> Result<()> {
    debug!(baud, "port settings left as found (built without `hardware`)");
    Ok(())
}
