//! Calibration persisted to a TOML file.
//!
//! Every write rewrites the whole record atomically, so a power loss leaves
//! either the previous or the new calibration on disk, never a mix.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use press_config::PersistedCalibration;
use press_traits::BoxError;

use crate::atomic::write_atomic;
use crate::calibration::{CalibrationStore, ForceMode, LinearMap};

/// File-backed store. Clones share the cached record.
#[derive(Debug, Clone)]
pub struct FileCalibrationStore {
    path: PathBuf,
    record: Arc<Mutex<PersistedCalibration>>,
}

impl FileCalibrationStore {
    /// Open `path`, treating a missing file as an empty record.
    ///
    /// A file that exists but cannot be parsed is also treated as empty so
    /// the controller can repair it with defaults; the problem is logged.
    pub fn open(path: impl AsRef<Path>) -> crate::error::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let record = match fs::read_to_string(&path) {
            Ok(s) => PersistedCalibration::from_toml(&s).unwrap_or_else(|e| {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "calibration file unreadable; starting empty"
                );
                PersistedCalibration::default()
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no calibration file yet");
                PersistedCalibration::default()
            }
            Err(e) => {
                return Err(eyre::Report::new(e)
                    .wrap_err(format!("read calibration file {}", path.display())));
            }
        };
        Ok(Self {
            path,
            record: Arc::new(Mutex::new(record)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the cached record.
    pub fn record(&self) -> PersistedCalibration {
        self.record
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    fn read<T>(&self, f: impl FnOnce(&PersistedCalibration) -> Option<T>) -> Option<T> {
        self.record.lock().ok().and_then(|r| f(&r))
    }

    fn write(&self, f: impl FnOnce(&mut PersistedCalibration)) -> Result<(), BoxError> {
        let mut guard = self
            .record
            .lock()
            .map_err(|_| BoxError::from("calibration record lock poisoned"))?;
        let mut next = guard.clone();
        f(&mut next);
        let text = next.to_toml().map_err(|e| BoxError::from(e.to_string()))?;
        write_atomic(&self.path, text.as_bytes())?;
        *guard = next;
        tracing::debug!(path = %self.path.display(), "calibration persisted");
        Ok(())
    }
}

impl CalibrationStore for FileCalibrationStore {
    fn force_mode(&self) -> Option<ForceMode> {
        self.read(|r| r.force_mode.as_deref().and_then(|s| s.parse().ok()))
    }

    fn set_force_mode(&mut self, mode: ForceMode) -> Result<(), BoxError> {
        self.write(|r| r.force_mode = Some(mode.as_str().to_string()))
    }

    fn torque_map(&self) -> Option<LinearMap> {
        self.read(|r| Some(LinearMap::new(r.torque_scale?, r.torque_offset?)))
    }

    fn set_torque_map(&mut self, map: LinearMap) -> Result<(), BoxError> {
        self.write(|r| {
            r.torque_scale = Some(map.scale);
            r.torque_offset = Some(map.offset);
        })
    }

    fn load_cell_map(&self) -> Option<LinearMap> {
        self.read(|r| Some(LinearMap::new(r.load_cell_scale?, r.load_cell_offset?)))
    }

    fn set_load_cell_map(&mut self, map: LinearMap) -> Result<(), BoxError> {
        self.write(|r| {
            r.load_cell_scale = Some(map.scale);
            r.load_cell_offset = Some(map.offset);
        })
    }

    fn strain_coeffs(&self) -> Option<[f32; 5]> {
        self.read(|r| r.strain_coeffs)
    }

    fn set_strain_coeffs(&mut self, coeffs: [f32; 5]) -> Result<(), BoxError> {
        self.write(|r| r.strain_coeffs = Some(coeffs))
    }
}
