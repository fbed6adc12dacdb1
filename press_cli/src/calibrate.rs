//! `fit-torque` / `fit-load-cell`: least-squares maps from sample CSVs.

use std::path::Path;

use eyre::WrapErr;
use press_config::fit::{LinearFit, load_load_cell_csv, load_torque_csv};
use press_core::calibration::{
    validate_load_cell_offset, validate_load_cell_scale, validate_torque_offset,
    validate_torque_scale,
};
use press_core::{CalibrationStore, FileCalibrationStore, LinearMap};
use serde_json::json;

use crate::session::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitKind {
    /// kg -> torque percent
    Torque,
    /// raw counts -> kg
    LoadCell,
}

impl FitKind {
    const fn name(self) -> &'static str {
        match self {
            Self::Torque => "torque",
            Self::LoadCell => "load_cell",
        }
    }

    const fn formula(self) -> &'static str {
        match self {
            Self::Torque => "torque_pct = scale * kg + offset",
            Self::LoadCell => "kg = scale * raw + offset",
        }
    }

    fn fit(self, csv: &Path) -> eyre::Result<LinearFit> {
        match self {
            Self::Torque => load_torque_csv(csv),
            Self::LoadCell => load_load_cell_csv(csv),
        }
    }

    fn check(self, fit: &LinearFit) -> Result<(), SessionError> {
        match self {
            Self::Torque => {
                validate_torque_scale(fit.scale)?;
                validate_torque_offset(fit.offset)?;
            }
            Self::LoadCell => {
                validate_load_cell_scale(fit.scale)?;
                validate_load_cell_offset(fit.offset)?;
            }
        }
        Ok(())
    }
}

/// Fit, range-check, print, and optionally persist.
pub fn run_fit(
    kind: FitKind,
    csv: &Path,
    persist: bool,
    cfg: &press_config::Config,
    json: bool,
) -> eyre::Result<()> {
    let fit = kind
        .fit(csv)
        .wrap_err_with(|| format!("fit {} map from {}", kind.name(), csv.display()))?;
    kind.check(&fit)?;
    tracing::info!(
        kind = kind.name(),
        scale = fit.scale,
        offset = fit.offset,
        inliers = fit.inliers,
        "calibration fitted"
    );

    if persist {
        let path = cfg
            .storage
            .calibration_file
            .as_deref()
            .ok_or(SessionError::NoCalibrationFile)?;
        let mut store = FileCalibrationStore::open(path)?;
        let map = LinearMap::new(fit.scale, fit.offset);
        let written = match kind {
            FitKind::Torque => store.set_torque_map(map),
            FitKind::LoadCell => store.set_load_cell_map(map),
        };
        written.map_err(|e| eyre::eyre!("write calibration file {path}: {e}"))?;
    }

    if json {
        println!(
            "{}",
            json!({
                "fit": kind.name(),
                "scale": fit.scale,
                "offset": fit.offset,
                "inliers": fit.inliers,
                "persisted": persist,
            })
        );
    } else {
        println!(
            "{} ({}): scale={} offset={} from {} samples{}",
            kind.formula(),
            kind.name(),
            fit.scale,
            fit.offset,
            fit.inliers,
            if persist { ", persisted" } else { "" }
        );
    }
    Ok(())
}
