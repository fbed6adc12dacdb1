//! Linear calibration fitting from CSV samples.
//!
//! Two CSV layouts are supported:
//!
//! ```text
//! kg,torque_pct      raw,kg
//! 50,2.7             -20000,11.1
//! 200,7.7            -80000,24.9
//! ```
//!
//! The first maps force to drive torque (used when limiting by torque),
//! the second maps raw load cell counts to force.
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct TorqueRow {
    pub kg: f32,
    pub torque_pct: f32,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct LoadCellRow {
    pub raw: i64,
    pub kg: f32,
}

/// Result of a fit: `y = scale * x + offset`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub scale: f32,
    pub offset: f32,
    /// Number of samples that survived outlier rejection
    pub inliers: usize,
}

fn check_monotonic(xs: &[f64]) -> eyre::Result<()> {
    let mut dir = 0i8;
    for i in 1..xs.len() {
        let d = xs[i] - xs[i - 1];
        if d == 0.0 {
            eyre::bail!(
                "calibration rows have duplicate x values at index {} and {}",
                i - 1,
                i
            );
        }
        let step_dir = if d > 0.0 { 1 } else { -1 };
        if dir == 0 {
            dir = step_dir;
        } else if dir != step_dir {
            eyre::bail!(
                "calibration x values must be monotonic (strictly increasing or strictly decreasing)"
            );
        }
    }
    Ok(())
}

/// Ordinary least squares in f64.
fn ols(pts: &[(f64, f64)]) -> eyre::Result<(f64, f64)> {
    let n = pts.len() as f64;
    let mean_x = pts.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pts.iter().map(|p| p.1).sum::<f64>() / n;
    let mut sxx = 0.0f64;
    let mut sxy = 0.0f64;
    for (x, y) in pts {
        let dx = x - mean_x;
        sxx += dx * dx;
        sxy += dx * (y - mean_y);
    }
    if !sxx.is_finite() || sxx == 0.0 {
        eyre::bail!("calibration cannot determine slope (degenerate X variance)");
    }
    let a = sxy / sxx;
    if !a.is_finite() {
        eyre::bail!("calibration produced non-finite slope");
    }
    if a == 0.0 {
        eyre::bail!("calibration produced zero slope (invalid scale factor)");
    }
    Ok((a, mean_y - a * mean_x))
}

/// Refit once over the points whose residual is within `k` RMS of the
/// initial line. Returns `None` when nothing was rejected or too few remain.
fn robust_refit(pts: &[(f64, f64)], a0: f64, b0: f64, k: f64) -> Option<((f64, f64), usize)> {
    let sumsq: f64 = pts
        .iter()
        .map(|(x, y)| {
            let r = y - (a0 * x + b0);
            r * r
        })
        .sum();
    let rms = (sumsq / pts.len() as f64).sqrt();
    if !(rms.is_finite() && rms > 0.0) {
        return None;
    }
    let thr = k * rms;
    let inliers: Vec<(f64, f64)> = pts
        .iter()
        .copied()
        .filter(|(x, y)| (y - (a0 * x + b0)).abs() <= thr)
        .collect();
    if inliers.len() < 2 || inliers.len() == pts.len() {
        return None;
    }
    ols(&inliers).ok().map(|fit| (fit, inliers.len()))
}

fn fit_points(pts: &[(f64, f64)]) -> eyre::Result<LinearFit> {
    if pts.len() < 2 {
        eyre::bail!("calibration requires at least two rows, got {}", pts.len());
    }
    let xs: Vec<f64> = pts.iter().map(|p| p.0).collect();
    check_monotonic(&xs)?;
    let (a0, b0) = ols(pts)?;
    let ((a, b), inliers) = robust_refit(pts, a0, b0, 2.0).unwrap_or(((a0, b0), pts.len()));
    #[allow(clippy::cast_possible_truncation)]
    let fit = LinearFit {
        scale: a as f32,
        offset: b as f32,
        inliers,
    };
    if !(fit.scale.is_finite() && fit.offset.is_finite()) {
        eyre::bail!("calibration fit does not fit in f32");
    }
    Ok(fit)
}

/// Fit `torque_pct = scale * kg + offset`.
pub fn fit_torque_rows(rows: &[TorqueRow]) -> eyre::Result<LinearFit> {
    let pts: Vec<(f64, f64)> = rows
        .iter()
        .map(|r| (f64::from(r.kg), f64::from(r.torque_pct)))
        .collect();
    fit_points(&pts)
}

/// Fit `kg = scale * raw + offset`.
pub fn fit_load_cell_rows(rows: &[LoadCellRow]) -> eyre::Result<LinearFit> {
    #[allow(clippy::cast_precision_loss)]
    let pts: Vec<(f64, f64)> = rows
        .iter()
        .map(|r| (r.raw as f64, f64::from(r.kg)))
        .collect();
    fit_points(&pts)
}

fn read_rows<T: for<'de> Deserialize<'de>>(
    path: &Path,
    expected: [&str; 2],
) -> eyre::Result<Vec<T>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open calibration CSV {:?}: {}", path, e))?;

    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let actual: Vec<&str> = headers.iter().collect();
    if actual != expected {
        eyre::bail!(
            "calibration CSV must have headers '{}', got: {}",
            expected.join(","),
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<T>().enumerate() {
        match rec {
            Ok(row) => rows.push(row),
            Err(e) => eyre::bail!("invalid CSV row {}: {}", idx + 2, e),
        }
    }
    Ok(rows)
}

pub fn load_torque_csv(path: &Path) -> eyre::Result<LinearFit> {
    let rows: Vec<TorqueRow> = read_rows(path, ["kg", "torque_pct"])?;
    fit_torque_rows(&rows)
}

pub fn load_load_cell_csv(path: &Path) -> eyre::Result<LinearFit> {
    let rows: Vec<LoadCellRow> = read_rows(path, ["raw", "kg"])?;
    fit_load_cell_rows(&rows)
}
