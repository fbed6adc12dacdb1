use std::fs::File;
use std::io::Write;

use press_config::{
    LoadCellRow, PersistedCalibration, TorqueRow, fit_load_cell_rows, fit_torque_rows,
    load_load_cell_csv, load_torque_csv,
};
use rstest::rstest;
use tempfile::tempdir;

#[rstest]
fn torque_fit_two_points_is_exact() {
    let rows = [
        TorqueRow {
            kg: 0.0,
            torque_pct: 1.04,
        },
        TorqueRow {
            kg: 1000.0,
            torque_pct: 34.54,
        },
    ];
    let fit = fit_torque_rows(&rows).unwrap();
    assert!((fit.scale - 0.0335).abs() < 1e-6, "scale {}", fit.scale);
    assert!((fit.offset - 1.04).abs() < 1e-4, "offset {}", fit.offset);
    assert_eq!(fit.inliers, 2);
}

#[rstest]
fn torque_fit_rejects_outliers() {
    let mut rows: Vec<TorqueRow> = (0..40)
        .map(|i| {
            let kg = 50.0 + i as f32 * 25.0;
            let noise = ((i as f32) * 37.0).sin() * 0.05;
            TorqueRow {
                kg,
                torque_pct: 0.0335 * kg + 1.04 + noise,
            }
        })
        .collect();
    rows[10].torque_pct = 80.0;
    rows[30].torque_pct = -40.0;

    let fit = fit_torque_rows(&rows).unwrap();
    let rel = (fit.scale - 0.0335).abs() / 0.0335;
    assert!(rel <= 0.01, "scale rel err {rel}");
    assert!(fit.inliers < rows.len());
}

#[rstest]
fn load_cell_fit_handles_negative_gain() {
    let rows = [
        LoadCellRow { raw: 0, kg: 6.5 },
        LoadCellRow {
            raw: -100_000,
            kg: 29.576,
        },
        LoadCellRow {
            raw: -200_000,
            kg: 52.652,
        },
    ];
    let fit = fit_load_cell_rows(&rows).unwrap();
    assert!((fit.scale + 0.000_230_76).abs() < 1e-8, "scale {}", fit.scale);
    assert!((fit.offset - 6.5).abs() < 1e-3);
}

#[rstest]
#[case(&[(10.0, 1.0), (10.0, 2.0)], "duplicate x values")]
#[case(&[(10.0, 1.0), (30.0, 2.0), (20.0, 1.5)], "monotonic")]
#[case(&[(10.0, 5.0), (20.0, 5.0), (30.0, 5.0)], "zero slope")]
#[case(&[(10.0, 5.0)], "at least two rows")]
fn torque_fit_rejects_bad_tables(#[case] pts: &[(f32, f32)], #[case] expected: &str) {
    let rows: Vec<TorqueRow> = pts
        .iter()
        .map(|&(kg, torque_pct)| TorqueRow { kg, torque_pct })
        .collect();
    let err = fit_torque_rows(&rows).expect_err("should fail");
    assert!(format!("{err}").contains(expected), "got: {err}");
}

#[rstest]
fn csv_with_wrong_headers_errors() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad_headers.csv");
    let mut f = File::create(&path).unwrap();
    writeln!(f, "force,torque").unwrap();
    writeln!(f, "100,4.0").unwrap();

    let err = load_torque_csv(&path).expect_err("should error on bad headers");
    assert!(format!("{err}").contains("headers 'kg,torque_pct'"));
}

#[rstest]
fn csv_with_non_numeric_errors() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad_numeric.csv");
    let mut f = File::create(&path).unwrap();
    writeln!(f, "raw,kg").unwrap();
    writeln!(f, "abc,xyz").unwrap();

    let err = load_load_cell_csv(&path).expect_err("should error on non-numeric");
    assert!(format!("{err}").contains("invalid CSV row 2"));
}

#[rstest]
fn csv_round_trip_through_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("torque.csv");
    let mut f = File::create(&path).unwrap();
    writeln!(f, "kg,torque_pct").unwrap();
    writeln!(f, "100, 4.39").unwrap();
    writeln!(f, "200, 7.74").unwrap();
    writeln!(f, "400, 14.44").unwrap();

    let fit = load_torque_csv(&path).unwrap();
    assert!((fit.scale - 0.0335).abs() < 1e-5);
}

#[rstest]
fn persisted_calibration_serializes_every_field() {
    let p = PersistedCalibration {
        force_mode: Some("load_cell".into()),
        torque_scale: Some(0.0335),
        torque_offset: Some(1.04),
        load_cell_scale: Some(-0.000_230_76),
        load_cell_offset: Some(6.5),
        strain_coeffs: Some([-143.0, 592.0, -365.0, 127.0, -2.15]),
    };
    let text = p.to_toml().unwrap();
    assert!(text.contains("strain_coeffs"));
    let back = PersistedCalibration::from_toml(&text).unwrap();
    assert_eq!(back, p);
}
