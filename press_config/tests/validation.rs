use press_config::load_toml;
use rstest::rstest;

#[rstest]
#[case("[mechanics]\nsteps_per_mm = 0.0\n", "mechanics.steps_per_mm must be > 0")]
#[case("[homing]\nbackoff_mm = 600.0\n", "homing.backoff_mm")]
#[case("[homing]\nstart_timeout_ms = 0\n", "homing.start_timeout_ms must be >= 1")]
#[case("[motion]\ndefault_speed_mms = 150.0\n", "motion.max_speed_mms must be >=")]
#[case("[motion]\ndefault_torque_limit_pct = 120.0\n", "motion.default_torque_limit_pct")]
#[case("[torque]\newma_alpha = 0.0\n", "torque.ewma_alpha must be in (0.0, 1.0]")]
#[case("[force]\nsensor_min_kg = 1300.0\n", "force.sensor_min_kg must be <")]
#[case("[force]\nsafety_factor = 0.5\n", "force.safety_factor must be >= 1.0")]
#[case("[strain]\nmax_deflection_mm = -1.0\n", "strain.max_deflection_mm must be > 0")]
#[case("[runner]\nwatchdog_ms = 5\n", "runner.watchdog_ms must exceed runner.period_ms")]
#[case("[simulator]\nstart_mm = 450.0\n", "simulator.start_mm must lie between the hard stops")]
#[case("[simulator]\nworkpiece_mm = 0.0\n", "simulator.workpiece_mm")]
#[case("[load_cell]\nstale_ms = 0\n", "load_cell.stale_ms must be >= 1")]
fn rejects_out_of_range_values(#[case] toml: &str, #[case] expected: &str) {
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should be rejected");
    assert!(
        format!("{err}").contains(expected),
        "expected '{expected}' in '{err}'"
    );
}

#[rstest]
fn partial_sections_keep_remaining_defaults() {
    let toml = r#"
[homing]
stroke_mm = 300.0
search_torque_pct = 12.5

[motion]
retract_speed_mms = 40.0

[storage]
calibration_file = "/var/lib/press/calibration.toml"
"#;
    let cfg = load_toml(toml).expect("parse TOML");
    cfg.validate().expect("valid");
    assert_eq!(cfg.homing.stroke_mm, 300.0);
    assert_eq!(cfg.homing.search_torque_pct, 12.5);
    assert_eq!(cfg.homing.backoff_mm, 1.0);
    assert_eq!(cfg.motion.retract_speed_mms, 40.0);
    assert_eq!(cfg.motion.max_speed_mms, 100.0);
    assert_eq!(
        cfg.storage.calibration_file.as_deref(),
        Some("/var/lib/press/calibration.toml")
    );
}

#[rstest]
fn unknown_types_fail_to_parse() {
    let err = load_toml("[homing]\nstroke_mm = \"long\"\n").expect_err("type mismatch");
    assert!(format!("{err}").contains("stroke_mm"));
}

#[rstest]
fn load_cell_device_is_optional() {
    let cfg = load_toml("[load_cell]\ndevice = \"/dev/ttyACM0\"\n").expect("parse TOML");
    cfg.validate().expect("valid");
    assert_eq!(cfg.load_cell.device.as_deref(), Some("/dev/ttyACM0"));
    assert_eq!(cfg.load_cell.baud, 115_200);
    assert_eq!(cfg.simulator.workpiece_mm, Some(120.0));
}
