use assert_cmd::Command;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tempfile::tempdir;

// Minimal config for the simulated axis; calibration lives in the tempdir.
fn write_valid_config(dir: &tempfile::TempDir) -> PathBuf {
    let cal = dir.path().join("calibration.toml");
    let toml = format!(
        r#"
[runner]
period_ms = 5
step_timeout_ms = 120000

[storage]
calibration_file = "{}"

[simulator]
start_mm = 50.0
travel_mm = 400.0
workpiece_mm = 120.0
workpiece_kg_per_mm = 40.0
"#,
        cal.display()
    );
    let path = dir.path().join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

fn press(cfg: &PathBuf) -> Command {
    let mut cmd = Command::cargo_bin("press").unwrap();
    cmd.arg("--config").arg(cfg).arg("--virtual-time");
    cmd
}

#[rstest]
#[case(&["--help"], 0, "Usage:", "stdout")]
#[case(&["exec", "home"], 0, "DONE: home", "stdout")]
#[case(&["exec", "move_abs", "10"], 3, "move_abs rejected: axis is not homed", "stdout")]
#[case(&["exec", "move_abs", "10"], 3, "What happened: 1 command(s) reported errors", "stderr")]
#[case(&["exec", "frobnicate"], 3, "frobnicate", "stdout")]
#[case(&["exec"], 2, "required", "stderr")]
#[case(&["self-check"], 0, "Self-check OK", "stdout")]
fn cli_table_cases(
    #[case] args: &[&str],
    #[case] exit_code: i32,
    #[case] needle: &str,
    #[case] stream: &str,
) {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let mut cmd = press(&cfg);
    for a in args {
        cmd.arg(a);
    }

    let assert = cmd.assert().code(exit_code);
    match stream {
        "stdout" => {
            assert.stdout(predicate::str::contains(needle));
        }
        "stderr" => {
            assert.stderr(predicate::str::contains(needle));
        }
        other => panic!("unknown stream: {other}"),
    }
}

#[rstest]
fn script_runs_and_reports_telemetry() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);
    let script = dir.path().join("job.txt");
    fs::write(
        &script,
        "# park above the part\nhome\n\nmove_abs 20 10\nwait 50\n",
    )
    .unwrap();

    press(&cfg)
        .arg("run")
        .arg("--script")
        .arg(&script)
        .arg("--telemetry")
        .arg("--stats")
        .assert()
        .success()
        .stdout(predicate::str::contains("DONE: home"))
        .stdout(predicate::str::contains("DONE: move_abs"))
        .stdout(predicate::str::contains("position=20.00mm"))
        .stderr(predicate::str::contains("Press Loop Stats"));
}

#[rstest]
fn script_keeps_going_after_a_rejection_but_fails() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);
    let script = dir.path().join("job.txt");
    fs::write(&script, "move_abs 5\nhome\n").unwrap();

    press(&cfg)
        .arg("run")
        .arg("--script")
        .arg(&script)
        .assert()
        .code(3)
        .stdout(predicate::str::contains("ERROR: move_abs rejected"))
        .stdout(predicate::str::contains("DONE: home"));
}

#[rstest]
fn cli_reports_bad_calibration_header() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let bad_csv = dir.path().join("calib.csv");
    let mut f = fs::File::create(&bad_csv).unwrap();
    writeln!(f, "raw,value").unwrap();
    writeln!(f, "100,0.0").unwrap();
    writeln!(f, "200,1.0").unwrap();

    press(&cfg)
        .arg("fit-load-cell")
        .arg("--csv")
        .arg(&bad_csv)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid headers in calibration CSV"))
        .stderr(predicate::str::contains(
            "calibration CSV must have headers 'raw,kg', got: raw,value",
        ));
}

#[rstest]
fn fit_torque_persists_to_calibration_file() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    let csv = dir.path().join("torque.csv");
    let mut f = fs::File::create(&csv).unwrap();
    writeln!(f, "kg,torque_pct").unwrap();
    for kg in [50.0f32, 100.0, 200.0, 300.0, 400.0] {
        writeln!(f, "{kg},{}", 0.0335 * kg + 1.04).unwrap();
    }

    press(&cfg)
        .arg("fit-torque")
        .arg("--csv")
        .arg(&csv)
        .arg("--persist")
        .assert()
        .success()
        .stdout(predicate::str::contains("persisted"));

    let saved = fs::read_to_string(dir.path().join("calibration.toml")).unwrap();
    assert!(saved.contains("torque_scale"), "saved: {saved}");
    assert!(saved.contains("torque_offset"), "saved: {saved}");
}

#[rstest]
fn fit_out_of_range_is_refused() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    // 1 % per kg is far outside a plausible torque map.
    let csv = dir.path().join("torque.csv");
    fs::write(&csv, "kg,torque_pct\n10,10\n20,20\n30,30\n").unwrap();

    press(&cfg)
        .arg("fit-torque")
        .arg("--csv")
        .arg(&csv)
        .arg("--persist")
        .assert()
        .failure()
        .stderr(predicate::str::contains("out of range"));
    assert!(!dir.path().join("calibration.toml").exists());
}

#[rstest]
fn persist_without_calibration_file_is_explained() {
    let dir = tempdir().unwrap();
    let csv = dir.path().join("torque.csv");
    fs::write(&csv, "kg,torque_pct\n50,2.715\n100,4.39\n200,7.74\n").unwrap();

    Command::cargo_bin("press")
        .unwrap()
        .arg("fit-torque")
        .arg("--csv")
        .arg(&csv)
        .arg("--persist")
        .assert()
        .failure()
        .stderr(predicate::str::contains("storage.calibration_file"));
}

#[rstest]
fn invalid_config_is_rejected_before_startup() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cfg.toml");
    fs::write(&path, "[simulator]\ntravel_mm = 0.0\n").unwrap();

    Command::cargo_bin("press")
        .unwrap()
        .arg("--config")
        .arg(&path)
        .arg("exec")
        .arg("home")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("simulator.travel_mm must be > 0"));
}

#[rstest]
fn serve_reads_commands_until_eof() {
    let dir = tempdir().unwrap();
    let cfg = write_valid_config(&dir);

    press(&cfg)
        .arg("serve")
        .write_stdin("home\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("DONE: home"));
}
