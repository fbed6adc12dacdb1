mod common;

use common::{BACKOFF_STEPS, LOWER_STOP, Rig, RigOptions};
use press_core::mocks::Workpiece;
use press_core::{EventKind, MoveState};
use rstest::rstest;

const HOME: i64 = LOWER_STOP + BACKOFF_STEPS;

fn pressing_rig() -> Rig {
    let mut rig = Rig::with(RigOptions {
        start: 5000,
        workpiece: Some(Workpiece {
            surface_steps: HOME + 1600,
            kg_per_step: 0.25,
            torque_pct_per_kg: 0.0,
        }),
        ..RigOptions::default()
    });
    rig.home();
    // Linear frame: 100 kg per mm of deflection, 3 kg at rest.
    rig.run("set_strain_cal 0 0 0 100 3");
    assert_eq!(rig.log.count(EventKind::Done, "set_strain_cal"), 1);
    rig.sensor.set_force_kg(1.0);
    rig.log.clear();
    rig
}

#[test]
fn energy_starts_at_contact_and_excludes_frame_flex() {
    let mut rig = pressing_rig();
    rig.send("move_abs", "30 5 300 hold");

    rig.cycle_until(5_000, |r| r.telemetry().current_position_mm >= 9.5);
    let before_contact = *rig.press().energy().state();
    assert!(!before_contact.contact_active);
    assert!(before_contact.net_joules.abs() < f64::EPSILON);
    assert!(before_contact.machine_joules.abs() < f64::EPSILON);

    let mut prev = before_contact;
    let mut first_contact = None;
    while rig.press().move_state() == MoveState::Active {
        rig.cycle();
        let s = *rig.press().energy().state();
        assert!(s.net_joules >= prev.net_joules, "net energy decreased");
        assert!(s.machine_joules >= prev.machine_joules, "machine energy decreased");
        if s.contact_active && first_contact.is_none() {
            first_contact = Some(s);
        }
        prev = s;
    }
    assert!(rig.log.contains(EventKind::Info, "Force limit of 300.00 kg reached"));

    let contact = first_contact.expect("contact never registered");
    // Re-anchored at the contact sample: position minus the deflection the
    // force implies, which is ~0 mm at the 3 kg threshold.
    assert!(contact.baseline_position_mm > 10.0 - 0.01);
    assert!(contact.baseline_position_mm < 10.2);
    assert!(contact.net_joules.abs() < f64::EPSILON);

    let end = *rig.press().energy().state();
    assert!(end.machine_joules > 0.0);
    assert!(end.net_joules > 0.0);
    // Naive gross work ~ 1/2 * 300 kg * 7.5 mm; flex takes a visible share.
    let gross = end.net_joules + end.machine_joules;
    assert!(end.net_joules < gross * 0.99);
    assert!((gross - 0.5 * 300.0 * 7.5 * 0.00981).abs() < 2.0, "gross {gross}");

    let t = rig.telemetry();
    assert!((t.joules - end.net_joules).abs() < f64::EPSILON);
    assert!((t.machine_joules - end.machine_joules).abs() < f64::EPSILON);
}

#[test]
fn totals_survive_pause_and_resume() {
    let mut rig = pressing_rig();
    rig.send("move_abs", "15 5");
    rig.cycle_until(5_000, |r| r.telemetry().current_position_mm >= 12.0);
    rig.run("pause");
    let paused = *rig.press().energy().state();
    assert!(paused.net_joules > 0.0);
    assert!(!paused.integrating);

    rig.run("resume");
    assert_eq!(rig.log.count(EventKind::Done, "move_abs"), 1);
    let end = *rig.press().energy().state();
    assert!(end.net_joules > paused.net_joules);
}

#[test]
fn torque_mode_does_not_integrate() {
    let mut rig = pressing_rig();
    rig.run("set_force_mode motor_torque");
    rig.run("move_abs 15 5");
    let s = rig.press().energy().state();
    assert!(s.net_joules.abs() < f64::EPSILON);
    assert!(s.machine_joules.abs() < f64::EPSILON);
}

#[test]
fn new_strain_coefficients_reset_accounting() {
    let mut rig = pressing_rig();
    rig.run("move_abs 12 5");
    assert!(rig.press().energy().state().net_joules > 0.0);
    rig.run("set_strain_cal -143 592 -365 127 -2.15");
    assert_eq!(*rig.press().energy().state(), Default::default());
    assert_eq!(
        rig.press().calibration().strain_coeffs,
        [-143.0, 592.0, -365.0, 127.0, -2.15]
    );
}

#[rstest]
#[case("set_force_offset 0.5", "set_force_offset")]
#[case("set_force_scale 0.0003", "set_force_scale")]
#[case("set_force_zero", "set_force_zero")]
fn force_calibration_changes_reset_accounting(#[case] line: &str, #[case] done: &str) {
    let mut rig = pressing_rig();
    rig.run("move_abs 12 5");
    assert!(rig.press().energy().state().net_joules > 0.0);
    // Keep the tare within the valid offset range: about 2 kg at rest.
    rig.sensor.set_force_kg(1.0 - rig.press().telemetry().force_load_cell_kg + 2.0);
    rig.run(line);
    assert_eq!(rig.log.count(EventKind::Done, done), 1, "{:?}", rig.errors());
    assert_eq!(*rig.press().energy().state(), Default::default());
}

#[test]
fn invalid_strain_coefficients_are_rejected() {
    let mut rig = pressing_rig();
    rig.run("set_strain_cal 0 0 0 100000 3");
    let errors = rig.errors();
    assert_eq!(errors.len(), 1);
    assert!(
        errors[0]
            .starts_with("set_strain_cal rejected: invalid calibration: strain coefficient c1"),
        "{errors:?}"
    );
    assert_eq!(rig.press().calibration().strain_coeffs, [0.0, 0.0, 0.0, 100.0, 3.0]);
}
