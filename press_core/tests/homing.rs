mod common;

use common::{BACKOFF_STEPS, LOWER_STOP, Rig, RigOptions};
use press_core::{EventKind, HomingPhase, MotionState, PressCfg};
use rstest::rstest;

#[test]
fn home_runs_every_phase_and_latches_reference() {
    let mut rig = Rig::new();
    rig.send("home", "");
    assert_eq!(rig.press().motion_state(), MotionState::Homing);

    let mut phases = vec![rig.press().homing_phase()];
    for _ in 0..10_000 {
        rig.cycle();
        let p = rig.press().homing_phase();
        if phases.last() != Some(&p) {
            phases.push(p);
        }
        if rig.press().motion_state() == MotionState::Standby {
            break;
        }
    }

    let expected = [
        HomingPhase::RapidSearchStart,
        HomingPhase::RapidSearchWaitStart,
        HomingPhase::RapidSearchMoving,
        HomingPhase::BackoffStart,
        HomingPhase::BackoffWaitStart,
        HomingPhase::BackoffMoving,
        HomingPhase::SlowSearchStart,
        HomingPhase::SlowSearchWaitStart,
        HomingPhase::SlowSearchMoving,
        HomingPhase::SetOffsetStart,
        HomingPhase::SetOffsetWaitStart,
        HomingPhase::SetOffsetMoving,
        HomingPhase::SetZero,
        HomingPhase::Idle,
    ];
    assert_eq!(phases, expected);
    assert_eq!(rig.press().machine_home_steps(), Some(LOWER_STOP + BACKOFF_STEPS));
    assert_eq!(rig.log.texts(EventKind::Start), vec!["home"]);
    assert_eq!(rig.log.count(EventKind::Done, "home"), 1);
    assert!(rig.errors().is_empty(), "{:?}", rig.errors());

    let t = rig.telemetry();
    assert!(t.homed);
    assert!(!t.retract_homed);
    assert!(t.current_position_mm.abs() < 1e-6);
}

#[test]
fn homing_restores_default_torque_limit() {
    let mut rig = Rig::new();
    rig.home();
    let default = PressCfg::default().moves.default_torque_limit_pct;
    assert!((rig.press().torque_limit_pct() - default).abs() < f32::EPSILON);
}

#[rstest]
#[case(8000)]
#[case(5000)]
#[case(40_000)]
fn rehoming_is_idempotent(#[case] start: i64) {
    let mut rig = Rig::with(RigOptions {
        start,
        ..RigOptions::default()
    });
    rig.home();
    let first = rig.press().machine_home_steps();
    rig.run("move_abs 20 10");
    rig.home();
    assert_eq!(rig.press().machine_home_steps(), first);
}

#[test]
fn free_travel_without_contact_fails() {
    let mut rig = Rig::with(RigOptions {
        lower_stop: None,
        cfg: {
            let mut cfg = PressCfg::default();
            cfg.homing.stroke_mm = 5.0;
            cfg
        },
        ..RigOptions::default()
    });
    rig.run("home");
    assert_eq!(rig.press().motion_state(), MotionState::Standby);
    assert_eq!(rig.press().machine_home_steps(), None);
    let errors = rig.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("RAPID_SEARCH_MOVING"), "{errors:?}");
    assert!(errors[0].contains("torque limit"), "{errors:?}");
    assert_eq!(rig.log.count(EventKind::Done, "home"), 0);
}

#[test]
fn drive_that_never_starts_times_out() {
    let mut rig = Rig::new();
    rig.a.set_refuse_motion(true);
    rig.b.set_refuse_motion(true);
    rig.a.set_fault(false, 0x0000_0042);
    let started = rig.clock.elapsed();
    rig.run("home");
    let waited = rig.clock.elapsed() - started;

    let errors = rig.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("did not start within 500 ms"), "{errors:?}");
    assert!(errors[0].contains("A status=0x00000042"), "{errors:?}");
    assert!(waited.as_millis() >= 500);
    assert!(waited.as_millis() < 1000);
}

#[test]
fn home_retract_latches_the_other_reference() {
    let mut rig = Rig::new();
    rig.home();
    let upper = rig.a.position() + 1600;
    rig.a.set_upper_stop(Some(upper));
    rig.b.set_upper_stop(Some(upper));
    rig.run("home_retract");
    assert_eq!(rig.log.count(EventKind::Done, "home_retract"), 1);
    assert_eq!(rig.press().retract_steps(), Some(upper - BACKOFF_STEPS));
    assert!(rig.telemetry().retract_homed);
    // Machine home is untouched.
    assert!(rig.telemetry().homed);
}

#[test]
fn pause_during_homing_is_refused() {
    let mut rig = Rig::new();
    rig.send("home", "");
    for _ in 0..20 {
        rig.cycle();
    }
    rig.send("pause", "");
    assert!(rig.log.contains(EventKind::Info, "Homing cannot be paused"));
    assert_eq!(rig.log.count(EventKind::Done, "pause"), 1);
    assert_eq!(rig.press().motion_state(), MotionState::Homing);
}

#[test]
fn cancel_stops_homing() {
    let mut rig = Rig::new();
    rig.send("home", "");
    for _ in 0..20 {
        rig.cycle();
    }
    let stops = rig.a.stop_count();
    rig.send("cancel", "");
    assert_eq!(rig.press().motion_state(), MotionState::Standby);
    assert!(rig.a.stop_count() > stops);
    assert_eq!(rig.log.count(EventKind::Done, "cancel"), 1);
    assert_eq!(rig.press().machine_home_steps(), None);
}

#[test]
fn second_home_while_homing_is_busy() {
    let mut rig = Rig::new();
    rig.send("home", "");
    rig.send("home", "");
    assert!(
        rig.log
            .contains(EventKind::Error, "home rejected: homing already in progress")
    );
}

#[test]
fn stall_torque_while_backing_off_does_not_abort() {
    let mut rig = Rig::new();
    rig.send("home", "");
    for _ in 0..10_000 {
        let backing_off = matches!(
            rig.press().homing_phase(),
            HomingPhase::BackoffMoving | HomingPhase::SetOffsetMoving
        );
        let pct = backing_off.then_some(95.0);
        rig.a.set_feedback_override(pct);
        rig.b.set_feedback_override(pct);
        rig.cycle();
        if rig.press().motion_state() == MotionState::Standby {
            break;
        }
    }
    assert!(rig.errors().is_empty(), "{:?}", rig.errors());
    assert_eq!(rig.log.count(EventKind::Done, "home"), 1);
    assert_eq!(rig.press().machine_home_steps(), Some(LOWER_STOP + BACKOFF_STEPS));
}
