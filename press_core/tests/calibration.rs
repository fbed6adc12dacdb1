mod common;

use std::sync::Arc;

use common::{Rig, RigOptions};
use press_core::calibration::{DEFAULT_LOAD_CELL_MAP, DEFAULT_STRAIN_COEFFS, DEFAULT_TORQUE_MAP};
use press_core::mocks::{EventLog, ScriptedActuator, ScriptedLoadSensor};
use press_core::{
    CalibrationStore, EventKind, FileCalibrationStore, ForceMode, LinearMap,
    MemoryCalibrationStore, PressController, StoredCalibration,
};
use press_traits::clock::test_clock::TestClock;
use press_traits::{Clock, LoadSensor};

fn rig_with_store(contents: StoredCalibration) -> Rig {
    Rig::with(RigOptions {
        store: MemoryCalibrationStore::with_contents(contents),
        ..RigOptions::default()
    })
}

fn controller_with(store: impl CalibrationStore + Send + 'static) -> (PressController, EventLog) {
    let clock = TestClock::new();
    let shared: Arc<dyn Clock + Send + Sync> = Arc::new(clock.clone());
    let log = EventLog::new();
    let press = PressController::builder()
        .with_actuators(
            ScriptedActuator::new(Arc::clone(&shared)),
            ScriptedActuator::new(shared),
        )
        .with_load_sensor(ScriptedLoadSensor::new())
        .with_event_sink(log.clone())
        .with_calibration_store(store)
        .with_clock(Box::new(clock))
        .build()
        .unwrap();
    (press, log)
}

#[test]
fn empty_store_is_filled_with_defaults() {
    let rig = Rig::new();
    let stored = rig.store.snapshot();
    assert_eq!(stored.force_mode, Some(ForceMode::LoadCell));
    assert_eq!(stored.torque_map, Some(DEFAULT_TORQUE_MAP));
    assert_eq!(stored.strain_coeffs, Some(DEFAULT_STRAIN_COEFFS));
    assert_eq!(stored.load_cell_map, Some(DEFAULT_LOAD_CELL_MAP));
}

#[test]
fn invalid_stored_values_are_repaired_individually() {
    let rig = rig_with_store(StoredCalibration {
        force_mode: Some(ForceMode::ActuatorTorque),
        torque_map: Some(LinearMap::new(0.5, 1.0)),
        load_cell_map: None,
        strain_coeffs: Some([0.0, 0.0, 0.0, 100.0, f32::NAN]),
    });
    let cal = rig.press().calibration();
    assert_eq!(cal.force_mode, ForceMode::ActuatorTorque);
    assert_eq!(cal.torque, DEFAULT_TORQUE_MAP);
    assert_eq!(cal.strain_coeffs, DEFAULT_STRAIN_COEFFS);

    let stored = rig.store.snapshot();
    assert_eq!(stored.force_mode, Some(ForceMode::ActuatorTorque));
    assert_eq!(stored.torque_map, Some(DEFAULT_TORQUE_MAP));
    assert_eq!(stored.strain_coeffs, Some(DEFAULT_STRAIN_COEFFS));
}

#[test]
fn stored_load_cell_map_is_pushed_into_the_sensor() {
    let map = LinearMap::new(-0.0002, 3.0);
    let rig = rig_with_store(StoredCalibration {
        load_cell_map: Some(map),
        ..StoredCalibration::default()
    });
    assert_eq!(rig.sensor.calibration(), (map.scale, map.offset));
}

#[test]
fn torque_mode_offset_and_scale_update_the_map() {
    let mut rig = Rig::new();
    rig.run("set_force_mode motor_torque");
    rig.run("set_force_offset 2.5");
    rig.run("set_force_scale 0.04");
    assert!(rig.errors().is_empty(), "{:?}", rig.errors());
    let expected = LinearMap::new(0.04, 2.5);
    assert_eq!(rig.press().calibration().torque, expected);
    assert_eq!(rig.store.snapshot().torque_map, Some(expected));
    assert_eq!(rig.store.snapshot().force_mode, Some(ForceMode::ActuatorTorque));
    assert!(rig.log.contains(EventKind::Info, "Force offset set to 2.5 (motor_torque mode)."));
    assert_eq!(rig.log.count(EventKind::Done, "set_force_scale"), 1);
}

#[test]
fn load_cell_offset_and_scale_go_to_the_sensor() {
    let mut rig = Rig::new();
    rig.run("set_force_offset 1.5");
    rig.run("set_force_scale -0.0003");
    assert!(rig.errors().is_empty(), "{:?}", rig.errors());
    assert_eq!(rig.sensor.calibration(), (-0.0003, 1.5));
    assert_eq!(
        rig.store.snapshot().load_cell_map,
        Some(LinearMap::new(-0.0003, 1.5))
    );
    // Torque map is untouched.
    assert_eq!(rig.press().calibration().torque, DEFAULT_TORQUE_MAP);
}

#[test]
fn out_of_range_calibration_is_rejected() {
    let mut rig = Rig::new();
    rig.run("set_force_mode motor_torque");
    rig.run("set_force_scale 0.5");
    rig.run("set_force_mode load_cell");
    rig.run("set_force_offset 75");
    assert_eq!(
        rig.errors(),
        vec![
            "set_force_scale rejected: invalid calibration: torque scale 0.5 outside (0, 0.2]",
            "set_force_offset rejected: invalid calibration: load cell offset 75 outside (-50, 50)",
        ]
    );
    assert_eq!(rig.press().calibration().torque, DEFAULT_TORQUE_MAP);
}

#[test]
fn force_zero_tares_the_load_cell() {
    let mut rig = Rig::new();
    rig.sensor.set_force_kg(4.0);
    rig.run("set_force_zero");
    assert_eq!(rig.log.count(EventKind::Done, "set_force_zero"), 1);
    assert!(rig.sensor.reading().abs() < 1e-3);
    let stored = rig.store.snapshot().load_cell_map.unwrap();
    assert!((stored.offset - 2.5).abs() < 1e-3);
}

#[test]
fn force_zero_in_torque_mode_takes_idle_torque_as_zero() {
    let mut rig = Rig::new();
    rig.run("set_force_mode motor_torque");
    rig.run("set_force_zero");
    assert!(rig.errors().is_empty(), "{:?}", rig.errors());
    let torque = rig.press().calibration().torque;
    assert!(torque.offset.abs() < f32::EPSILON);
    assert!((torque.scale - DEFAULT_TORQUE_MAP.scale).abs() < f32::EPSILON);
    assert_eq!(rig.store.snapshot().torque_map, Some(torque));
    assert!(rig.log.contains(EventKind::Info, "torque offset now 0.0000"));
}

#[test]
fn sensor_write_failure_rejects_the_command() {
    let mut rig = Rig::new();
    rig.sensor.set_fail_writes(true);
    rig.run("set_force_offset 1.0");
    assert_eq!(
        rig.errors(),
        vec!["set_force_offset rejected: hardware error: scripted sensor write failure"]
    );
    assert_eq!(rig.log.count(EventKind::Done, "set_force_offset"), 0);
}

#[test]
fn store_failure_keeps_live_value_and_reports() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileCalibrationStore::open(dir.path().join("missing").join("cal.toml")).unwrap();
    let (mut press, log) = controller_with(store);
    press.handle_command("set_force_mode", "motor_torque");
    assert_eq!(press.calibration().force_mode, ForceMode::ActuatorTorque);
    assert!(log.contains(
        EventKind::Error,
        "Calibration updated but not persisted (force_mode)"
    ));
    assert_eq!(log.count(EventKind::Done, "set_force_mode"), 1);
}

#[test]
fn file_store_carries_calibration_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cal.toml");
    {
        let (mut press, log) = controller_with(FileCalibrationStore::open(&path).unwrap());
        press.handle_command("set_force_mode", "motor_torque");
        press.handle_command("set_force_offset", "2");
        press.handle_command("set_strain_cal", "0 0 0 100 3");
        assert!(log.texts(EventKind::Error).is_empty());
    }
    let (press, _log) = controller_with(FileCalibrationStore::open(&path).unwrap());
    let cal = press.calibration();
    assert_eq!(cal.force_mode, ForceMode::ActuatorTorque);
    assert!((cal.torque.offset - 2.0).abs() < f32::EPSILON);
    assert_eq!(cal.strain_coeffs, [0.0, 0.0, 0.0, 100.0, 3.0]);

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("force_mode = \"motor_torque\""), "{text}");
}

#[test]
fn dump_lists_every_calibration_value() {
    let mut rig = Rig::new();
    rig.run("dump_cal");
    assert_eq!(
        rig.log.texts(EventKind::Info),
        vec![
            "force_mode: load_cell",
            "torque_map: scale=0.0335 offset=1.04",
            "load_cell_map: scale=-0.00023076 offset=6.5",
            "strain_coeffs: -143 592 -365 127 -2.15",
        ]
    );
    assert_eq!(rig.log.count(EventKind::Done, "dump_cal"), 1);
}
