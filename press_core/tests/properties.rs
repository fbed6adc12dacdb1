mod common;

use common::Rig;
use press_core::EventKind;
use proptest::prelude::*;

const STEPS_PER_MM: f64 = 160.0;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// However often a move is paused, and for however long, it ends
    /// exactly the requested number of steps from where it started.
    #[test]
    fn completed_moves_conserve_steps(
        distance in -15.0f32..15.0,
        speed in 5.0f32..50.0,
        mut pauses in prop::collection::vec((0.05f32..0.95, 0u64..5_000), 0..4),
    ) {
        let mut rig = Rig::new();
        rig.home();
        rig.run("move_abs 20 50");
        let start = rig.a.position();
        #[allow(clippy::cast_possible_truncation)]
        let requested = (f64::from(distance) * STEPS_PER_MM).round() as i64;

        rig.send("move_inc", &format!("{distance} {speed}"));
        pauses.sort_by(|a, b| a.0.total_cmp(&b.0));
        for (fraction, hold_ms) in pauses {
            #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
            let goal = (requested.abs() as f32 * fraction) as i64;
            for _ in 0..20_000 {
                if (rig.a.position() - start).abs() >= goal || rig.press().active_move().is_none() {
                    break;
                }
                rig.cycle();
            }
            if rig.press().active_move().is_none() {
                break;
            }
            rig.run("pause");
            rig.clock.advance_ms(hold_ms);
            rig.send("resume", "");
        }
        rig.runner.run_until_settled().unwrap();

        prop_assert_eq!(rig.log.count(EventKind::Done, "move_inc"), 1);
        prop_assert!(rig.press().active_move().is_none());
        prop_assert_eq!(rig.a.position() - start, requested);
        prop_assert_eq!(rig.b.position() - start, requested);
        let t = rig.telemetry();
        prop_assert!((t.last_distance_mm - distance.abs()).abs() <= 0.5 / 160.0 + 1e-4);
    }

    /// Exactly one force source is authoritative, and it follows the mode.
    #[test]
    fn telemetry_force_follows_the_active_mode(torque_mode in any::<bool>(), kg in 0.0f32..500.0) {
        let mut rig = Rig::new();
        rig.sensor.set_force_kg(kg);
        if torque_mode {
            rig.run("set_force_mode motor_torque");
        }
        let t = rig.telemetry();
        let (source, value) = if torque_mode {
            ("motor_torque", t.force_torque_kg)
        } else {
            ("load_cell", t.force_load_cell_kg)
        };
        prop_assert_eq!(t.force_source, source);
        prop_assert!((t.force_kg - value).abs() < f32::EPSILON);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    /// Wherever the axis starts, homing latches the same reference.
    #[test]
    fn rehoming_latches_the_same_reference(start in 4_200i64..40_000, park_mm in 1.0f32..60.0) {
        let mut rig = Rig::with(common::RigOptions { start, ..common::RigOptions::default() });
        rig.home();
        let first = rig.press().machine_home_steps();
        prop_assert_eq!(first, Some(common::LOWER_STOP + common::BACKOFF_STEPS));
        rig.run(&format!("move_abs {park_mm} 50"));
        rig.home();
        prop_assert_eq!(rig.press().machine_home_steps(), first);
    }
}
