#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parse and validation errors are fine; panics are not.
    if let Ok(cfg) = press_config::load_toml(data) {
        if cfg.validate().is_ok() {
            // A valid config must map onto the runtime config.
            let _ = press_core::PressCfg::from(&cfg);
            let _ = press_core::LoopCfg::from(&cfg.runner);
        }
    }

    // The calibration record is rewritten from whatever was read.
    if let Ok(record) = press_config::PersistedCalibration::from_toml(data) {
        let _ = record.validate();
        if let Ok(text) = record.to_toml() {
            let again = press_config::PersistedCalibration::from_toml(&text);
            assert!(again.is_ok(), "record did not survive a rewrite: {text}");
        }
    }
});
