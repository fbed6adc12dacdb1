#![no_main]
use libfuzzer_sys::fuzz_target;
use press_core::{Command, split_line};

fuzz_target!(|data: &str| {
    for line in data.lines() {
        let Some((name, args)) = split_line(line) else {
            continue;
        };
        // Every accepted command reports back the name it was parsed from.
        if let Ok(cmd) = Command::parse(name, args) {
            assert_eq!(cmd.name(), name);
        }
    }
});
