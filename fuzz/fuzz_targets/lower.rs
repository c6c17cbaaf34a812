#![no_main]
use libfuzzer_sys::fuzz_target;

use permlower::fuzzing::perm::{self, PermScenario};

fuzz_target!(|scenario: PermScenario| {
    let _ = env_logger::try_init();
    perm::run(&scenario);
});
