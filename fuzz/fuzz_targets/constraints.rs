#![no_main]
use libfuzzer_sys::fuzz_target;

use permlower::fuzzing::constr::{self, ConstraintScenario};

fuzz_target!(|scenario: ConstraintScenario| {
    let _ = env_logger::try_init();
    constr::run(&scenario);
});
