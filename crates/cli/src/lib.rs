// gridcalc CLI library: script execution and the exit code registry,
// shared by the binary and its integration tests.

pub mod exit_codes;
pub mod script;
