#![allow(dead_code)]

use std::time::Duration;

pub use watchdeploy_test_utils::{
    ScriptBuilder, append_line, fast_supervisor_config, init_tracing, read_lines, wait_until,
};

/// Upper bound for anything the tests wait on.
pub const SETTLE: Duration = Duration::from_secs(5);
