pub mod script;

use std::sync::Once;
use std::thread;
use std::time::{Duration, Instant};

use tracing_subscriber::{EnvFilter, fmt};
use watchdeploy::config::SupervisorConfig;

pub use script::{ScriptBuilder, append_line, read_lines};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .with_thread_names(true)
            .init();
    });
}

/// Poll `condition` every 10ms until it holds or `timeout` elapses.
///
/// Returns the final value of `condition`.
pub fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

/// Supervisor settings that keep tests fast: 20ms backoff units, short
/// reactor waits.
pub fn fast_supervisor_config() -> SupervisorConfig {
    SupervisorConfig {
        poll_timeout: Duration::from_millis(50),
        backoff_unit: Duration::from_millis(20),
        ..SupervisorConfig::default()
    }
}
