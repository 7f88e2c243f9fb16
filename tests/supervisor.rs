// tests/supervisor.rs

mod common;
use crate::common::{
    SETTLE, ScriptBuilder, append_line, fast_supervisor_config, init_tracing, read_lines,
    wait_until,
};

use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use tempfile::TempDir;

use watchdeploy::config::SupervisorConfig;
use watchdeploy::engine::Supervisor;
use watchdeploy::errors::SupervisorError;
use watchdeploy::types::BackoffScope;

type TestResult = Result<(), Box<dyn Error>>;

/// A temp dir holding a watched config file and a start log.
struct Fixture {
    dir: TempDir,
    conf: PathBuf,
    log: PathBuf,
}

impl Fixture {
    fn new() -> Result<Self, Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let root = fs::canonicalize(dir.path())?;
        let conf = root.join("app.conf");
        fs::write(&conf, "version = 1\n")?;
        Ok(Self {
            dir,
            conf,
            log: root.join("starts.log"),
        })
    }

    /// Script that records each start, then runs `tail`.
    fn script(&self, name: &str, tail: ScriptBuilder) -> Result<Vec<String>, Box<dyn Error>> {
        let mut builder = ScriptBuilder::new().log_start(&self.log, name);
        for line in tail.render().lines().skip(1) {
            builder = builder.line(line);
        }
        let path = builder.write_to(self.dir.path(), &format!("{name}.sh"))?;
        Ok(ScriptBuilder::command(&path))
    }

    fn starts(&self) -> usize {
        read_lines(&self.log).len()
    }
}

#[test]
fn a_process_that_exits_is_redeployed_with_growing_backoff() -> TestResult {
    init_tracing();

    let fx = Fixture::new()?;
    let supervisor = Supervisor::new(fast_supervisor_config())?;
    supervisor.start()?;

    let args = fx.script("crasher", ScriptBuilder::new().exit(1))?;
    supervisor.deploy(args, &fx.conf)?;

    assert!(
        wait_until(SETTLE, || fx.starts() >= 3),
        "expected repeated restarts, saw {}",
        fx.starts()
    );
    // Two automatic redeploys consumed 1 and 2 units.
    assert!(supervisor.current_backoff(&fx.conf) >= 4);

    supervisor.stop();
    Ok(())
}

#[test]
fn changing_the_watched_file_restarts_the_process() -> TestResult {
    init_tracing();

    let fx = Fixture::new()?;
    let supervisor = Supervisor::new(fast_supervisor_config())?;
    supervisor.start()?;

    let args = fx.script("server", ScriptBuilder::new().sleep_forever())?;
    let first = supervisor.deploy(args.clone(), &fx.conf)?;
    assert!(wait_until(SETTLE, || fx.starts() == 1));

    let work = supervisor.work(first).ok_or("deployed work missing")?;
    assert_eq!(work.path, fx.conf);
    assert_eq!(work.args, args);
    assert_eq!(work.executable, fs::canonicalize("/bin/sh")?);

    append_line(&fx.conf, "version = 2")?;

    assert!(wait_until(SETTLE, || {
        let pids = supervisor.pids();
        pids.len() == 1 && pids[0] != first
    }));
    assert!(wait_until(SETTLE, || fx.starts() == 2));
    // Reset to 1 by the change, then consumed by the restart.
    assert_eq!(supervisor.current_backoff(&fx.conf), 2);

    let second = supervisor.pids()[0];
    assert_eq!(supervisor.work(second).map(|w| w.args), Some(args));
    assert!(supervisor.work(first).is_none());

    supervisor.stop();
    assert_eq!(supervisor.undeploy_all()?, 1);
    Ok(())
}

#[test]
fn a_file_change_resets_accumulated_backoff() -> TestResult {
    init_tracing();

    let fx = Fixture::new()?;
    let supervisor = Supervisor::new(fast_supervisor_config())?;
    supervisor.start()?;

    let args = fx.script("server", ScriptBuilder::new().sleep_forever())?;
    supervisor.deploy(args, &fx.conf)?;
    assert!(wait_until(SETTLE, || fx.starts() == 1));

    for _ in 0..4 {
        supervisor.next_redeploy_delay(&fx.conf);
    }
    assert_eq!(supervisor.current_backoff(&fx.conf), 16);

    append_line(&fx.conf, "version = 2")?;

    // Restarted after one unit, not sixteen.
    assert!(wait_until(SETTLE, || fx.starts() == 2));
    assert_eq!(supervisor.current_backoff(&fx.conf), 2);

    supervisor.stop();
    assert_eq!(supervisor.undeploy_all()?, 1);
    Ok(())
}

#[test]
fn undeploy_kills_without_redeploying_and_is_idempotent() -> TestResult {
    init_tracing();

    let fx = Fixture::new()?;
    let supervisor = Supervisor::new(fast_supervisor_config())?;
    supervisor.start()?;

    let args = fx.script("server", ScriptBuilder::new().sleep_forever())?;
    let pid = supervisor.deploy(args, &fx.conf)?;
    assert!(wait_until(SETTLE, || fx.starts() == 1));

    assert!(supervisor.undeploy(pid)?);
    assert!(!supervisor.undeploy(pid)?);
    assert!(supervisor.pids().is_empty());

    // The kill produces an exit event; it must not bring the process back.
    thread::sleep(Duration::from_millis(300));
    assert_eq!(fx.starts(), 1);
    assert!(supervisor.pids().is_empty());
    assert!(!supervisor.has_pending_redeploy(&fx.conf));

    // Nor does a later change to the formerly watched file.
    append_line(&fx.conf, "version = 2")?;
    thread::sleep(Duration::from_millis(300));
    assert_eq!(fx.starts(), 1);

    supervisor.stop();
    Ok(())
}

#[test]
fn deploy_rejects_bad_input() -> TestResult {
    init_tracing();

    let fx = Fixture::new()?;
    let supervisor = Supervisor::new(fast_supervisor_config())?;

    let err = supervisor.deploy(Vec::new(), &fx.conf).expect_err("empty args");
    assert!(matches!(err, SupervisorError::InvalidArgument(_)));

    let err = supervisor
        .deploy(vec!["/definitely/not/a/program".to_string()], &fx.conf)
        .expect_err("missing executable");
    assert!(matches!(err, SupervisorError::Setup { .. }));

    let err = supervisor
        .deploy(vec!["/bin/sh".to_string()], fx.conf.with_extension("missing"))
        .expect_err("missing watch path");
    assert!(matches!(err, SupervisorError::Setup { .. }));

    assert!(supervisor.pids().is_empty());
    Ok(())
}

#[test]
fn redeploys_for_the_same_path_are_deduplicated() -> TestResult {
    init_tracing();

    let fx = Fixture::new()?;
    // Long units so nothing fires while the test inspects the schedule.
    let supervisor = Supervisor::new(SupervisorConfig {
        backoff_unit: Duration::from_secs(30),
        ..fast_supervisor_config()
    })?;

    let args = fx.script("sleeper", ScriptBuilder::new().sleep(5))?;
    let a = supervisor.deploy(args.clone(), &fx.conf)?;
    let b = supervisor.deploy(args, &fx.conf)?;
    assert_eq!(supervisor.pids().len(), 2);

    assert!(supervisor.redeploy(a));
    assert!(supervisor.has_pending_redeploy(&fx.conf));
    assert!(!supervisor.redeploy(b), "second redeploy for the path is skipped");
    assert!(!supervisor.redeploy(a), "unknown pid");

    assert!(supervisor.pids().is_empty());
    // Only the scheduled redeploy consumed a backoff unit.
    assert_eq!(supervisor.current_backoff(&fx.conf), 2);
    Ok(())
}

#[test]
fn backoff_scope_decides_which_paths_share_a_counter() -> TestResult {
    init_tracing();

    let global = Supervisor::new(fast_supervisor_config())?;
    assert_eq!(global.next_redeploy_delay("/srv/a"), 1);
    assert_eq!(global.next_redeploy_delay("/srv/b"), 2);
    global.reset_redeploy_delay("/srv/b");
    assert_eq!(global.current_backoff("/srv/a"), 1);

    let per_path = Supervisor::new(SupervisorConfig {
        backoff_scope: BackoffScope::PerPath,
        ..fast_supervisor_config()
    })?;
    assert_eq!(per_path.next_redeploy_delay("/srv/a"), 1);
    assert_eq!(per_path.next_redeploy_delay("/srv/a"), 2);
    assert_eq!(per_path.next_redeploy_delay("/srv/b"), 1);
    Ok(())
}

#[test]
fn lifecycle_start_is_idempotent_and_stop_is_final() -> TestResult {
    init_tracing();

    let supervisor = Supervisor::new(fast_supervisor_config())?;
    assert!(!supervisor.is_started());

    supervisor.start()?;
    supervisor.start()?;
    assert!(supervisor.is_started());

    supervisor.stop();
    supervisor.stop();
    assert!(!supervisor.is_started());

    let err = supervisor.start().expect_err("restart after stop");
    assert!(matches!(err, SupervisorError::InvalidArgument(_)));
    Ok(())
}

#[test]
fn dropping_the_supervisor_kills_its_processes() -> TestResult {
    init_tracing();

    let fx = Fixture::new()?;
    let pid = {
        let supervisor = Supervisor::new(fast_supervisor_config())?;
        supervisor.start()?;
        let args = fx.script("server", ScriptBuilder::new().sleep_forever())?;
        supervisor.deploy(args, &fx.conf)?
    };

    // Killed with SIGTERM on drop; nobody reaps it any more, so it lingers
    // as a zombie. /proc reports it as state 'Z' (or it is gone).
    let stat_path = format!("/proc/{}/stat", pid.as_raw());
    assert!(wait_until(SETTLE, || {
        match fs::read_to_string(&stat_path) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .map(|rest| rest.trim_start().starts_with('Z'))
                .unwrap_or(false),
            Err(_) => true,
        }
    }));
    Ok(())
}
