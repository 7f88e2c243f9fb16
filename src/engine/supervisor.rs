// src/engine/supervisor.rs

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nix::unistd::Pid;
use tracing::{debug, error, info, warn};

use crate::config::SupervisorConfig;
use crate::engine::backoff::BackoffTable;
use crate::engine::inbox::EventInbox;
use crate::engine::{ManagedWork, SupervisorEvent};
use crate::errors::{Result, SupervisorError};
use crate::process::{ExitCallback, ProcessObserver};
use crate::reactor::Reactor;
use crate::sched::Scheduler;
use crate::sync::lock_or_recover;
use crate::watch::{FsCallback, FsObserver, canonical};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    Stopped,
}

/// Keeps deployed processes alive.
///
/// A deployment is a command plus a watched file. The supervisor restarts
/// the command when it terminates on its own (after a backoff delay) and
/// when the watched file changes (after a short delay, backoff reset).
///
/// Threads:
/// - reactor: waits on the inotify and `SIGCHLD` descriptors and turns
///   readiness into [`SupervisorEvent`]s;
/// - handler: drains those events in order and acts on them;
/// - scheduler: runs the delayed redeploys.
///
/// Every thread holds only a `Weak` reference back to the supervisor, so
/// dropping the last `Arc` tears everything down.
pub struct Supervisor {
    config: SupervisorConfig,
    inbox: Arc<EventInbox>,
    reactor: Arc<Reactor>,
    fs: Arc<FsObserver>,
    procs: Arc<ProcessObserver>,
    scheduler: Scheduler,
    backoff: BackoffTable,
    works: Mutex<HashMap<Pid, ManagedWork>>,
    lifecycle: Mutex<Lifecycle>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    self_ref: Weak<Supervisor>,
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Supervisor")
            .field("config", &self.config)
            .field("lifecycle", &*lock_or_recover(&self.lifecycle))
            .field("works", &*lock_or_recover(&self.works))
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    /// Create the queue, reactor, observers and scheduler. Nothing is
    /// dispatched until [`start`](Self::start).
    pub fn new(config: SupervisorConfig) -> Result<Arc<Self>> {
        let inbox = Arc::new(EventInbox::new(config.queue_capacity));

        let fs_inbox = Arc::clone(&inbox);
        let on_path: FsCallback = Arc::new(move |path, mask| {
            fs_inbox.post(SupervisorEvent::PathChanged {
                path: path.to_path_buf(),
                mask,
            });
        });

        let proc_inbox = Arc::clone(&inbox);
        let on_child: ExitCallback = Arc::new(move |pid, snapshot| {
            proc_inbox.post(SupervisorEvent::ChildChanged {
                pid,
                snapshot: snapshot.clone(),
            });
        });

        let reactor = Arc::new(Reactor::new(config.poll_timeout)?);
        let fs = Arc::new(FsObserver::new(on_path)?);
        let procs = Arc::new(ProcessObserver::new(on_child)?);
        let scheduler = Scheduler::new()?;
        let backoff = BackoffTable::new(config.backoff_scope, config.backoff_ceiling);

        Ok(Arc::new_cyclic(|self_ref| Supervisor {
            config,
            inbox,
            reactor,
            fs,
            procs,
            scheduler,
            backoff,
            works: Mutex::new(HashMap::new()),
            lifecycle: Mutex::new(Lifecycle::Created),
            threads: Mutex::new(Vec::new()),
            self_ref: self_ref.clone(),
        }))
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Launch the reactor and handler threads and begin dispatching.
    ///
    /// Idempotent while running. A stopped supervisor cannot be started again.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut lifecycle = lock_or_recover(&self.lifecycle);
        match *lifecycle {
            Lifecycle::Running => return Ok(()),
            Lifecycle::Stopped => {
                return Err(SupervisorError::InvalidArgument(
                    "supervisor was stopped and cannot be restarted".into(),
                ));
            }
            Lifecycle::Created => {}
        }

        self.fs.attach(&self.reactor)?;
        self.procs.attach(&self.reactor)?;

        let mut threads = lock_or_recover(&self.threads);

        let reactor = Arc::clone(&self.reactor);
        let reactor_thread = thread::Builder::new()
            .name("watchdeploy-reactor".into())
            .spawn(move || {
                if let Err(err) = reactor.run() {
                    error!(error = %err, "reactor loop terminated");
                }
            })
            .map_err(|e| SupervisorError::setup("spawn reactor thread", e))?;
        threads.push(reactor_thread);

        let inbox = Arc::clone(&self.inbox);
        let weak = Weak::clone(&self.self_ref);
        let handler_thread = thread::Builder::new()
            .name("watchdeploy-handler".into())
            .spawn(move || handler_loop(&inbox, &weak))
            .map_err(|e| {
                // The reactor is already running; bring it down again.
                self.reactor.stop();
                SupervisorError::setup("spawn handler thread", e)
            })?;
        threads.push(handler_thread);

        self.inbox.open();
        *lifecycle = Lifecycle::Running;
        info!("supervisor started");
        Ok(())
    }

    /// Stop dispatching, end all loops and join their threads.
    ///
    /// Deployed processes keep running; see [`undeploy_all`](Self::undeploy_all).
    pub fn stop(&self) {
        {
            let mut lifecycle = lock_or_recover(&self.lifecycle);
            if *lifecycle != Lifecycle::Running {
                return;
            }
            *lifecycle = Lifecycle::Stopped;
        }

        // Never blocks; this may run on the handler thread via Drop.
        self.inbox.post_shutdown();
        self.reactor.stop();
        self.scheduler.shutdown();

        let handles: Vec<_> = lock_or_recover(&self.threads).drain(..).collect();
        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            let name = handle.thread().name().unwrap_or("<unnamed>").to_string();
            if handle.join().is_err() {
                warn!(thread = %name, "thread panicked");
            }
        }
        info!("supervisor stopped");
    }

    pub fn is_started(&self) -> bool {
        *lock_or_recover(&self.lifecycle) == Lifecycle::Running
    }

    /// Spawn `args` and watch `path` for changes.
    ///
    /// `args[0]` names the executable; it and `path` are canonicalized, so
    /// both must exist. If the watch cannot be added the fresh process is
    /// killed again and the error returned.
    pub fn deploy(&self, args: Vec<String>, path: impl AsRef<Path>) -> Result<Pid> {
        let path = path.as_ref();
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| SupervisorError::InvalidArgument("empty argument vector".into()))?;

        let executable = canonical(program)
            .map_err(|e| SupervisorError::setup(format!("resolve executable {program}"), e))?;
        let path = canonical(path)
            .map_err(|e| SupervisorError::setup(format!("resolve {}", path.display()), e))?;

        // The table stays locked until the entry exists, so an exit event
        // for the new pid cannot be handled before it is known.
        let mut works = lock_or_recover(&self.works);

        let pid = self.procs.spawn_program(&executable, program, rest, &args)?;

        if let Err(err) = self.fs.add_watch(&path, self.config.watch_events) {
            if let Err(kill_err) = self.procs.kill(pid, self.config.kill_signal) {
                warn!(%pid, error = %kill_err, "failed to kill process after watch error");
            }
            return Err(err);
        }

        info!(
            %pid,
            executable = %executable.display(),
            path = %path.display(),
            "deployed"
        );
        works.insert(
            pid,
            ManagedWork {
                pid,
                path,
                executable,
                args,
            },
        );
        Ok(pid)
    }

    /// Kill the process `pid` and drop its watch. Returns `false` if `pid`
    /// is not a deployment.
    ///
    /// Watches are keyed by path; other deployments on the same path lose
    /// their watch too.
    pub fn undeploy(&self, pid: Pid) -> Result<bool> {
        let mut works = lock_or_recover(&self.works);
        let Some(work) = works.get(&pid) else {
            debug!(%pid, "undeploy: unknown pid");
            return Ok(false);
        };

        if !self.procs.kill(pid, self.config.kill_signal)? {
            debug!(%pid, "undeploy: process already gone");
        }
        // Killed: the entry goes even if the watch cannot be dropped.
        let path = work.path.clone();
        works.remove(&pid);
        self.fs.remove_watch(&path)?;
        info!(%pid, "undeployed");
        Ok(true)
    }

    /// Undeploy everything. Stops at the first error.
    pub fn undeploy_all(&self) -> Result<usize> {
        let mut count = 0;
        for pid in self.pids() {
            if self.undeploy(pid)? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Forget `pid` and schedule a fresh deploy of the same work after the
    /// current backoff delay.
    ///
    /// Returns `false` if `pid` is not a deployment or a redeploy for its
    /// path is already pending.
    pub fn redeploy(&self, pid: Pid) -> bool {
        let work = lock_or_recover(&self.works).remove(&pid);
        match work {
            Some(work) => self.schedule_redeploy(work),
            None => {
                debug!(%pid, "redeploy: unknown pid");
                false
            }
        }
    }

    /// Backoff units the next automatic redeploy of `path` will wait, and
    /// advance the counter.
    pub fn next_redeploy_delay(&self, path: impl AsRef<Path>) -> u64 {
        self.backoff.next_delay(path.as_ref())
    }

    pub fn reset_redeploy_delay(&self, path: impl AsRef<Path>) {
        self.backoff.reset(path.as_ref());
    }

    /// Backoff units the next automatic redeploy of `path` would wait.
    pub fn current_backoff(&self, path: impl AsRef<Path>) -> u64 {
        self.backoff.current(path.as_ref())
    }

    /// Whether a redeploy for `path` (canonical) is waiting in the scheduler.
    pub fn has_pending_redeploy(&self, path: impl AsRef<Path>) -> bool {
        self.scheduler.has_schedule(&redeploy_task_name(path.as_ref()))
    }

    pub fn pids(&self) -> Vec<Pid> {
        let mut pids: Vec<_> = lock_or_recover(&self.works).keys().copied().collect();
        pids.sort_by_key(|pid| pid.as_raw());
        pids
    }

    pub fn work(&self, pid: Pid) -> Option<ManagedWork> {
        lock_or_recover(&self.works).get(&pid).cloned()
    }

    /// Deployments watching `path`.
    pub(crate) fn works_on(&self, path: &Path) -> Vec<ManagedWork> {
        lock_or_recover(&self.works)
            .values()
            .filter(|work| work.path == path)
            .cloned()
            .collect()
    }

    /// Queue a deploy of `work` under the name `"redeploy <path>"`.
    pub(crate) fn schedule_redeploy(&self, work: ManagedWork) -> bool {
        let name = redeploy_task_name(&work.path);
        if self.scheduler.has_schedule(&name) {
            debug!(path = %work.path.display(), "redeploy already pending");
            return false;
        }

        let units = self.backoff.next_delay(&work.path);
        let delay = backoff_delay(self.config.backoff_unit, units);
        info!(
            pid = %work.pid,
            path = %work.path.display(),
            delay_ms = delay.as_millis() as u64,
            "redeploy scheduled"
        );

        let weak = Weak::clone(&self.self_ref);
        let ManagedWork { args, path, .. } = work;
        self.scheduler.schedule_named(
            move || {
                let Some(supervisor) = weak.upgrade() else {
                    return;
                };
                if let Err(err) = supervisor.deploy(args.clone(), &path) {
                    error!(path = %path.display(), error = %err, "redeploy failed");
                }
            },
            delay,
            &name,
        );
        true
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.stop();
        match self.undeploy_all() {
            Ok(0) => {}
            Ok(count) => debug!(count, "undeployed remaining processes"),
            Err(err) => warn!(error = %err, "failed to undeploy on drop"),
        }
    }
}

fn redeploy_task_name(path: &Path) -> String {
    format!("redeploy {}", path.display())
}

fn backoff_delay(unit: Duration, units: u64) -> Duration {
    unit.saturating_mul(u32::try_from(units).unwrap_or(u32::MAX))
}

/// Drain the inbox until the poison event arrives or the supervisor is gone.
fn handler_loop(inbox: &EventInbox, supervisor: &Weak<Supervisor>) {
    debug!("handler loop started");
    loop {
        let event = inbox.take();
        if matches!(event, SupervisorEvent::Shutdown) {
            break;
        }
        let Some(supervisor) = supervisor.upgrade() else {
            break;
        };
        if let Err(err) = supervisor.handle_event(event) {
            if err.is_fatal() {
                error!(error = %err, "handler loop terminated");
                let dropped = inbox.close_and_drain();
                debug!(dropped, "discarded queued events");
                break;
            }
            warn!(error = %err, "event handling failed");
        }
    }
    debug!("handler loop exited");
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn backoff_delay_scales_by_unit() {
        assert_eq!(
            backoff_delay(Duration::from_millis(10), 4),
            Duration::from_millis(40)
        );
        assert_eq!(backoff_delay(Duration::from_secs(1), 1), Duration::from_secs(1));
    }

    #[test]
    fn undeploy_forgets_the_process_even_if_the_watch_cannot_be_removed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let conf = dir.path().join("app.conf");
        std::fs::write(&conf, "x").expect("write conf");

        let supervisor = Supervisor::new(SupervisorConfig::default()).expect("supervisor");
        let args = vec!["/bin/sleep".to_string(), "30".to_string()];
        let pid = supervisor.deploy(args, &conf).expect("deploy");

        supervisor.fs.fail_next_removal();
        let err = supervisor.undeploy(pid).expect_err("watch removal fails");
        assert!(matches!(err, SupervisorError::Setup { .. }));

        assert!(supervisor.work(pid).is_none());
        assert!(supervisor.pids().is_empty());
        assert!(!supervisor.undeploy(pid).expect("second undeploy"));
    }

    #[test]
    fn redeploy_task_name_includes_path() {
        let name = redeploy_task_name(&PathBuf::from("/srv/app.conf"));
        assert_eq!(name, "redeploy /srv/app.conf");
    }
}
