// src/process/observer.rs

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Command;
use std::sync::{Arc, Mutex};

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use signal_hook::consts::SIGCHLD;
use signal_hook::SigId;
use tracing::{debug, info, trace, warn};

use crate::errors::{Result, SupervisorError};
use crate::process::status::{ExitState, ProcessSnapshot, ResourceUsage};
use crate::reactor::Reactor;
use crate::sync::lock_or_recover;

/// Callback invoked with a child's pid and a snapshot of its new status.
pub type ExitCallback = Arc<dyn Fn(Pid, &ProcessSnapshot) + Send + Sync>;

/// Per-child bookkeeping.
#[derive(Debug, Clone)]
struct ChildRecord {
    args: Vec<String>,
}

/// Spawns children and reports their status changes.
///
/// `SIGCHLD` is turned into bytes on a socket pair (the write end is owned by
/// the signal handler), so the read end can be multiplexed like any other
/// descriptor and handler logic never runs in signal context.
pub struct ProcessObserver {
    notify_rx: UnixStream,
    sig_id: SigId,
    on_change: ExitCallback,
    children: Mutex<HashMap<Pid, ChildRecord>>,
}

impl fmt::Debug for ProcessObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessObserver")
            .field("children", &self.tracked())
            .finish_non_exhaustive()
    }
}

impl ProcessObserver {
    pub fn new(on_change: ExitCallback) -> Result<Self> {
        let (notify_rx, notify_tx) =
            UnixStream::pair().map_err(|e| SupervisorError::setup("socketpair", e))?;
        notify_rx
            .set_nonblocking(true)
            .map_err(|e| SupervisorError::setup("set_nonblocking", e))?;
        let sig_id = signal_hook::low_level::pipe::register(SIGCHLD, notify_tx)
            .map_err(|e| SupervisorError::setup("register SIGCHLD handler", e))?;

        Ok(Self {
            notify_rx,
            sig_id,
            on_change,
            children: Mutex::new(HashMap::new()),
        })
    }

    /// Descriptor that becomes readable after a `SIGCHLD`.
    pub fn descriptor(&self) -> BorrowedFd<'_> {
        self.notify_rx.as_fd()
    }

    /// Register this observer's descriptor with `reactor`.
    pub fn attach(self: &Arc<Self>, reactor: &Reactor) -> Result<()> {
        let observer = Arc::clone(self);
        reactor.register(self.descriptor(), Arc::new(move |_fd, _flags| observer.on_ready()))
    }

    /// Launch `args[0]` with the remaining arguments and start tracking it.
    ///
    /// `args[0]` is both the program and the child's `argv[0]`.
    pub fn spawn(&self, args: &[String]) -> Result<Pid> {
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| SupervisorError::InvalidArgument("empty argument vector".into()))?;
        self.spawn_program(Path::new(program), args[0].as_str(), rest, args)
    }

    /// Launch `program`, presenting `argv0` to the child, and record `args`
    /// as its launch spec.
    pub fn spawn_program(
        &self,
        program: &Path,
        argv0: &str,
        rest: &[String],
        args: &[String],
    ) -> Result<Pid> {
        // Hold the table across the spawn so an immediate exit cannot be
        // reaped before the child is tracked.
        let mut children = lock_or_recover(&self.children);

        let child = Command::new(program)
            .arg0(argv0)
            .args(rest)
            .spawn()
            .map_err(|e| SupervisorError::setup(format!("spawn {}", program.display()), e))?;

        let pid = Pid::from_raw(child.id() as i32);
        // `Child` does not reap on drop; the observer does.
        drop(child);

        children.insert(
            pid,
            ChildRecord {
                args: args.to_vec(),
            },
        );
        info!(%pid, program = %program.display(), "process spawned");
        Ok(pid)
    }

    /// Send `signal` to a tracked child. Returns `false` if `pid` is not
    /// tracked (never spawned here, or already reaped).
    pub fn kill(&self, pid: Pid, signal: Signal) -> Result<bool> {
        let children = lock_or_recover(&self.children);
        if !children.contains_key(&pid) {
            return Ok(false);
        }
        kill(pid, signal).map_err(|e| SupervisorError::setup(format!("kill {pid}"), e))?;
        debug!(%pid, signal = signal.as_str(), "signal sent");
        Ok(true)
    }

    pub fn is_tracked(&self, pid: Pid) -> bool {
        lock_or_recover(&self.children).contains_key(&pid)
    }

    pub fn tracked(&self) -> Vec<Pid> {
        lock_or_recover(&self.children).keys().copied().collect()
    }

    /// Args recorded for `pid` at spawn time.
    pub fn args_of(&self, pid: Pid) -> Option<Vec<String>> {
        lock_or_recover(&self.children)
            .get(&pid)
            .map(|record| record.args.clone())
    }

    /// Drain the notification channel, reap every tracked child whose status
    /// changed, then report each change with the table lock released.
    pub fn on_ready(&self) -> Result<()> {
        if !self.drain_notifications()? {
            return Ok(());
        }

        let mut changes = Vec::new();
        {
            let mut children = lock_or_recover(&self.children);
            let pids: Vec<Pid> = children.keys().copied().collect();
            for pid in pids {
                let (state, raw_status, usage) = match reap(pid)? {
                    Reaped::Unchanged => continue,
                    Reaped::Changed(state, raw_status, usage) => (state, raw_status, usage),
                    Reaped::Gone => {
                        warn!(%pid, "child was reaped elsewhere; no longer tracked");
                        children.remove(&pid);
                        continue;
                    }
                };
                let args = if state.is_terminated() {
                    children.remove(&pid).map(|r| r.args)
                } else {
                    children.get(&pid).map(|r| r.args.clone())
                };
                changes.push((
                    pid,
                    ProcessSnapshot {
                        state,
                        raw_status,
                        usage,
                        args: args.unwrap_or_default(),
                    },
                ));
            }
        }

        for (pid, snapshot) in changes {
            info!(%pid, raw_status = snapshot.raw_status, "child status changed: {}", snapshot.state);
            (self.on_change)(pid, &snapshot);
        }
        Ok(())
    }

    /// Returns whether at least one notification was pending.
    fn drain_notifications(&self) -> Result<bool> {
        let mut buf = [0u8; 64];
        let mut pending = false;
        loop {
            match (&self.notify_rx).read(&mut buf) {
                Ok(0) => {
                    return Err(SupervisorError::Decode(
                        "SIGCHLD notification channel closed".to_string(),
                    ));
                }
                Ok(_) => pending = true,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(pending),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(SupervisorError::Decode(format!(
                        "reading SIGCHLD notifications: {e}"
                    )));
                }
            }
        }
    }
}

impl Drop for ProcessObserver {
    fn drop(&mut self) {
        signal_hook::low_level::unregister(self.sig_id);
    }
}

enum Reaped {
    Unchanged,
    Changed(ExitState, i32, ResourceUsage),
    /// Somebody else already collected the child.
    Gone,
}

/// Non-blocking `wait4` on one child.
fn reap(pid: Pid) -> Result<Reaped> {
    let mut status: libc::c_int = 0;
    // SAFETY: rusage is plain old data; an all-zero value is valid.
    let mut rusage: libc::rusage = unsafe { std::mem::zeroed() };
    let flags = libc::WNOHANG | libc::WUNTRACED | libc::WCONTINUED;

    loop {
        // SAFETY: both out-pointers are valid for the duration of the call.
        let ret = unsafe { libc::wait4(pid.as_raw(), &mut status, flags, &mut rusage) };
        if ret == 0 {
            return Ok(Reaped::Unchanged);
        }
        if ret > 0 {
            let decoded = WaitStatus::from_raw(pid, status)
                .map_err(|e| SupervisorError::Decode(format!("wait status {status:#x}: {e}")))?;
            return Ok(match ExitState::from_wait_status(decoded) {
                Some(state) => Reaped::Changed(state, status, ResourceUsage::from(&rusage)),
                None => {
                    trace!(%pid, ?decoded, "ignoring non-lifecycle wait status");
                    Reaped::Unchanged
                }
            });
        }
        match Errno::last() {
            Errno::EINTR => continue,
            Errno::ECHILD => return Ok(Reaped::Gone),
            e => return Err(SupervisorError::setup(format!("wait4 {pid}"), e)),
        }
    }
}
