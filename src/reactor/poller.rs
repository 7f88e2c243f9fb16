// src/reactor/poller.rs

use std::collections::HashMap;
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};
use tracing::{debug, info, trace};

use crate::errors::{Result, SupervisorError};
use crate::sync::lock_or_recover;

/// Callback invoked on the reactor thread with the ready descriptor and the
/// raw readiness bits. An `Err` stops the loop.
pub type ReadyCallback = Arc<dyn Fn(RawFd, EpollFlags) -> Result<()> + Send + Sync>;

const MAX_EVENTS: usize = 256;

/// Multiplexes readiness notifications across registered descriptors.
///
/// The callback table has its own lock, independent of the wait call, so
/// `register`/`unregister` from other threads never wait for a poll round.
pub struct Reactor {
    epoll: Epoll,
    callbacks: Mutex<HashMap<RawFd, ReadyCallback>>,
    poll_timeout: Duration,
    stopped: AtomicBool,
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor")
            .field("registered", &lock_or_recover(&self.callbacks).len())
            .field("poll_timeout", &self.poll_timeout)
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

impl Reactor {
    /// Create a reactor whose wait returns at least every `poll_timeout`,
    /// so [`stop`](Self::stop) is observed promptly.
    pub fn new(poll_timeout: Duration) -> Result<Self> {
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)
            .map_err(|e| SupervisorError::setup("epoll_create1", e))?;

        Ok(Self {
            epoll,
            callbacks: Mutex::new(HashMap::new()),
            poll_timeout,
            stopped: AtomicBool::new(false),
        })
    }

    /// Arm `fd` for input readiness and route its events to `callback`.
    pub fn register<F: AsFd>(&self, fd: F, callback: ReadyCallback) -> Result<()> {
        let raw = fd.as_fd().as_raw_fd();
        let event = EpollEvent::new(EpollFlags::EPOLLIN, raw as u64);
        self.epoll
            .add(fd.as_fd(), event)
            .map_err(|e| SupervisorError::setup(format!("epoll add fd {raw}"), e))?;

        lock_or_recover(&self.callbacks).insert(raw, callback);
        debug!(fd = raw, "descriptor registered with reactor");
        Ok(())
    }

    /// Disarm `fd` and forget its callback.
    pub fn unregister<F: AsFd>(&self, fd: F) -> Result<()> {
        let raw = fd.as_fd().as_raw_fd();
        self.epoll
            .delete(fd.as_fd())
            .map_err(|e| SupervisorError::setup(format!("epoll delete fd {raw}"), e))?;

        lock_or_recover(&self.callbacks).remove(&raw);
        debug!(fd = raw, "descriptor unregistered from reactor");
        Ok(())
    }

    pub fn callback_for(&self, fd: RawFd) -> Option<ReadyCallback> {
        lock_or_recover(&self.callbacks).get(&fd).cloned()
    }

    /// Ask the loop to exit after its current wait returns.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Poll until [`stop`](Self::stop) is called.
    ///
    /// A failed wait, or a callback returning an error, ends the loop with
    /// that error; there is no recovery at this layer.
    pub fn run(&self) -> Result<()> {
        let timeout_ms = poll_timeout_ms(self.poll_timeout);
        let mut events = vec![EpollEvent::empty(); MAX_EVENTS];

        info!(timeout_ms, "reactor loop started");

        while !self.is_stopped() {
            let nready = match self.epoll.wait(&mut events, EpollTimeout::from(timeout_ms)) {
                Ok(n) => n,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(SupervisorError::setup("epoll_wait", e)),
            };

            for event in &events[..nready] {
                let fd = event.data() as RawFd;
                // Look up outside the dispatch so the table lock is never held
                // while user code runs.
                let Some(callback) = self.callback_for(fd) else {
                    trace!(fd, "readiness on unregistered descriptor; ignoring");
                    continue;
                };
                callback(fd, event.events())?;
            }
        }

        info!("reactor loop stopped");
        Ok(())
    }
}

fn poll_timeout_ms(timeout: Duration) -> u16 {
    timeout.as_millis().clamp(1, u128::from(u16::MAX)) as u16
}
