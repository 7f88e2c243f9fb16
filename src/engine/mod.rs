// src/engine/mod.rs

//! Orchestration engine for watchdeploy.
//!
//! This module ties together:
//! - the work queue between the reactor thread and the handler thread
//! - the backoff policy for automatic redeploys
//! - the [`Supervisor`], which owns the deployed processes and reacts to:
//!   - child status changes
//!   - watched file changes
//!   - shutdown
//!
//! Event decoding happens on the reactor thread; everything that mutates
//! deployments runs on the handler thread (or, for delayed redeploys, on the
//! scheduler thread) under the supervisor's own lock.

use std::path::PathBuf;

use nix::unistd::Pid;

use crate::process::ProcessSnapshot;
use crate::watch::EventMask;

/// A supervised process and what it takes to start it again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedWork {
    /// Valid only while the process runs.
    pub pid: Pid,
    /// Canonical path of the watched file.
    pub path: PathBuf,
    /// Canonical path of the executable.
    pub executable: PathBuf,
    /// Full argument vector, `args[0]` as given by the caller.
    pub args: Vec<String>,
}

/// Events flowing from the observers to the handler thread.
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    /// A child changed state (exited, was killed, stopped or continued).
    ChildChanged { pid: Pid, snapshot: ProcessSnapshot },
    /// A watched path changed.
    PathChanged { path: PathBuf, mask: EventMask },
    /// Terminates the handler loop.
    Shutdown,
}

pub mod backoff;
pub mod event_handlers;
pub mod inbox;
pub mod queue;
pub mod supervisor;

pub use backoff::{Backoff, BackoffTable, DEFAULT_BACKOFF_CEILING};
pub use inbox::EventInbox;
pub use queue::BlockingQueue;
pub use supervisor::Supervisor;
