// src/sched/task.rs

//! Scheduled task metadata.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use tracing::error;

/// Opaque identifier handed out by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

pub type TaskFn = Box<dyn FnMut() + Send + 'static>;

/// What to schedule: a callback plus its timing and optional name.
///
/// ```ignore
/// let spec = TaskSpec::new(|| println!("tick"))
///     .delay(Duration::from_millis(500))
///     .every(Duration::from_millis(100))
///     .named("ticker");
/// ```
pub struct TaskSpec {
    pub(crate) callback: TaskFn,
    pub(crate) delay: Duration,
    pub(crate) interval: Duration,
    pub(crate) name: Option<String>,
}

impl TaskSpec {
    pub fn new<F>(callback: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        Self {
            callback: Box::new(callback),
            delay: Duration::ZERO,
            interval: Duration::ZERO,
            name: None,
        }
    }

    /// Time before the first run.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Repeat period. A zero interval means one-shot.
    pub fn every(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Deduplication key. An empty name is the same as no name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.name = (!name.is_empty()).then_some(name);
        self
    }
}

impl fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("delay", &self.delay)
            .field("interval", &self.interval)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A pending task inside the scheduler's timeline.
pub(crate) struct ScheduledTask {
    pub(crate) id: TaskId,
    callback: Option<TaskFn>,
    delay: Duration,
    interval: Duration,
    pub(crate) name: Option<String>,
    fire_count: u64,
}

impl ScheduledTask {
    pub(crate) fn new(id: TaskId, spec: TaskSpec) -> Self {
        Self {
            id,
            callback: Some(spec.callback),
            delay: spec.delay,
            interval: spec.interval,
            name: spec.name,
            fire_count: 0,
        }
    }

    pub(crate) fn is_repeating(&self) -> bool {
        !self.interval.is_zero()
    }

    /// Repeating tasks stay valid forever; one-shot tasks until they fire.
    pub(crate) fn is_valid(&self) -> bool {
        self.callback.is_some()
    }

    pub(crate) fn fire_count(&self) -> u64 {
        self.fire_count
    }

    /// Absolute due time (ms on the scheduler clock) for the next run,
    /// measured from `now_ms`.
    pub(crate) fn next_fire_at(&self, now_ms: u64) -> u64 {
        let wait = if self.fire_count == 0 {
            self.delay
        } else {
            self.interval
        };
        now_ms.saturating_add(duration_ms(wait))
    }

    /// Run the callback once. A panicking callback is logged and the task
    /// is invalidated.
    pub(crate) fn fire(&mut self) {
        let Some(callback) = self.callback.as_mut() else {
            return;
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback()));
        self.fire_count += 1;

        if outcome.is_err() {
            error!(task = ?self.id, name = ?self.name, "scheduled task panicked; dropping it");
            self.callback = None;
        } else if !self.is_repeating() {
            self.callback = None;
        }
    }
}

pub(crate) fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
