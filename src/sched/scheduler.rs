// src/sched/scheduler.rs

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::errors::{Result, SupervisorError};
use crate::sched::task::{ScheduledTask, TaskId, TaskSpec, duration_ms};
use crate::sync::{lock_or_recover, wait_or_recover, wait_timeout_or_recover};

/// Mutable scheduler state, all behind one lock.
struct State {
    running: bool,
    /// Due time (ms on the scheduler clock) -> tasks due at that instant, in
    /// arrival order. Firing walks each chain newest-first.
    timeline: BTreeMap<u64, Vec<ScheduledTask>>,
    /// name -> id of the task that last claimed it.
    names: HashMap<String, TaskId>,
    next_id: u64,
}

impl State {
    fn insert(&mut self, due: u64, task: ScheduledTask) {
        if let Some(name) = &task.name {
            self.names.insert(name.clone(), task.id);
        }
        self.timeline.entry(due).or_default().push(task);
    }

    fn pending(&self) -> usize {
        self.timeline.values().map(Vec::len).sum()
    }
}

struct Inner {
    state: Mutex<State>,
    wakeup: Condvar,
    epoch: Instant,
}

impl Inner {
    fn now_ms(&self) -> u64 {
        duration_ms(self.epoch.elapsed())
    }
}

/// Time-ordered runner for one-shot and repeating callbacks.
///
/// A dedicated thread waits for the earliest due time. The wait is
/// interruptible: inserting a task that is due sooner wakes the thread, so
/// it never oversleeps a newer, earlier deadline.
///
/// Tasks due at the same millisecond are kept together and run newest
/// first. Named tasks can be probed with [`has_schedule`](Self::has_schedule)
/// to avoid scheduling the same work twice; the scheduler itself does not
/// reject duplicates.
pub struct Scheduler {
    inner: Arc<Inner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock_or_recover(&self.inner.state);
        f.debug_struct("Scheduler")
            .field("running", &state.running)
            .field("pending", &state.pending())
            .field("names", &state.names.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Scheduler {
    /// Start the scheduler thread.
    pub fn new() -> Result<Self> {
        let inner = Arc::new(Inner {
            state: Mutex::new(State {
                running: true,
                timeline: BTreeMap::new(),
                names: HashMap::new(),
                next_id: 0,
            }),
            wakeup: Condvar::new(),
            epoch: Instant::now(),
        });

        let worker_inner = Arc::clone(&inner);
        let worker = thread::Builder::new()
            .name("watchdeploy-sched".to_string())
            .spawn(move || run(worker_inner))
            .map_err(|e| SupervisorError::setup("spawn scheduler thread", e))?;

        Ok(Self {
            inner,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Run `callback` once after `delay`.
    pub fn schedule<F>(&self, callback: F, delay: Duration) -> TaskId
    where
        F: FnMut() + Send + 'static,
    {
        self.schedule_task(TaskSpec::new(callback).delay(delay))
    }

    /// Run `callback` after `delay`, then every `interval`.
    pub fn schedule_repeating<F>(&self, callback: F, delay: Duration, interval: Duration) -> TaskId
    where
        F: FnMut() + Send + 'static,
    {
        self.schedule_task(TaskSpec::new(callback).delay(delay).every(interval))
    }

    /// Run `callback` once after `delay` under the deduplication key `name`.
    pub fn schedule_named<F>(&self, callback: F, delay: Duration, name: &str) -> TaskId
    where
        F: FnMut() + Send + 'static,
    {
        self.schedule_task(TaskSpec::new(callback).delay(delay).named(name))
    }

    pub fn schedule_task(&self, spec: TaskSpec) -> TaskId {
        let now = self.inner.now_ms();
        let mut state = lock_or_recover(&self.inner.state);
        let id = TaskId(state.next_id);
        state.next_id += 1;

        let task = ScheduledTask::new(id, spec);
        let due = task.next_fire_at(now);
        self.insert_locked(&mut state, due, task);
        id
    }

    /// Run a one-shot `callback` at the absolute time `due_ms` on this
    /// scheduler's clock (see [`now_ms`](Self::now_ms)).
    pub fn schedule_at<F>(&self, callback: F, due_ms: u64) -> TaskId
    where
        F: FnMut() + Send + 'static,
    {
        let mut state = lock_or_recover(&self.inner.state);
        let id = TaskId(state.next_id);
        state.next_id += 1;

        self.insert_locked(&mut state, due_ms, ScheduledTask::new(id, TaskSpec::new(callback)));
        id
    }

    fn insert_locked(&self, state: &mut State, due: u64, task: ScheduledTask) {
        if !state.running {
            debug!(task = ?task.id, "scheduler shut down; dropping task");
            return;
        }
        trace!(task = ?task.id, name = ?task.name, due, "task scheduled");
        state.insert(due, task);
        self.inner.wakeup.notify_one();
    }

    /// True while a task registered under `name` is waiting to fire.
    pub fn has_schedule(&self, name: &str) -> bool {
        lock_or_recover(&self.inner.state).names.contains_key(name)
    }

    /// Number of tasks waiting to fire.
    pub fn pending(&self) -> usize {
        lock_or_recover(&self.inner.state).pending()
    }

    /// Milliseconds elapsed on the scheduler clock.
    pub fn now_ms(&self) -> u64 {
        self.inner.now_ms()
    }

    pub fn is_running(&self) -> bool {
        lock_or_recover(&self.inner.state).running
    }

    /// Drop every pending task without running it and join the thread.
    pub fn shutdown(&self) {
        {
            let mut state = lock_or_recover(&self.inner.state);
            if state.running {
                info!(discarded = state.pending(), "scheduler shutting down");
            }
            state.running = false;
            state.timeline.clear();
            state.names.clear();
            self.inner.wakeup.notify_all();
        }

        let worker = lock_or_recover(&self.worker).take();
        if let Some(worker) = worker {
            // A task may shut the scheduler down from its own thread.
            if worker.thread().id() == thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                warn!("scheduler thread panicked");
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(inner: Arc<Inner>) {
    let mut state = lock_or_recover(&inner.state);
    loop {
        if !state.running {
            break;
        }

        let Some(&due) = state.timeline.keys().next() else {
            state = wait_or_recover(&inner.wakeup, state);
            continue;
        };

        let now = inner.now_ms();
        if due > now {
            let sleep = Duration::from_millis(due - now);
            state = wait_timeout_or_recover(&inner.wakeup, state, sleep);
            continue;
        }

        let Some((_, mut chain)) = state.timeline.pop_first() else {
            continue;
        };
        for task in &chain {
            if let Some(name) = &task.name {
                if state.names.get(name) == Some(&task.id) {
                    state.names.remove(name);
                }
            }
        }
        drop(state);

        for task in chain.iter_mut().rev() {
            trace!(task = ?task.id, name = ?task.name, due, "firing task");
            task.fire();
        }

        state = lock_or_recover(&inner.state);
        if !state.running {
            break;
        }
        let now = inner.now_ms();
        for task in chain.into_iter().filter(ScheduledTask::is_valid) {
            let due = task.next_fire_at(now);
            trace!(task = ?task.id, fired = task.fire_count(), due, "rescheduling task");
            state.insert(due, task);
        }
    }
    debug!("scheduler thread exiting");
}
