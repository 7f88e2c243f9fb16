// tests/scheduler.rs

mod common;
use crate::common::{SETTLE, init_tracing, wait_until};

use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use watchdeploy::sched::{Scheduler, TaskSpec};

type TestResult = Result<(), Box<dyn Error>>;

fn log() -> Arc<Mutex<Vec<&'static str>>> {
    Arc::new(Mutex::new(Vec::new()))
}

fn pusher(log: &Arc<Mutex<Vec<&'static str>>>, label: &'static str) -> impl FnMut() + Send + 'static {
    let log = Arc::clone(log);
    move || log.lock().unwrap_or_else(|e| e.into_inner()).push(label)
}

fn entries(log: &Arc<Mutex<Vec<&'static str>>>) -> Vec<&'static str> {
    log.lock().unwrap_or_else(|e| e.into_inner()).clone()
}

#[test]
fn tasks_fire_in_due_order() -> TestResult {
    init_tracing();

    let scheduler = Scheduler::new()?;
    let fired = log();

    scheduler.schedule(pusher(&fired, "late"), Duration::from_millis(150));
    scheduler.schedule(pusher(&fired, "early"), Duration::from_millis(30));
    scheduler.schedule(pusher(&fired, "middle"), Duration::from_millis(90));

    assert!(wait_until(SETTLE, || entries(&fired).len() == 3));
    assert_eq!(entries(&fired), vec!["early", "middle", "late"]);
    assert_eq!(scheduler.pending(), 0);
    Ok(())
}

#[test]
fn a_sooner_task_wakes_a_sleeping_scheduler() -> TestResult {
    init_tracing();

    let scheduler = Scheduler::new()?;
    let fired = log();

    scheduler.schedule(pusher(&fired, "far"), Duration::from_secs(30));
    // Give the worker time to start its long wait.
    thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    scheduler.schedule(pusher(&fired, "near"), Duration::from_millis(20));
    assert!(wait_until(SETTLE, || entries(&fired) == vec!["near"]));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(scheduler.pending(), 1);
    Ok(())
}

#[test]
fn tasks_due_at_the_same_millisecond_fire_newest_first() -> TestResult {
    init_tracing();

    let scheduler = Scheduler::new()?;
    let fired = log();

    let due = scheduler.now_ms() + 100;
    scheduler.schedule_at(pusher(&fired, "first"), due);
    scheduler.schedule_at(pusher(&fired, "second"), due);
    scheduler.schedule_at(pusher(&fired, "third"), due);
    assert_eq!(scheduler.pending(), 3);

    assert!(wait_until(SETTLE, || entries(&fired).len() == 3));
    assert_eq!(entries(&fired), vec!["third", "second", "first"]);
    Ok(())
}

#[test]
fn named_task_is_visible_until_it_fires() -> TestResult {
    init_tracing();

    let scheduler = Scheduler::new()?;
    let fired = log();

    assert!(!scheduler.has_schedule("redeploy /srv/app.conf"));
    scheduler.schedule_named(
        pusher(&fired, "named"),
        Duration::from_millis(80),
        "redeploy /srv/app.conf",
    );
    assert!(scheduler.has_schedule("redeploy /srv/app.conf"));
    assert!(!scheduler.has_schedule("redeploy /srv/other.conf"));

    assert!(wait_until(SETTLE, || entries(&fired).len() == 1));
    assert!(wait_until(SETTLE, || !scheduler.has_schedule("redeploy /srv/app.conf")));
    Ok(())
}

#[test]
fn empty_name_is_not_registered() -> TestResult {
    init_tracing();

    let scheduler = Scheduler::new()?;
    scheduler.schedule_named(|| {}, Duration::from_secs(30), "");
    assert!(!scheduler.has_schedule(""));
    assert_eq!(scheduler.pending(), 1);
    Ok(())
}

#[test]
fn repeating_task_fires_until_shutdown() -> TestResult {
    init_tracing();

    let scheduler = Scheduler::new()?;
    let count = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&count);
    scheduler.schedule_repeating(
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
        },
        Duration::from_millis(10),
        Duration::from_millis(20),
    );

    assert!(wait_until(SETTLE, || count.load(Ordering::SeqCst) >= 3));
    assert_eq!(scheduler.pending(), 1, "a repeating task is re-queued");

    scheduler.shutdown();
    let after = count.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(count.load(Ordering::SeqCst), after);
    assert!(!scheduler.is_running());
    Ok(())
}

#[test]
fn shutdown_discards_pending_tasks_without_running_them() -> TestResult {
    init_tracing();

    let scheduler = Scheduler::new()?;
    let fired = log();

    scheduler.schedule_task(
        TaskSpec::new(pusher(&fired, "never"))
            .delay(Duration::from_millis(100))
            .named("pending"),
    );
    scheduler.shutdown();

    assert_eq!(scheduler.pending(), 0);
    assert!(!scheduler.has_schedule("pending"));

    // Scheduling after shutdown is silently dropped.
    scheduler.schedule(pusher(&fired, "late"), Duration::ZERO);
    thread::sleep(Duration::from_millis(200));
    assert!(entries(&fired).is_empty());
    Ok(())
}

#[test]
fn a_panicking_task_does_not_stop_the_scheduler() -> TestResult {
    init_tracing();

    let scheduler = Scheduler::new()?;
    let fired = log();

    scheduler.schedule(|| panic!("task failure"), Duration::from_millis(10));
    scheduler.schedule(pusher(&fired, "after"), Duration::from_millis(60));

    assert!(wait_until(SETTLE, || entries(&fired) == vec!["after"]));
    assert!(scheduler.is_running());
    Ok(())
}

#[test]
fn a_task_may_schedule_another_task() -> TestResult {
    init_tracing();

    let scheduler = Arc::new(Scheduler::new()?);
    let fired = log();

    let inner_sched = Arc::downgrade(&scheduler);
    let inner_log = Arc::clone(&fired);
    scheduler.schedule(
        move || {
            if let Some(sched) = inner_sched.upgrade() {
                sched.schedule(pusher(&inner_log, "chained"), Duration::from_millis(10));
            }
        },
        Duration::from_millis(10),
    );

    assert!(wait_until(SETTLE, || entries(&fired) == vec!["chained"]));
    Ok(())
}
