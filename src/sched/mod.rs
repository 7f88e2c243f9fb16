// src/sched/mod.rs

//! Timer scheduling.
//!
//! - [`scheduler`] owns the time-ordered timeline and the thread that fires it.
//! - [`task`] describes what gets scheduled ([`TaskSpec`]) and how a pending
//!   task tracks its runs.

pub mod scheduler;
pub mod task;

pub use scheduler::Scheduler;
pub use task::{TaskId, TaskSpec};
