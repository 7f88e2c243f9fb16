// src/process/mod.rs

//! Child process lifecycle.
//!
//! - [`observer`] spawns children, signals them, and reaps them when the
//!   `SIGCHLD` notification descriptor becomes readable.
//! - [`status`] decodes wait statuses and resource usage into plain values.

pub mod observer;
pub mod status;

pub use observer::{ExitCallback, ProcessObserver};
pub use status::{ExitState, ProcessSnapshot, ResourceUsage};
