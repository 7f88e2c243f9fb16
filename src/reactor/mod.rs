// src/reactor/mod.rs

//! Readiness reactor.
//!
//! A thin layer over `epoll` that maps ready descriptors to callbacks:
//! - [`poller`] owns the epoll instance, the callback table and the loop.
//!
//! The filesystem and process observers each expose one descriptor; the
//! supervisor registers both and runs [`Reactor::run`] on a dedicated thread.

pub mod poller;

pub use poller::{Reactor, ReadyCallback};
