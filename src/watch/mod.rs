// src/watch/mod.rs

//! Filesystem change observation.
//!
//! This module is responsible for:
//! - Normalising inotify bits into a semantic [`EventMask`] and back.
//! - Keeping one subscription per watched path ([`FsObserver`]).
//! - Rebuilding full paths from a watch root and a record's relative name.
//!
//! It does **not** know about processes; it only turns kernel change records
//! into `(path, mask)` callbacks.

pub mod mask;
pub mod observer;
pub mod path_utils;

pub use mask::EventMask;
pub use observer::{FsCallback, FsObserver};
pub use path_utils::{canonical, join_event_path};
