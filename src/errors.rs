// src/errors.rs

//! Crate-wide error type and helpers.
//!
//! Two variants carry the failure taxonomy of the supervisor:
//! - [`SupervisorError::Setup`]: an OS primitive failed while creating or
//!   registering something (epoll, inotify, spawn, kill, ...).
//! - [`SupervisorError::Decode`]: a notification stream could not be read.
//!
//! Both are fatal for the operation (or loop) that hit them. Benign no-op
//! outcomes, such as undeploying an untracked pid, are plain `Ok` values.

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("{op} failed: {source}")]
    Setup {
        op: String,
        #[source]
        source: io::Error,
    },

    #[error("event stream decode failed: {0}")]
    Decode(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),
}

impl SupervisorError {
    /// Wrap an OS-level failure of `op`.
    ///
    /// Accepts anything convertible into `io::Error`, which covers both
    /// `std::io::Error` and `nix::Error`.
    pub fn setup(op: impl Into<String>, err: impl Into<io::Error>) -> Self {
        SupervisorError::Setup {
            op: op.into(),
            source: err.into(),
        }
    }

    /// True for the failures that must terminate the owning loop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SupervisorError::Setup { .. } | SupervisorError::Decode(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
