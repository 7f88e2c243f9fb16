// src/config/mod.rs

//! Configuration loading and validation for watchdeploy.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate ranges, signal and event names, deployments (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, load_from_str, load_optional};
pub use model::{
    CommandLine, ConfigFile, DeploySection, Deployment, RawConfigFile, SupervisorConfig,
    SupervisorSection, split_command_line,
};
pub use validate::{parse_signal, validate_deployment};
