// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use nix::sys::signal::Signal;
use serde::Deserialize;

use crate::types::BackoffScope;
use crate::watch::EventMask;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [supervisor]
/// backoff_ceiling = 64
/// backoff_scope = "global"
///
/// [deploy.web]
/// cmd = ["./server", "--port", "8080"]
/// watch = "./server"
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    /// Engine tuning from `[supervisor]`.
    #[serde(default)]
    pub supervisor: SupervisorSection,

    /// Deployments from `[deploy.<name>]`, keyed by name.
    #[serde(default)]
    pub deploy: BTreeMap<String, DeploySection>,
}

/// `[supervisor]` section, as written.
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorSection {
    /// Capacity of the work queue between the reactor and the handler.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Upper bound on a single reactor wait, in milliseconds.
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Largest backoff value (in units) before the counter wraps back to 1.
    #[serde(default = "default_backoff_ceiling")]
    pub backoff_ceiling: u64,

    /// Length of one backoff unit in milliseconds (a second by default).
    #[serde(default = "default_backoff_unit_ms")]
    pub backoff_unit_ms: u64,

    #[serde(default)]
    pub backoff_scope: BackoffScope,

    /// Signal sent when a deployment is torn down, e.g. `"SIGTERM"`.
    #[serde(default = "default_kill_signal")]
    pub kill_signal: String,

    /// Events that count as "the watched file changed".
    #[serde(default = "default_watch_events")]
    pub watch_events: Vec<String>,
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_poll_timeout_ms() -> u64 {
    1000
}

fn default_backoff_ceiling() -> u64 {
    64
}

fn default_backoff_unit_ms() -> u64 {
    1000
}

fn default_kill_signal() -> String {
    "SIGTERM".to_string()
}

fn default_watch_events() -> Vec<String> {
    vec!["attrib".to_string(), "modify".to_string()]
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            poll_timeout_ms: default_poll_timeout_ms(),
            backoff_ceiling: default_backoff_ceiling(),
            backoff_unit_ms: default_backoff_unit_ms(),
            backoff_scope: BackoffScope::default(),
            kill_signal: default_kill_signal(),
            watch_events: default_watch_events(),
        }
    }
}

/// `[deploy.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct DeploySection {
    /// Either an argv array or a single command line split on whitespace.
    pub cmd: CommandLine,

    /// File whose changes restart the command.
    pub watch: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CommandLine {
    Line(String),
    Args(Vec<String>),
}

impl CommandLine {
    pub fn to_args(&self) -> Vec<String> {
        match self {
            CommandLine::Line(line) => split_command_line(line),
            CommandLine::Args(args) => args.clone(),
        }
    }
}

/// Split a command line on whitespace. No quoting rules apply.
pub fn split_command_line(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_string).collect()
}

/// Validated engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub queue_capacity: usize,
    pub poll_timeout: Duration,
    pub backoff_ceiling: u64,
    pub backoff_unit: Duration,
    pub backoff_scope: BackoffScope,
    pub kill_signal: Signal,
    pub watch_events: EventMask,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            poll_timeout: Duration::from_millis(default_poll_timeout_ms()),
            backoff_ceiling: default_backoff_ceiling(),
            backoff_unit: Duration::from_millis(default_backoff_unit_ms()),
            backoff_scope: BackoffScope::Global,
            kill_signal: Signal::SIGTERM,
            watch_events: EventMask::ATTRIB | EventMask::MODIFY,
        }
    }
}

/// One command to keep running, and the file that restarts it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub name: String,
    pub args: Vec<String>,
    pub watch: PathBuf,
}

/// Validated configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    pub supervisor: SupervisorConfig,
    pub deployments: Vec<Deployment>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(supervisor: SupervisorConfig, deployments: Vec<Deployment>) -> Self {
        Self {
            supervisor,
            deployments,
        }
    }
}
