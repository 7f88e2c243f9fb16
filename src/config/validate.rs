// src/config/validate.rs

use std::str::FromStr;
use std::time::Duration;

use nix::sys::signal::Signal;

use crate::config::model::{
    ConfigFile, Deployment, RawConfigFile, SupervisorConfig, SupervisorSection,
};
use crate::errors::{Result, SupervisorError};
use crate::watch::EventMask;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::SupervisorError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let supervisor = validate_supervisor(&raw.supervisor)?;
        let deployments = raw
            .deploy
            .iter()
            .map(|(name, section)| {
                validate_deployment(Deployment {
                    name: name.clone(),
                    args: section.cmd.to_args(),
                    watch: section.watch.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ConfigFile::new_unchecked(supervisor, deployments))
    }
}

fn validate_supervisor(section: &SupervisorSection) -> Result<SupervisorConfig> {
    if section.queue_capacity == 0 {
        return Err(SupervisorError::ConfigError(
            "[supervisor].queue_capacity must be >= 1 (got 0)".to_string(),
        ));
    }

    if section.poll_timeout_ms == 0 || section.poll_timeout_ms > u64::from(u16::MAX) {
        return Err(SupervisorError::ConfigError(format!(
            "[supervisor].poll_timeout_ms must be within 1..={} (got {})",
            u16::MAX,
            section.poll_timeout_ms
        )));
    }

    if section.backoff_ceiling == 0 {
        return Err(SupervisorError::ConfigError(
            "[supervisor].backoff_ceiling must be >= 1 (got 0)".to_string(),
        ));
    }

    if section.backoff_unit_ms == 0 {
        return Err(SupervisorError::ConfigError(
            "[supervisor].backoff_unit_ms must be >= 1 (got 0)".to_string(),
        ));
    }

    let kill_signal = parse_signal(&section.kill_signal)?;
    let watch_events = parse_watch_events(&section.watch_events)?;

    Ok(SupervisorConfig {
        queue_capacity: section.queue_capacity,
        poll_timeout: Duration::from_millis(section.poll_timeout_ms),
        backoff_ceiling: section.backoff_ceiling,
        backoff_unit: Duration::from_millis(section.backoff_unit_ms),
        backoff_scope: section.backoff_scope,
        kill_signal,
        watch_events,
    })
}

/// Accepts `"SIGTERM"`, `"TERM"` or `"term"`.
pub fn parse_signal(name: &str) -> Result<Signal> {
    let upper = name.trim().to_uppercase();
    let full = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{upper}")
    };
    Signal::from_str(&full).map_err(|_| {
        SupervisorError::ConfigError(format!("[supervisor].kill_signal: unknown signal {name:?}"))
    })
}

fn parse_watch_events(names: &[String]) -> Result<EventMask> {
    let mut mask = EventMask::EMPTY;
    for name in names {
        mask |= EventMask::from_str(name)
            .map_err(|e| SupervisorError::ConfigError(format!("[supervisor].watch_events: {e}")))?;
    }
    if mask.is_empty() {
        return Err(SupervisorError::ConfigError(
            "[supervisor].watch_events must name at least one event".to_string(),
        ));
    }
    Ok(mask)
}

/// Check a single deployment, whether it came from the file or the CLI.
pub fn validate_deployment(deployment: Deployment) -> Result<Deployment> {
    if deployment.args.is_empty() {
        return Err(SupervisorError::ConfigError(format!(
            "deployment '{}' has an empty command",
            deployment.name
        )));
    }
    if deployment.watch.as_os_str().is_empty() {
        return Err(SupervisorError::ConfigError(format!(
            "deployment '{}' has an empty watch path",
            deployment.name
        )));
    }
    Ok(deployment)
}

impl ConfigFile {
    /// Append a deployment given on the command line, validating it first.
    pub fn push_deployment(&mut self, deployment: Deployment) -> Result<()> {
        let deployment = validate_deployment(deployment)?;
        if self.deployments.iter().any(|d| d.name == deployment.name) {
            return Err(SupervisorError::ConfigError(format!(
                "duplicate deployment name '{}'",
                deployment.name
            )));
        }
        self.deployments.push(deployment);
        Ok(())
    }

    /// Fail unless there is something to supervise.
    pub fn require_deployments(&self) -> Result<()> {
        if self.deployments.is_empty() {
            return Err(SupervisorError::ConfigError(
                "nothing to deploy: pass --cmd and --watch, or add a [deploy.<name>] section"
                    .to_string(),
            ));
        }
        Ok(())
    }
}
