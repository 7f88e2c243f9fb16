// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::{Deployment, split_command_line};

/// Name given to the deployment built from `--cmd`/`--watch`.
pub const CLI_DEPLOYMENT: &str = "cli";

/// Command-line arguments for `watchdeploy`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "watchdeploy",
    version,
    about = "Keep a command running; restart it when it exits or its watched file changes.",
    long_about = None
)]
pub struct CliArgs {
    /// Command line to supervise, split on whitespace (e.g. "./server --port 8080").
    #[arg(short = 'c', long = "cmd", value_name = "CMD", requires = "watch")]
    pub cmd: Option<String>,

    /// File whose changes restart the command.
    #[arg(short = 'w', long = "watch", value_name = "PATH", requires = "cmd")]
    pub watch: Option<PathBuf>,

    /// Optional config file (TOML) with `[supervisor]` and `[deploy.<name>]` sections.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `WATCHDEPLOY_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Validate the configuration and print the deployments without running them.
    #[arg(long)]
    pub dry_run: bool,
}

impl CliArgs {
    /// The deployment described by `--cmd`/`--watch`, if given.
    pub fn deployment(&self) -> Option<Deployment> {
        match (&self.cmd, &self.watch) {
            (Some(cmd), Some(watch)) => Some(Deployment {
                name: CLI_DEPLOYMENT.to_string(),
                args: split_command_line(cmd),
                watch: watch.clone(),
            }),
            _ => None,
        }
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
