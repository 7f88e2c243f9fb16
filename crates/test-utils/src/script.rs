use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Builds a `/bin/sh` script for tests to supervise.
///
/// Scripts are run as `/bin/sh <script>` rather than executed directly, so a
/// concurrent fork in another test thread can never hit `ETXTBSY` on a file
/// that was just written.
#[derive(Debug, Clone, Default)]
pub struct ScriptBuilder {
    lines: Vec<String>,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw shell line.
    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.lines.push(line.into());
        self
    }

    /// Append `text` as a line to `log` each time the script starts.
    pub fn log_start(self, log: &Path, text: &str) -> Self {
        self.line(format!("echo '{text}' >> '{}'", log.display()))
    }

    pub fn sleep(self, seconds: u32) -> Self {
        self.line(format!("sleep {seconds}"))
    }

    /// Replace the shell with a long `sleep`, so signals hit the sleeper.
    pub fn sleep_forever(self) -> Self {
        self.line("exec sleep 3600")
    }

    pub fn exit(self, code: i32) -> Self {
        self.line(format!("exit {code}"))
    }

    pub fn render(&self) -> String {
        let mut out = String::from("#!/bin/sh\n");
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    /// Write the script to `dir/name` and return its path.
    pub fn write_to(&self, dir: &Path, name: &str) -> Result<PathBuf> {
        let path = dir.join(name);
        fs::write(&path, self.render())
            .with_context(|| format!("failed to write script {}", path.display()))?;
        Ok(path)
    }

    /// Argument vector that runs the script at `path`.
    pub fn command(path: &Path) -> Vec<String> {
        vec!["/bin/sh".to_string(), path.display().to_string()]
    }
}

/// Append one line to `path`, creating it if needed. Produces a MODIFY event.
pub fn append_line(path: &Path, text: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    writeln!(file, "{text}").with_context(|| format!("failed to append to {}", path.display()))?;
    Ok(())
}

/// Lines of `path`, or none if it does not exist yet.
pub fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .map(|s| s.lines().map(str::to_string).collect())
        .unwrap_or_default()
}
