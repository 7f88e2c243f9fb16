// src/process/status.rs

//! Decoded child status and resource usage.

use std::fmt;
use std::time::Duration;

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;

/// What happened to a child, as reported by `wait4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitState {
    /// Exited normally with a code.
    Exited(i32),
    /// Killed by a signal.
    Signaled { signal: Signal, core_dumped: bool },
    /// Stopped by a signal; still alive.
    Stopped(Signal),
    /// Resumed by `SIGCONT`; still alive.
    Continued,
}

impl ExitState {
    /// Decode a `WaitStatus`. Statuses that say nothing about the child's
    /// lifecycle (`StillAlive`, ptrace stops) decode to `None`.
    pub fn from_wait_status(status: WaitStatus) -> Option<Self> {
        match status {
            WaitStatus::Exited(_, code) => Some(ExitState::Exited(code)),
            WaitStatus::Signaled(_, signal, core_dumped) => Some(ExitState::Signaled {
                signal,
                core_dumped,
            }),
            WaitStatus::Stopped(_, signal) => Some(ExitState::Stopped(signal)),
            WaitStatus::Continued(_) => Some(ExitState::Continued),
            _ => None,
        }
    }

    /// Only a terminated child warrants supervisory action; stop and
    /// continue are informational.
    pub fn is_terminated(&self) -> bool {
        matches!(self, ExitState::Exited(_) | ExitState::Signaled { .. })
    }
}

impl fmt::Display for ExitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitState::Exited(code) => write!(f, "exited normally, code: {code}"),
            ExitState::Signaled {
                signal,
                core_dumped,
            } => write!(
                f,
                "terminated by signal: {}, core: {}",
                signal.as_str(),
                u8::from(*core_dumped)
            ),
            ExitState::Stopped(signal) => write!(f, "stopped by signal: {}", signal.as_str()),
            ExitState::Continued => f.write_str("resumed by SIGCONT"),
        }
    }
}

/// Resource usage of a reaped child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceUsage {
    pub user_time: Duration,
    pub system_time: Duration,
    /// Maximum resident set size, in kilobytes.
    pub max_rss_kb: i64,
    pub minor_faults: i64,
    pub major_faults: i64,
    pub voluntary_switches: i64,
    pub involuntary_switches: i64,
}

impl From<&libc::rusage> for ResourceUsage {
    fn from(ru: &libc::rusage) -> Self {
        Self {
            user_time: timeval_to_duration(ru.ru_utime),
            system_time: timeval_to_duration(ru.ru_stime),
            max_rss_kb: ru.ru_maxrss as i64,
            minor_faults: ru.ru_minflt as i64,
            major_faults: ru.ru_majflt as i64,
            voluntary_switches: ru.ru_nvcsw as i64,
            involuntary_switches: ru.ru_nivcsw as i64,
        }
    }
}

fn timeval_to_duration(tv: libc::timeval) -> Duration {
    let secs = u64::try_from(tv.tv_sec).unwrap_or(0);
    let micros = u32::try_from(tv.tv_usec).unwrap_or(0);
    Duration::from_secs(secs) + Duration::from_micros(u64::from(micros))
}

/// Everything the observer knows about a child at the moment its status
/// changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSnapshot {
    pub state: ExitState,
    /// Raw status word from `wait4`.
    pub raw_status: i32,
    pub usage: ResourceUsage,
    /// Argument vector the child was launched with.
    pub args: Vec<String>,
}
