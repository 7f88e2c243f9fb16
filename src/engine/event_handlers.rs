// src/engine/event_handlers.rs

//! Reactions to the events drained by the handler thread.

use std::path::Path;

use nix::unistd::Pid;
use tracing::{debug, error, info};

use crate::engine::{Supervisor, SupervisorEvent};
use crate::errors::Result;
use crate::process::ProcessSnapshot;
use crate::watch::EventMask;

impl Supervisor {
    /// Dispatch one event. Called only from the handler thread.
    pub(crate) fn handle_event(&self, event: SupervisorEvent) -> Result<()> {
        match event {
            SupervisorEvent::ChildChanged { pid, snapshot } => {
                self.on_child_changed(pid, &snapshot);
                Ok(())
            }
            SupervisorEvent::PathChanged { path, mask } => self.on_path_changed(&path, mask),
            SupervisorEvent::Shutdown => Ok(()),
        }
    }

    /// A child that terminated on its own gets redeployed after the backoff
    /// delay. Stop and continue notifications are only logged.
    fn on_child_changed(&self, pid: Pid, snapshot: &ProcessSnapshot) {
        if !snapshot.state.is_terminated() {
            debug!(%pid, state = %snapshot.state, "child state changed");
            return;
        }

        info!(
            %pid,
            state = %snapshot.state,
            user_ms = snapshot.usage.user_time.as_millis() as u64,
            max_rss_kb = snapshot.usage.max_rss_kb,
            "child terminated"
        );
        self.redeploy(pid);
    }

    /// Restart every deployment watching `path`, with the backoff reset.
    ///
    /// Each deployment is handled on its own: a failure is logged, the rest
    /// are still restarted, and the first error is returned.
    fn on_path_changed(&self, path: &Path, mask: EventMask) -> Result<()> {
        let works = self.works_on(path);
        if works.is_empty() {
            debug!(path = %path.display(), %mask, "change on untracked path");
            return Ok(());
        }

        info!(path = %path.display(), %mask, count = works.len(), "watched file changed");

        let mut first_err = None;
        for work in works {
            match self.undeploy(work.pid) {
                Ok(true) => {}
                // Already redeployed or undeployed by someone else.
                Ok(false) => continue,
                Err(err) => {
                    error!(pid = %work.pid, error = %err, "undeploy after change failed");
                    first_err.get_or_insert(err);
                    continue;
                }
            }
            self.reset_redeploy_delay(&work.path);
            self.schedule_redeploy(work);
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
