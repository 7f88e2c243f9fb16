// src/watch/observer.rs

use std::collections::HashMap;
use std::fmt;
use std::os::fd::{AsFd, BorrowedFd};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use nix::errno::Errno;
use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify, WatchDescriptor};
use tracing::{debug, trace, warn};

use crate::errors::{Result, SupervisorError};
use crate::reactor::Reactor;
use crate::sync::lock_or_recover;
use crate::watch::mask::EventMask;
use crate::watch::path_utils::join_event_path;

/// Callback invoked with the full path of a change and its semantic mask.
pub type FsCallback = Arc<dyn Fn(&Path, EventMask) + Send + Sync>;

/// One subscription: what was asked for, and who to tell.
#[derive(Clone)]
struct WatchInfo {
    path: PathBuf,
    mask: EventMask,
    callback: FsCallback,
}

/// path -> wd and wd -> subscription, guarded together so both directions
/// always agree.
#[derive(Default)]
struct WatchTables {
    by_path: HashMap<PathBuf, WatchDescriptor>,
    by_wd: HashMap<WatchDescriptor, WatchInfo>,
}

/// Filesystem change observer over a single inotify instance.
///
/// At most one subscription exists per path: [`add_watch`](Self::add_watch)
/// on a path that is already watched replaces the old subscription.
pub struct FsObserver {
    inotify: Inotify,
    default_callback: FsCallback,
    tables: Mutex<WatchTables>,
    #[cfg(test)]
    removal_fault: std::sync::atomic::AtomicBool,
}

impl fmt::Debug for FsObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = lock_or_recover(&self.tables);
        f.debug_struct("FsObserver")
            .field("watched", &tables.by_path.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl FsObserver {
    /// `default_callback` receives events for watches added without their
    /// own callback.
    pub fn new(default_callback: FsCallback) -> Result<Self> {
        let inotify = Inotify::init(InitFlags::IN_CLOEXEC | InitFlags::IN_NONBLOCK)
            .map_err(|e| SupervisorError::setup("inotify_init1", e))?;

        Ok(Self {
            inotify,
            default_callback,
            tables: Mutex::new(WatchTables::default()),
            #[cfg(test)]
            removal_fault: std::sync::atomic::AtomicBool::new(false),
        })
    }

    /// Descriptor that becomes readable when change records are pending.
    pub fn descriptor(&self) -> BorrowedFd<'_> {
        self.inotify.as_fd()
    }

    /// Register this observer's descriptor with `reactor`.
    pub fn attach(self: &Arc<Self>, reactor: &Reactor) -> Result<()> {
        let observer = Arc::clone(self);
        reactor.register(self.descriptor(), Arc::new(move |_fd, _flags| observer.on_ready()))
    }

    /// Watch `path` for `mask`, reporting to the default callback.
    pub fn add_watch(&self, path: impl AsRef<Path>, mask: EventMask) -> Result<()> {
        self.add_watch_with(path, mask, Arc::clone(&self.default_callback))
    }

    /// Watch `path` for `mask`, reporting to `callback`. Any previous watch
    /// on the same path is removed first.
    pub fn add_watch_with(
        &self,
        path: impl AsRef<Path>,
        mask: EventMask,
        callback: FsCallback,
    ) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        let raw_mask = mask.to_inotify();

        let mut tables = lock_or_recover(&self.tables);
        if self.remove_locked(&mut tables, &path)? {
            debug!(path = %path.display(), "replacing existing watch");
        }

        let wd = self
            .inotify
            .add_watch(&path, raw_mask)
            .map_err(|e| SupervisorError::setup(format!("inotify_add_watch {}", path.display()), e))?;

        tables.by_path.insert(path.clone(), wd);
        tables.by_wd.insert(
            wd,
            WatchInfo {
                path: path.clone(),
                mask,
                callback,
            },
        );

        debug!(path = %path.display(), %mask, "watch added");
        Ok(())
    }

    /// Cancel the watch on `path`. Returns `false` if there was none.
    pub fn remove_watch(&self, path: impl AsRef<Path>) -> Result<bool> {
        let mut tables = lock_or_recover(&self.tables);
        let removed = self.remove_locked(&mut tables, path.as_ref())?;
        if removed {
            debug!(path = %path.as_ref().display(), "watch removed");
        }
        Ok(removed)
    }

    fn remove_locked(&self, tables: &mut WatchTables, path: &Path) -> Result<bool> {
        let Some(wd) = tables.by_path.remove(path) else {
            return Ok(false);
        };
        tables.by_wd.remove(&wd);

        #[cfg(test)]
        if self
            .removal_fault
            .swap(false, std::sync::atomic::Ordering::SeqCst)
        {
            return Err(SupervisorError::setup(
                format!("inotify_rm_watch {}", path.display()),
                std::io::Error::other("injected failure"),
            ));
        }

        match self.inotify.rm_watch(wd) {
            Ok(()) => Ok(true),
            // The kernel drops a watch by itself once its inode is gone.
            Err(Errno::EINVAL) => {
                trace!(path = %path.display(), "watch already dropped by the kernel");
                Ok(true)
            }
            Err(e) => Err(SupervisorError::setup(
                format!("inotify_rm_watch {}", path.display()),
                e,
            )),
        }
    }

    /// Make the next watch removal fail.
    #[cfg(test)]
    pub(crate) fn fail_next_removal(&self) {
        self.removal_fault
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn is_watching(&self, path: impl AsRef<Path>) -> bool {
        lock_or_recover(&self.tables)
            .by_path
            .contains_key(path.as_ref())
    }

    /// Mask registered for `path`, if watched.
    pub fn mask_of(&self, path: impl AsRef<Path>) -> Option<EventMask> {
        let tables = lock_or_recover(&self.tables);
        let wd = tables.by_path.get(path.as_ref())?;
        tables.by_wd.get(wd).map(|info| info.mask)
    }

    pub fn watched_paths(&self) -> Vec<PathBuf> {
        lock_or_recover(&self.tables).by_path.keys().cloned().collect()
    }

    /// Drain pending change records and dispatch them.
    ///
    /// Callbacks run after the table lock is released, so they may call back
    /// into this observer.
    pub fn on_ready(&self) -> Result<()> {
        let records = match self.inotify.read_events() {
            Ok(records) => records,
            Err(Errno::EAGAIN) => return Ok(()),
            Err(e) => {
                return Err(SupervisorError::Decode(format!(
                    "reading inotify records: {e}"
                )));
            }
        };

        let mut dispatch = Vec::with_capacity(records.len());
        {
            let mut tables = lock_or_recover(&self.tables);
            for record in records {
                if record.mask.contains(AddWatchFlags::IN_Q_OVERFLOW) {
                    warn!("inotify queue overflowed; some change records were lost");
                    continue;
                }

                let Some(info) = tables.by_wd.get(&record.wd) else {
                    trace!(wd = ?record.wd, "record for unknown watch; ignoring");
                    continue;
                };

                let mask = EventMask::from_inotify(record.mask);
                if !mask.is_empty() {
                    let full = join_event_path(&info.path, record.name.as_deref());
                    dispatch.push((Arc::clone(&info.callback), full, mask));
                }

                if record.mask.contains(AddWatchFlags::IN_IGNORED) {
                    let path = info.path.clone();
                    tables.by_wd.remove(&record.wd);
                    if tables.by_path.get(&path) == Some(&record.wd) {
                        tables.by_path.remove(&path);
                    }
                    debug!(path = %path.display(), "watch dropped by the kernel");
                }
            }
        }

        for (callback, path, mask) in dispatch {
            trace!(path = %path.display(), %mask, "dispatching filesystem event");
            callback(&path, mask);
        }
        Ok(())
    }
}
