// src/engine/inbox.rs

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, trace};

use crate::engine::SupervisorEvent;
use crate::engine::queue::BlockingQueue;

/// Gate in front of the work queue.
///
/// Observer callbacks post here from the reactor thread. Events are only
/// accepted between [`open`](Self::open) and [`close`](Self::close), so
/// nothing piles up in a queue nobody drains.
#[derive(Debug)]
pub struct EventInbox {
    queue: BlockingQueue<SupervisorEvent>,
    open: AtomicBool,
}

impl EventInbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: BlockingQueue::new(capacity),
            open: AtomicBool::new(false),
        }
    }

    pub fn open(&self) {
        self.open.store(true, Ordering::Release);
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Enqueue `event` if the inbox is open. Returns whether it was queued.
    pub fn post(&self, event: SupervisorEvent) -> bool {
        if !self.is_open() {
            trace!(?event, "inbox closed; dropping event");
            return false;
        }
        self.queue.put(event);
        true
    }

    /// Close the inbox and queue the poison event that ends the handler loop.
    ///
    /// Never blocks: when the queue is full, pending events are discarded to
    /// make room. The caller may be the handler thread itself, which would
    /// otherwise wait on its own consumer.
    pub fn post_shutdown(&self) {
        self.close();
        let mut event = SupervisorEvent::Shutdown;
        while let Err(back) = self.queue.try_put(event) {
            event = back;
            let dropped = self.close_and_drain();
            debug!(dropped, "inbox full; discarded events to queue shutdown");
        }
    }

    /// Close the inbox and discard whatever is queued. Returns the number of
    /// discarded events.
    pub fn close_and_drain(&self) -> usize {
        self.close();
        let mut dropped = Vec::new();
        self.queue.drain_into(&mut dropped, usize::MAX)
    }

    /// Block until the next event.
    pub fn take(&self) -> SupervisorEvent {
        self.queue.take()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
