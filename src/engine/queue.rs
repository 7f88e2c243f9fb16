// src/engine/queue.rs

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::sync::{lock_or_recover, wait_or_recover};

/// Thread-safe bounded FIFO.
///
/// Producers (reactor callbacks) block in [`put`](Self::put) while the queue
/// is full; the single consumer (the handler thread) blocks in
/// [`take`](Self::take) while it is empty. There is no priority: items come
/// out in the order they went in.
#[derive(Debug)]
pub struct BlockingQueue<T> {
    capacity: usize,
    items: Mutex<VecDeque<T>>,
    /// Signalled when an item becomes available.
    item_ready: Condvar,
    /// Signalled when a slot becomes free.
    slot_ready: Condvar,
}

impl<T> BlockingQueue<T> {
    /// `capacity` is clamped to at least 1; a zero-capacity queue would
    /// block every producer forever.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            item_ready: Condvar::new(),
            slot_ready: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueue `item`, waiting for a free slot first.
    pub fn put(&self, item: T) {
        let mut items = lock_or_recover(&self.items);
        while items.len() >= self.capacity {
            items = wait_or_recover(&self.slot_ready, items);
        }
        items.push_back(item);
        self.item_ready.notify_one();
    }

    /// Enqueue `item` only if a slot is free; a full queue hands it back.
    pub fn try_put(&self, item: T) -> Result<(), T> {
        let mut items = lock_or_recover(&self.items);
        if items.len() >= self.capacity {
            return Err(item);
        }
        items.push_back(item);
        self.item_ready.notify_one();
        Ok(())
    }

    /// Dequeue the oldest item, waiting for one to arrive first.
    pub fn take(&self) -> T {
        let mut items = lock_or_recover(&self.items);
        loop {
            if let Some(item) = items.pop_front() {
                self.slot_ready.notify_one();
                return item;
            }
            items = wait_or_recover(&self.item_ready, items);
        }
    }

    /// Dequeue the oldest item if there is one.
    pub fn try_take(&self) -> Option<T> {
        let mut items = lock_or_recover(&self.items);
        let item = items.pop_front();
        if item.is_some() {
            self.slot_ready.notify_one();
        }
        item
    }

    /// Move up to `max` items into `out`, returning how many were moved.
    pub fn drain_into(&self, out: &mut Vec<T>, max: usize) -> usize {
        let mut items = lock_or_recover(&self.items);
        let n = items.len().min(max);
        out.extend(items.drain(..n));
        if n > 0 {
            self.slot_ready.notify_all();
        }
        n
    }

    pub fn len(&self) -> usize {
        lock_or_recover(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        lock_or_recover(&self.items).is_empty()
    }
}

impl<T: Clone> BlockingQueue<T> {
    /// Clone of the oldest item, leaving it queued.
    pub fn peek(&self) -> Option<T> {
        lock_or_recover(&self.items).front().cloned()
    }
}
