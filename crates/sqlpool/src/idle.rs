//! Bounded, thread-safe store of idle handles.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use sqlpool_core::Connection;

use crate::handle::Handle;

struct Queue<C: Connection> {
    handles: VecDeque<Handle<C>>,
    /// Bumped by every explicit wake so waiters can tell they were signalled
    /// even when no handle arrived.
    epoch: u64,
}

/// FIFO queue of idle handles with a fixed capacity.
///
/// Push never blocks; pop can wait for a handle to be returned. The store is
/// internally synchronized, so callers need no external lock.
pub struct IdleStore<C: Connection> {
    queue: Mutex<Queue<C>>,
    available: Condvar,
    capacity: usize,
}

impl<C: Connection> IdleStore<C> {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(Queue {
                handles: VecDeque::with_capacity(capacity),
                epoch: 0,
            }),
            available: Condvar::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.queue.lock().handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().handles.is_empty()
    }

    /// Current wake epoch, to be passed to [`IdleStore::pop_until`].
    pub fn epoch(&self) -> u64 {
        self.queue.lock().epoch
    }

    /// Add a handle, handing it back if the store is full.
    pub fn try_push(&self, handle: Handle<C>) -> Result<(), Handle<C>> {
        let mut queue = self.queue.lock();
        if queue.handles.len() >= self.capacity {
            return Err(handle);
        }
        queue.handles.push_back(handle);
        drop(queue);
        self.available.notify_one();
        Ok(())
    }

    /// Take the oldest idle handle without waiting.
    pub fn try_pop(&self) -> Option<Handle<C>> {
        self.queue.lock().handles.pop_front()
    }

    /// Take the oldest idle handle, waiting until `deadline` for one to arrive.
    ///
    /// Returns `None` at the deadline, or early once the wake epoch moves past
    /// `epoch` (see [`IdleStore::wake_one`]) so the caller can re-check pool
    /// state. A wake that happened after `epoch` was read but before this call
    /// started is not lost.
    pub fn pop_until(&self, deadline: Instant, epoch: u64) -> Option<Handle<C>> {
        let mut queue = self.queue.lock();
        loop {
            if let Some(handle) = queue.handles.pop_front() {
                return Some(handle);
            }
            if queue.epoch != epoch {
                return None;
            }
            if self.available.wait_until(&mut queue, deadline).timed_out() {
                return queue.handles.pop_front();
            }
        }
    }

    /// Like [`IdleStore::pop_until`] with a relative timeout and the current epoch.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Handle<C>> {
        let deadline = Instant::now() + timeout;
        let epoch = self.epoch();
        self.pop_until(deadline, epoch)
    }

    /// Remove every idle handle.
    pub fn drain(&self) -> Vec<Handle<C>> {
        self.queue.lock().handles.drain(..).collect()
    }

    /// Wake a single waiter, e.g. after capacity was freed.
    pub fn wake_one(&self) {
        self.queue.lock().epoch += 1;
        self.available.notify_one();
    }

    /// Wake every waiter, e.g. on close.
    pub fn wake_all(&self) {
        self.queue.lock().epoch += 1;
        self.available.notify_all();
    }
}
