//! A pooled raw connection plus its bookkeeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use sqlpool_core::Connection;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// One live connection owned by the pool.
///
/// A handle is owned either by the idle store or by the thread that checked
/// it out, never both.
pub struct Handle<C: Connection> {
    id: u64,
    conn: C,
    created_at: Instant,
    last_used: Instant,
    in_use: bool,
}

impl<C: Connection> Handle<C> {
    pub fn new(conn: C) -> Self {
        let now = Instant::now();
        Self {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            conn,
            created_at: now,
            last_used: now,
            in_use: false,
        }
    }

    /// Process-unique identifier, used in logs.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn conn(&self) -> &C {
        &self.conn
    }

    pub fn conn_mut(&mut self) -> &mut C {
        &mut self.conn
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    pub fn in_use(&self) -> bool {
        self.in_use
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Probe the connection through [`Connection::is_valid`].
    ///
    /// A failed probe is logged and reported as `false`.
    pub fn is_healthy(&self) -> bool {
        let healthy = self.conn.is_valid();
        if !healthy {
            tracing::warn!(handle = self.id, "Connection failed health probe");
        }
        healthy
    }

    pub fn is_idle_too_long(&self, max_idle_time: Duration) -> bool {
        self.last_used.elapsed() > max_idle_time
    }

    pub(crate) fn mark_checked_out(&mut self) {
        self.in_use = true;
        self.last_used = Instant::now();
    }

    pub(crate) fn mark_returned(&mut self) {
        self.in_use = false;
        self.last_used = Instant::now();
    }

    #[cfg(test)]
    pub(crate) fn backdate_last_used(&mut self, by: Duration) {
        self.last_used = self
            .last_used
            .checked_sub(by)
            .expect("monotonic clock too close to its origin to backdate");
    }

    /// Close the raw connection. Errors are logged and swallowed.
    pub(crate) fn destroy(self, reason: &'static str) {
        let id = self.id;
        match self.conn.close() {
            Ok(()) => tracing::debug!(handle = id, reason, "Destroyed connection"),
            Err(e) => tracing::warn!(
                handle = id,
                reason,
                error = %e,
                "Error while closing connection; discarding it"
            ),
        }
    }
}

impl<C: Connection> std::fmt::Debug for Handle<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.id)
            .field("age", &self.age())
            .field("idle", &self.last_used.elapsed())
            .field("in_use", &self.in_use)
            .finish()
    }
}
