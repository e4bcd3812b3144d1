//! The connection pool.
//!
//! A [`Pool`] owns a bounded set of connections produced by a
//! [`ConnectionManager`]. Callers check connections out with
//! [`Pool::acquire`] and get them back automatically when the returned
//! [`PooledConnection`] is dropped.
//!
//! The number of live connections (idle plus checked out) never exceeds
//! `max_size`. Every change to that count happens under a single lock, while
//! the slow parts (opening, configuring and closing connections) run outside
//! it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sqlpool_core::{Connection, ConnectionManager, Error, PoolError, Result};

use crate::config::PoolConfig;
use crate::handle::Handle;
use crate::idle::IdleStore;
use crate::reaper::Reaper;
use crate::stats::PoolStats;

/// Pause between attempts to open a connection after one failed.
const CONNECT_RETRY_BACKOFF: Duration = Duration::from_millis(25);

pub(crate) type HandleOf<M> = Handle<<M as ConnectionManager>::Connection>;

/// State shared between the pool, its checked-out connections and the reaper.
pub(crate) struct Shared<M: ConnectionManager> {
    pub(crate) config: PoolConfig,
    pub(crate) manager: M,
    pub(crate) idle: IdleStore<M::Connection>,
    /// Live connection count; the only place the ceiling is enforced.
    live: Mutex<usize>,
    closed: AtomicBool,
    waiting: AtomicUsize,
    created: AtomicU64,
    destroyed: AtomicU64,
    timeouts: AtomicU64,
}

impl<M: ConnectionManager> Shared<M> {
    fn new(config: PoolConfig, manager: M) -> Self {
        let idle = IdleStore::new(config.max_size);
        Self {
            config,
            manager,
            idle,
            live: Mutex::new(0),
            closed: AtomicBool::new(false),
            waiting: AtomicUsize::new(0),
            created: AtomicU64::new(0),
            destroyed: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn live(&self) -> usize {
        *self.live.lock()
    }

    /// Check a handle out, opening a new connection or waiting as needed.
    ///
    /// A failure to open a connection is retried until the deadline; the
    /// resulting timeout carries the last such failure as its source.
    fn checkout(&self) -> Result<HandleOf<M>> {
        if self.is_closed() {
            return Err(PoolError::closed().into());
        }

        let timeout = self.config.acquire_timeout();
        let deadline = Instant::now() + timeout;
        let mut last_error: Option<Error> = None;

        loop {
            if self.is_closed() {
                return Err(PoolError::closed().into());
            }
            // Read before looking for capacity so a wake in between is not missed.
            let epoch = self.idle.epoch();

            if let Some(handle) = self.idle.try_pop() {
                if let Some(handle) = self.claim_idle(handle)? {
                    return Ok(handle);
                }
                continue;
            }

            let (wait_until, epoch) = match self.try_create() {
                Ok(Some(handle)) => {
                    if self.is_closed() {
                        self.destroy(handle, "pool closed");
                        return Err(PoolError::closed().into());
                    }
                    return Ok(handle);
                }
                Ok(None) => (deadline, epoch),
                Err(e) => {
                    last_error = Some(e);
                    // The failed attempt woke the store itself; start a fresh epoch.
                    let backoff = deadline.min(Instant::now() + CONNECT_RETRY_BACKOFF);
                    (backoff, self.idle.epoch())
                }
            };

            if Instant::now() >= deadline {
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    database = self.manager.target(),
                    timeout_ms = self.config.acquire_timeout_ms,
                    max_size = self.config.max_size,
                    last_error = last_error.as_ref().map(tracing::field::display),
                    "Timed out waiting for a connection"
                );
                let err = PoolError::timeout(timeout);
                return Err(match last_error {
                    Some(cause) => err.with_source(cause),
                    None => err,
                }
                .into());
            }

            self.waiting.fetch_add(1, Ordering::SeqCst);
            let popped = self.idle.pop_until(wait_until, epoch);
            self.waiting.fetch_sub(1, Ordering::SeqCst);

            if let Some(handle) = popped {
                if let Some(handle) = self.claim_idle(handle)? {
                    return Ok(handle);
                }
            }
        }
    }

    /// Take ownership of a handle popped from the idle store.
    ///
    /// Fails with `Closed` (destroying the handle) if the pool closed after
    /// the pop. Returns `Ok(None)` if the handle failed its health probe.
    fn claim_idle(&self, handle: HandleOf<M>) -> Result<Option<HandleOf<M>>> {
        if self.is_closed() {
            self.destroy(handle, "pool closed");
            return Err(PoolError::closed().into());
        }
        Ok(self.vet(handle))
    }

    /// Health-probe a handle taken from the idle store; destroy it if it fails.
    fn vet(&self, handle: HandleOf<M>) -> Option<HandleOf<M>> {
        if handle.is_healthy() {
            Some(handle)
        } else {
            self.destroy(handle, "failed health probe");
            None
        }
    }

    /// Reserve a slot and open a connection into it.
    ///
    /// Returns `Ok(None)` when the pool is at its ceiling. On failure the
    /// slot is given back before the error is returned.
    fn try_create(&self) -> Result<Option<HandleOf<M>>> {
        {
            let mut live = self.live.lock();
            if *live >= self.config.max_size {
                return Ok(None);
            }
            *live += 1;
        }

        match self.open() {
            Ok(handle) => Ok(Some(handle)),
            Err(e) => {
                self.free_slot();
                tracing::warn!(
                    database = self.manager.target(),
                    error = %e,
                    "Failed to open connection"
                );
                Err(e)
            }
        }
    }

    fn open(&self) -> Result<HandleOf<M>> {
        let conn = self.manager.connect()?;
        if let Err(e) = self.manager.configure(&conn) {
            if let Err(close_err) = conn.close() {
                tracing::warn!(error = %close_err, "Error closing misconfigured connection");
            }
            return Err(e);
        }
        let handle = Handle::new(conn);
        self.created.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            database = self.manager.target(),
            handle = handle.id(),
            "Opened connection"
        );
        Ok(handle)
    }

    fn free_slot(&self) {
        {
            let mut live = self.live.lock();
            *live = live.saturating_sub(1);
        }
        // Someone blocked in acquire may now open a connection.
        self.idle.wake_one();
    }

    /// Destroy a handle unconditionally.
    pub(crate) fn destroy(&self, handle: HandleOf<M>, reason: &'static str) {
        self.free_slot();
        self.destroyed.fetch_add(1, Ordering::Relaxed);
        handle.destroy(reason);
    }

    /// Destroy a handle only if that leaves at least `min_size` live.
    ///
    /// Hands the handle back when the floor would be breached.
    pub(crate) fn destroy_above_floor(
        &self,
        handle: HandleOf<M>,
        reason: &'static str,
    ) -> Option<HandleOf<M>> {
        {
            let mut live = self.live.lock();
            if *live <= self.config.min_size {
                return Some(handle);
            }
            *live -= 1;
        }
        self.idle.wake_one();
        self.destroyed.fetch_add(1, Ordering::Relaxed);
        handle.destroy(reason);
        None
    }

    /// Put a handle into the idle store, or destroy it if the store is full
    /// or the pool has closed.
    ///
    /// Returns whether the handle was stored.
    pub(crate) fn stash(&self, handle: HandleOf<M>) -> bool {
        if self.is_closed() {
            self.destroy(handle, "pool closed");
            return false;
        }
        if let Err(handle) = self.idle.try_push(handle) {
            tracing::debug!(
                database = self.manager.target(),
                handle = handle.id(),
                "Idle store full, dropping connection"
            );
            self.destroy(handle, "idle store full");
            return false;
        }
        // close() may have drained the store between the check and the push.
        if self.is_closed() {
            self.destroy_idle();
            return false;
        }
        true
    }

    fn release(&self, mut handle: HandleOf<M>) {
        handle.mark_returned();
        tracing::trace!(handle = handle.id(), "Released connection");
        self.stash(handle);
    }

    /// Destroy every idle handle, returning how many were destroyed.
    fn destroy_idle(&self) -> usize {
        let drained = self.idle.drain();
        let count = drained.len();
        for handle in drained {
            self.destroy(handle, "pool closed");
        }
        count
    }

    /// Open connections until `min_size` are live.
    ///
    /// Returns how many were opened. Stops at the first failure.
    pub(crate) fn replenish(&self) -> Result<usize> {
        let mut opened = 0;
        loop {
            if self.is_closed() {
                return Ok(opened);
            }
            {
                let mut live = self.live.lock();
                if *live >= self.config.min_size {
                    return Ok(opened);
                }
                *live += 1;
            }
            match self.open() {
                Ok(handle) => {
                    self.stash(handle);
                    opened += 1;
                }
                Err(e) => {
                    self.free_slot();
                    return Err(e);
                }
            }
        }
    }

    fn stats(&self) -> PoolStats {
        let live = self.live();
        let idle = self.idle.len();
        PoolStats {
            live,
            idle,
            checked_out: live.saturating_sub(idle),
            waiting: self.waiting.load(Ordering::Relaxed),
            max_size: self.config.max_size,
            min_size: self.config.min_size,
            closed: self.is_closed(),
            created: self.created.load(Ordering::Relaxed),
            destroyed: self.destroyed.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

/// A bounded pool of connections to a single target.
///
/// # Example
///
/// ```ignore
/// use sqlpool::{Pool, PoolConfig, SqliteManager};
///
/// let pool = Pool::new(PoolConfig::new(2, 8), SqliteManager::file("app.db"))?;
/// let conn = pool.acquire()?;
/// conn.execute_raw("INSERT INTO events (kind) VALUES ('boot')")?;
/// // returned to the pool here
/// drop(conn);
/// ```
pub struct Pool<M: ConnectionManager> {
    shared: Arc<Shared<M>>,
    reaper: Mutex<Option<Reaper>>,
}

impl<M: ConnectionManager> Pool<M> {
    /// Validate `config`, open `min_size` connections and start the reaper.
    ///
    /// If any of the initial connections fails to open, the ones already
    /// opened are closed and the error is returned.
    pub fn new(config: PoolConfig, manager: M) -> Result<Self> {
        config.validate()?;

        let shared = Arc::new(Shared::new(config, manager));
        if let Err(e) = shared.replenish() {
            shared.closed.store(true, Ordering::SeqCst);
            shared.destroy_idle();
            tracing::warn!(
                database = shared.manager.target(),
                error = %e,
                "Failed to pre-open connections"
            );
            return Err(e);
        }

        let reaper = match Reaper::spawn(
            Arc::downgrade(&shared),
            shared.config.health_check_interval(),
        ) {
            Ok(reaper) => reaper,
            Err(e) => {
                shared.closed.store(true, Ordering::SeqCst);
                shared.destroy_idle();
                return Err(Error::Io(e));
            }
        };

        tracing::info!(
            database = shared.manager.target(),
            min_size = shared.config.min_size,
            max_size = shared.config.max_size,
            "Connection pool opened"
        );

        Ok(Self {
            shared,
            reaper: Mutex::new(Some(reaper)),
        })
    }

    /// Check out a connection.
    ///
    /// Reuses a healthy idle connection if there is one, opens a new one if
    /// the pool is below `max_size`, and otherwise waits up to
    /// `acquire_timeout` for one to be returned.
    ///
    /// # Errors
    ///
    /// - [`PoolError`] with kind `Closed` if the pool is or becomes closed
    /// - [`PoolError`] with kind `Timeout` if nothing became available in time.
    ///   If opening a new connection kept failing, the last failure is its
    ///   source (see [`PoolError::cause`])
    pub fn acquire(&self) -> Result<PooledConnection<M>> {
        let mut handle = self.shared.checkout()?;
        handle.mark_checked_out();
        tracing::trace!(handle = handle.id(), "Acquired connection");
        Ok(PooledConnection {
            handle: Some(handle),
            shared: Arc::clone(&self.shared),
        })
    }

    /// Return a connection to the pool. Equivalent to dropping it.
    pub fn release(&self, conn: PooledConnection<M>) {
        drop(conn);
    }

    /// Run `f` with a checked-out connection, returning it afterwards.
    pub fn with_connection<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut M::Connection) -> std::result::Result<T, E>,
        E: From<Error>,
    {
        let mut conn = self.acquire()?;
        f(&mut conn)
    }

    /// Close the pool.
    ///
    /// Idle connections are destroyed now; checked-out connections are
    /// destroyed as they come back. Blocked and future `acquire` calls fail
    /// with a closed error. Calling this more than once is harmless.
    pub fn close(&self) {
        let first = !self.shared.closed.swap(true, Ordering::SeqCst);
        self.shared.idle.wake_all();
        let destroyed = self.shared.destroy_idle();

        if let Some(reaper) = self.reaper.lock().take() {
            reaper.stop();
        }

        if first {
            tracing::info!(
                database = self.shared.manager.target(),
                destroyed,
                still_checked_out = self.shared.live(),
                "Connection pool closed"
            );
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// A best-effort snapshot of pool state.
    pub fn stats(&self) -> PoolStats {
        self.shared.stats()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    pub fn manager(&self) -> &M {
        &self.shared.manager
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Arc<Shared<M>> {
        &self.shared
    }
}

impl<M: ConnectionManager> Drop for Pool<M> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<M: ConnectionManager> std::fmt::Debug for Pool<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("target", &self.shared.manager.target())
            .field("stats", &self.stats())
            .finish()
    }
}

/// A connection checked out of a [`Pool`].
///
/// Dereferences to the underlying connection. Dropping it hands the
/// connection back to the pool, or destroys it if the pool has closed.
pub struct PooledConnection<M: ConnectionManager> {
    handle: Option<HandleOf<M>>,
    shared: Arc<Shared<M>>,
}

impl<M: ConnectionManager> PooledConnection<M> {
    /// Pool-assigned identifier of the underlying connection.
    pub fn id(&self) -> u64 {
        self.handle_ref().id()
    }

    /// Time since the underlying connection was opened.
    pub fn age(&self) -> Duration {
        self.handle_ref().age()
    }

    fn handle_ref(&self) -> &HandleOf<M> {
        self.handle
            .as_ref()
            .expect("PooledConnection used after release")
    }
}

impl<M: ConnectionManager> std::ops::Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        self.handle_ref().conn()
    }
}

impl<M: ConnectionManager> std::ops::DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.handle
            .as_mut()
            .expect("PooledConnection used after release")
            .conn_mut()
    }
}

impl<M: ConnectionManager> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.shared.release(handle);
        }
    }
}

impl<M: ConnectionManager> std::fmt::Debug for PooledConnection<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("handle", &self.handle)
            .finish()
    }
}
