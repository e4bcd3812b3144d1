//! Background maintenance of idle connections.
//!
//! Once per `health_check_interval` the reaper inspects every idle
//! connection. It destroys connections that fail their health probe and
//! connections idle longer than `max_idle_time` while the pool is above
//! `min_size`, then opens new ones until `min_size` are live again.

use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use sqlpool_core::ConnectionManager;

use crate::pool::{HandleOf, Shared};

/// Outcome of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Sweep {
    pub inspected: usize,
    pub expired: usize,
    pub unhealthy: usize,
    /// Survivors destroyed because the store filled up during the sweep.
    pub overflowed: usize,
    pub retained: usize,
}

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    cvar: Condvar,
}

impl StopSignal {
    fn stop(&self) {
        *self.stopped.lock() = true;
        self.cvar.notify_all();
    }

    /// Sleep for `interval` or until stopped. Returns true if stopped.
    fn sleep(&self, interval: Duration) -> bool {
        let deadline = Instant::now() + interval;
        let mut stopped = self.stopped.lock();
        while !*stopped {
            if self.cvar.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }
}

/// Handle to the reaper thread. Stopping it waits for an in-flight sweep.
pub(crate) struct Reaper {
    signal: Arc<StopSignal>,
    thread: Option<JoinHandle<()>>,
}

impl Reaper {
    pub(crate) fn spawn<M: ConnectionManager>(
        pool: Weak<Shared<M>>,
        interval: Duration,
    ) -> std::io::Result<Self> {
        let signal = Arc::new(StopSignal::default());
        let thread = {
            let signal = Arc::clone(&signal);
            thread::Builder::new()
                .name("sqlpool-reaper".to_string())
                .spawn(move || run(&pool, &signal, interval))?
        };
        Ok(Self {
            signal,
            thread: Some(thread),
        })
    }

    pub(crate) fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.signal.stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("Reaper thread panicked");
            }
        }
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run<M: ConnectionManager>(pool: &Weak<Shared<M>>, signal: &StopSignal, interval: Duration) {
    tracing::info!(interval = ?interval, "Reaper started");
    while !signal.sleep(interval) {
        let Some(shared) = pool.upgrade() else {
            break;
        };
        if shared.is_closed() {
            break;
        }
        shared.sweep();
        if let Err(e) = shared.replenish() {
            tracing::warn!(
                database = shared.manager.target(),
                error = %e,
                "Failed to restore minimum pool size"
            );
        }
    }
    tracing::info!("Reaper stopped");
}

impl<M: ConnectionManager> Shared<M> {
    /// Inspect every idle handle once.
    ///
    /// Handles are taken out of the store for inspection so acquirers never
    /// see one mid-probe; survivors go back in their original order.
    pub(crate) fn sweep(&self) -> Sweep {
        self.inspect(self.idle.drain())
    }

    /// Expire, probe and re-stash a batch of handles taken from the store.
    pub(crate) fn inspect(&self, batch: Vec<HandleOf<M>>) -> Sweep {
        let max_idle = self.config.max_idle_time();
        let mut sweep = Sweep {
            inspected: batch.len(),
            ..Sweep::default()
        };

        for handle in batch {
            let handle = if handle.is_idle_too_long(max_idle) {
                match self.destroy_above_floor(handle, "idle too long") {
                    None => {
                        sweep.expired += 1;
                        continue;
                    }
                    Some(kept) => kept,
                }
            } else {
                handle
            };

            if !handle.is_healthy() {
                self.destroy(handle, "failed health probe");
                sweep.unhealthy += 1;
                continue;
            }

            if self.stash(handle) {
                sweep.retained += 1;
            } else {
                sweep.overflowed += 1;
            }
        }

        if sweep.expired + sweep.unhealthy + sweep.overflowed > 0 {
            tracing::debug!(
                database = self.manager.target(),
                inspected = sweep.inspected,
                expired = sweep.expired,
                unhealthy = sweep.unhealthy,
                overflowed = sweep.overflowed,
                retained = sweep.retained,
                live = self.live(),
                "Reaper evicted connections"
            );
        } else {
            tracing::trace!(inspected = sweep.inspected, "Reaper sweep found nothing to evict");
        }
        sweep
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::pool::Pool;
    use crate::handle::Handle;
    use crate::testing::{MockConnection, MockManager};

    /// A pool whose reaper never fires on its own; tests sweep by hand.
    fn quiet_pool(min: usize, max: usize, max_idle: Duration) -> (Pool<MockManager>, MockManager) {
        let manager = MockManager::new();
        let config = PoolConfig::new(min, max)
            .with_max_idle_time(max_idle)
            .with_health_check_interval(Duration::from_secs(3600));
        (Pool::new(config, manager.clone()).expect("pool"), manager)
    }

    /// Acquire `n` connections at once and hand them all back.
    fn grow(pool: &Pool<MockManager>, n: usize) {
        let held: Vec<_> = (0..n).map(|_| pool.acquire().expect("acquire")).collect();
        drop(held);
    }

    #[test]
    fn sleep_returns_early_when_stopped() {
        let signal = Arc::new(StopSignal::default());
        let sleeper = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || signal.sleep(Duration::from_secs(30)))
        };
        thread::sleep(Duration::from_millis(20));
        signal.stop();
        assert!(sleeper.join().unwrap());
        assert!(!StopSignal::default().sleep(Duration::from_millis(1)));
    }

    #[test]
    fn fresh_handles_are_retained() {
        let (pool, manager) = quiet_pool(1, 4, Duration::from_secs(60));
        grow(&pool, 3);

        let sweep = pool.shared().sweep();
        assert_eq!(sweep.inspected, 3);
        assert_eq!(sweep.retained, 3);
        assert_eq!(pool.stats().idle, 3);
        assert_eq!(manager.closed(), 0);
    }

    #[test]
    fn expired_handles_shrink_to_floor() {
        let (pool, manager) = quiet_pool(2, 5, Duration::from_millis(50));
        grow(&pool, 5);
        assert_eq!(pool.stats().live, 5);

        thread::sleep(Duration::from_millis(80));
        let sweep = pool.shared().sweep();
        assert_eq!(sweep.expired, 3);
        assert_eq!(sweep.retained, 2);

        let stats = pool.stats();
        assert_eq!(stats.live, 2);
        assert_eq!(stats.idle, 2);
        assert_eq!(manager.closed(), 3);
    }

    #[test]
    fn unhealthy_handles_are_evicted_below_floor() {
        let (pool, manager) = quiet_pool(2, 3, Duration::from_millis(50));
        manager.break_all();

        let sweep = pool.shared().sweep();
        assert_eq!(sweep.unhealthy, 2);
        assert_eq!(pool.stats().live, 0);

        assert_eq!(pool.shared().replenish().unwrap(), 2);
        assert_eq!(pool.stats().live, 2);
        assert_eq!(manager.created(), 4);
    }

    #[test]
    fn survivors_that_no_longer_fit_are_destroyed() {
        let (pool, manager) = quiet_pool(0, 2, Duration::from_secs(60));
        grow(&pool, 2);
        let shared = pool.shared();
        let batch = shared.idle.drain();

        // Acquirers refilled the store while the batch was out for inspection.
        while shared.idle.len() < shared.idle.capacity() {
            assert!(shared.idle.try_push(Handle::new(MockConnection::healthy())).is_ok());
        }

        let sweep = shared.inspect(batch);
        assert_eq!(sweep.inspected, 2);
        assert_eq!(sweep.overflowed, 2);
        assert_eq!(sweep.retained, 0);
        assert_eq!(manager.closed(), 2);
        assert_eq!(shared.live(), 0);
        assert_eq!(pool.stats().destroyed, 2);

        for handle in shared.idle.drain() {
            handle.destroy("test");
        }
    }

    #[test]
    fn checked_out_handles_are_untouched() {
        let (pool, manager) = quiet_pool(0, 2, Duration::from_millis(50));
        let held = pool.acquire().unwrap();
        thread::sleep(Duration::from_millis(80));
        held.probe().break_connection();

        let sweep = pool.shared().sweep();
        assert_eq!(sweep.inspected, 0);
        assert_eq!(manager.closed(), 0);
        assert_eq!(pool.stats().live, 1);
    }

    #[test]
    fn background_thread_sweeps_and_replenishes() {
        let manager = MockManager::new();
        let config = PoolConfig::new(2, 4)
            .with_max_idle_time(Duration::from_millis(40))
            .with_health_check_interval(Duration::from_millis(20));
        let pool = Pool::new(config, manager.clone()).unwrap();
        grow(&pool, 4);
        manager.break_all();

        let deadline = Instant::now() + Duration::from_secs(5);
        while manager.closed() < 4 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        while pool.stats().live < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }

        assert_eq!(manager.closed(), 4);
        let stats = pool.stats();
        assert!(stats.live >= 2, "{stats:?}");
        assert!(stats.live <= 4, "{stats:?}");
        assert!(manager.created() >= 6);
    }

    #[test]
    fn stop_joins_thread() {
        let (pool, _) = quiet_pool(0, 1, Duration::from_secs(60));
        let started = Instant::now();
        pool.close();
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
