//! Process-wide pool registry.
//!
//! A [`Registry`] holds one pool per database key and hands out shared
//! references to them. The first call to [`Registry::get_or_init`] for a key
//! builds its pool; every later call for that key returns the same instance,
//! even under concurrent first use.
//!
//! [`get_pool`] and [`close_pool`] expose a global registry of SQLite pools
//! keyed by database path.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use sqlpool_core::{ConnectionManager, Result};
use sqlpool_sqlite::SqliteManager;

use crate::config::PoolConfig;
use crate::pool::Pool;

/// Lazily initialised shared pools, one per key.
pub struct Registry<M: ConnectionManager> {
    pools: Mutex<BTreeMap<String, Arc<Pool<M>>>>,
}

impl<M: ConnectionManager> Registry<M> {
    pub const fn new() -> Self {
        Self {
            pools: parking_lot::const_mutex(BTreeMap::new()),
        }
    }

    /// Return the pool registered for `key`, building it with `init` if
    /// there is none.
    ///
    /// A pool that was closed directly (not through the registry) is
    /// replaced.
    ///
    /// The registry lock is held while `init` runs, so concurrent callers
    /// never build two pools for the same key.
    pub fn get_or_init<F>(&self, key: &str, init: F) -> Result<Arc<Pool<M>>>
    where
        F: FnOnce() -> Result<Pool<M>>,
    {
        let mut pools = self.pools.lock();
        if let Some(pool) = pools.get(key) {
            if !pool.is_closed() {
                return Ok(Arc::clone(pool));
            }
            tracing::debug!(database = key, "Replacing closed shared pool");
        }

        let pool = Arc::new(init()?);
        tracing::info!(database = key, registered = pools.len() + 1, "Registered shared pool");
        pools.insert(key.to_string(), Arc::clone(&pool));
        Ok(pool)
    }

    /// The pool registered for `key`, if any.
    pub fn get(&self, key: &str) -> Option<Arc<Pool<M>>> {
        self.pools.lock().get(key).cloned()
    }

    /// Keys with a registered pool, in order.
    pub fn keys(&self) -> Vec<String> {
        self.pools.lock().keys().cloned().collect()
    }

    /// Close and forget the pool registered for `key`.
    ///
    /// Returns false if there was nothing to close.
    pub fn remove(&self, key: &str) -> bool {
        let Some(pool) = self.pools.lock().remove(key) else {
            return false;
        };
        pool.close();
        tracing::info!(database = key, "Closed shared pool");
        true
    }

    /// Close and forget every registered pool.
    ///
    /// Returns false if there was nothing to close. The next
    /// [`Registry::get_or_init`] builds fresh pools.
    pub fn close(&self) -> bool {
        let pools = std::mem::take(&mut *self.pools.lock());
        if pools.is_empty() {
            return false;
        }
        for (key, pool) in pools {
            pool.close();
            tracing::info!(database = %key, "Closed shared pool");
        }
        true
    }
}

impl<M: ConnectionManager> Default for Registry<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection pool over a SQLite database file.
pub type SqlitePool = Pool<SqliteManager>;

static SQLITE_POOLS: Registry<SqliteManager> = Registry::new();

/// Get the shared pool for the SQLite database at `path`, creating it on
/// first use.
///
/// The pool is configured from the environment (see
/// [`PoolConfig::from_env`]). Each distinct path gets its own pool.
pub fn get_pool(path: &str) -> Result<Arc<SqlitePool>> {
    SQLITE_POOLS.get_or_init(path, || {
        Pool::new(PoolConfig::from_env(), SqliteManager::file(path))
    })
}

/// Like [`get_pool`] with an explicit configuration for first use.
///
/// `config` is ignored if a pool for `path` already exists.
pub fn get_pool_with_config(path: &str, config: PoolConfig) -> Result<Arc<SqlitePool>> {
    SQLITE_POOLS.get_or_init(path, || Pool::new(config, SqliteManager::file(path)))
}

/// Close every shared SQLite pool. Returns false if none was open.
pub fn close_pool() -> bool {
    SQLITE_POOLS.close()
}

/// Close the shared pool for `path` only. Returns false if it was not open.
pub fn close_pool_for(path: &str) -> bool {
    SQLITE_POOLS.remove(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockManager;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    fn mock_pool(manager: &MockManager) -> Result<Pool<MockManager>> {
        let config = PoolConfig::new(1, 2).with_health_check_interval(Duration::from_secs(3600));
        Pool::new(config, manager.clone())
    }

    #[test]
    fn first_call_builds_later_calls_share() {
        let registry = Registry::new();
        let manager = MockManager::new();

        let a = registry.get_or_init("a.db", || mock_pool(&manager)).unwrap();
        let b = registry
            .get_or_init("a.db", || panic!("must not rebuild"))
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.created(), 1);
    }

    #[test]
    fn each_key_gets_its_own_pool() {
        let registry = Registry::new();
        let first = MockManager::new();
        let second = MockManager::new();

        let a = registry.get_or_init("a.db", || mock_pool(&first)).unwrap();
        let b = registry.get_or_init("b.db", || mock_pool(&second)).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!((first.created(), second.created()), (1, 1));

        let again = registry
            .get_or_init("a.db", || panic!("must not rebuild"))
            .unwrap();
        assert!(Arc::ptr_eq(&again, &a));
        assert_eq!(registry.keys(), ["a.db", "b.db"]);
    }

    #[test]
    fn remove_closes_only_that_key() {
        let registry = Registry::new();
        let manager = MockManager::new();
        let a = registry.get_or_init("a.db", || mock_pool(&manager)).unwrap();
        let b = registry.get_or_init("b.db", || mock_pool(&manager)).unwrap();

        assert!(registry.remove("a.db"));
        assert!(!registry.remove("a.db"));
        assert!(a.is_closed());
        assert!(!b.is_closed());
        assert!(registry.get("a.db").is_none());
        assert!(registry.get("b.db").is_some_and(|p| Arc::ptr_eq(&p, &b)));
    }

    #[test]
    fn concurrent_first_use_builds_once() {
        let registry: Arc<Registry<MockManager>> = Arc::new(Registry::new());
        let manager = MockManager::new();
        let barrier = Arc::new(Barrier::new(8));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let manager = manager.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    registry.get_or_init("a.db", || mock_pool(&manager)).unwrap()
                })
            })
            .collect();
        let pools: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();

        assert!(pools.iter().all(|p| Arc::ptr_eq(p, &pools[0])));
        assert_eq!(manager.created(), 1);
    }

    #[test]
    fn failed_init_leaves_registry_empty() {
        let registry = Registry::new();
        let manager = MockManager::new();
        manager.set_fail_connect(true);

        assert!(registry.get_or_init("a.db", || mock_pool(&manager)).is_err());
        assert!(registry.get("a.db").is_none());

        manager.set_fail_connect(false);
        assert!(registry.get_or_init("a.db", || mock_pool(&manager)).is_ok());
    }

    #[test]
    fn close_resets_registry() {
        let registry = Registry::new();
        let manager = MockManager::new();
        assert!(!registry.close());

        let first = registry.get_or_init("a.db", || mock_pool(&manager)).unwrap();
        let other = registry.get_or_init("b.db", || mock_pool(&manager)).unwrap();
        assert!(registry.close());
        assert!(first.is_closed());
        assert!(other.is_closed());
        assert!(registry.keys().is_empty());

        let second = registry.get_or_init("a.db", || mock_pool(&manager)).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!second.is_closed());
    }

    #[test]
    fn directly_closed_pool_is_replaced() {
        let registry = Registry::new();
        let manager = MockManager::new();

        let first = registry.get_or_init("a.db", || mock_pool(&manager)).unwrap();
        first.close();
        let second = registry.get_or_init("a.db", || mock_pool(&manager)).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
