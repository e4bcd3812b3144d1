//! sqlpool - a bounded, thread-safe connection pool for embedded SQLite.
//!
//! sqlpool keeps a small set of reusable connections to one database file:
//!
//! - At most `max_size` connections exist at any time
//! - `min_size` connections are opened up front and kept by a background reaper
//! - Idle connections are health-probed before reuse
//! - Connections idle longer than `max_idle_time` are closed, down to the floor
//! - `acquire` waits up to `acquire_timeout` when the pool is exhausted
//!
//! # Quick Start
//!
//! ```ignore
//! use sqlpool::prelude::*;
//!
//! let pool = Pool::new(PoolConfig::new(2, 8), SqliteManager::file("leads.db"))?;
//!
//! let conn = pool.acquire()?;
//! conn.execute_raw("CREATE TABLE IF NOT EXISTS leads (id INTEGER PRIMARY KEY, name TEXT)")?;
//! drop(conn); // back to the pool
//!
//! let count = pool.with_connection(|conn| conn.query_text("SELECT count(*) FROM leads"))?;
//! println!("{count:?} leads; {:?}", pool.stats());
//!
//! pool.close();
//! ```
//!
//! For process-wide pools shared by database path, use [`get_pool`] and
//! [`close_pool`].

pub mod config;
pub mod handle;
pub mod idle;
pub mod pool;
mod reaper;
pub mod registry;
pub mod stats;

#[cfg(test)]
mod testing;

pub use config::PoolConfig;
pub use handle::Handle;
pub use idle::IdleStore;
pub use pool::{Pool, PooledConnection};
pub use registry::{
    Registry, SqlitePool, close_pool, close_pool_for, get_pool, get_pool_with_config,
};
pub use stats::PoolStats;

pub use sqlpool_core::{
    ConfigError, Connection, ConnectionError, ConnectionErrorKind, ConnectionManager, Error,
    PoolError, PoolErrorKind, QueryError, QueryErrorKind, Result,
};
pub use sqlpool_sqlite::{
    JournalMode, OpenFlags, Pragmas, SqliteConfig, SqliteConnection, SqliteManager,
    Synchronous, TempStore, sqlite_version,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        Connection, ConnectionManager, Error, Pool, PoolConfig, PoolStats, PooledConnection,
        Pragmas, Result, SqliteManager, SqlitePool, close_pool, get_pool,
    };
}
