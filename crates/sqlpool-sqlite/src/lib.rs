//! SQLite driver for sqlpool.
//!
// FFI calls require unsafe code - this is expected for database drivers
#![allow(unsafe_code)]
//!
//! This crate wraps libsqlite3 (bundled via `libsqlite3-sys`) and implements
//! the `Connection` and `ConnectionManager` traits from sqlpool-core, so the
//! pool can open, configure, probe and close embedded database connections.
//!
//! # Features
//!
//! - File-based and in-memory databases
//! - Configurable open flags and busy timeout
//! - One-time PRAGMA tuning per new connection (journal mode, sync level,
//!   cache size, temp store)
//!
//! # Example
//!
//! ```rust,ignore
//! use sqlpool_sqlite::{SqliteManager, Pragmas, Synchronous};
//! use sqlpool_core::ConnectionManager;
//!
//! let manager = SqliteManager::file("app.db")
//!     .with_pragmas(Pragmas::default().synchronous(Synchronous::Full));
//! let conn = manager.connect()?;
//! manager.configure(&conn)?;
//! conn.execute_raw("CREATE TABLE IF NOT EXISTS leads (id INTEGER PRIMARY KEY)")?;
//! ```

pub mod connection;
pub mod manager;
pub mod pragma;

pub use connection::{OpenFlags, SqliteConfig, SqliteConnection};
pub use manager::SqliteManager;
pub use pragma::{JournalMode, Pragmas, Synchronous, TempStore};

/// Get the SQLite library version as a string.
pub fn sqlite_version() -> &'static str {
    // SAFETY: sqlite3_libversion returns a static string
    unsafe {
        let ptr = libsqlite3_sys::sqlite3_libversion();
        std::ffi::CStr::from_ptr(ptr).to_str().unwrap_or("unknown")
    }
}
