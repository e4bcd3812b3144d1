//! SQLite connection implementation.
//!
//! This module provides safe wrappers around SQLite's C API and implements
//! the `Connection` trait from sqlpool-core.

// Allow casts in FFI code where we need to match C types exactly
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::borrow_as_ptr)] // FFI requires raw pointers
#![allow(clippy::if_not_else)] // Clearer for error handling

use libsqlite3_sys as ffi;
use sqlpool_core::{
    Connection, Error, Result,
    error::{ConnectionError, ConnectionErrorKind, QueryError, QueryErrorKind},
};
use std::ffi::{CStr, CString, c_char, c_int};
use std::ptr;

// `libsqlite3-sys`'s bundled bindings omit `sqlite3_close_v2`, but the
// bundled library provides it.
unsafe extern "C" {
    fn sqlite3_close_v2(db: *mut ffi::sqlite3) -> c_int;
}

/// Configuration for opening SQLite connections.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Path to the database file, or ":memory:" for in-memory database.
    pub path: String,
    /// Open flags (read-only, read-write, create, etc.)
    pub flags: OpenFlags,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
}

/// Flags controlling how the database is opened.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    /// Open for reading only.
    pub read_only: bool,
    /// Open for reading and writing.
    pub read_write: bool,
    /// Create the database if it doesn't exist.
    pub create: bool,
    /// Enable URI filename interpretation.
    pub uri: bool,
    /// Open in multi-thread mode (connections not shared between threads).
    pub no_mutex: bool,
}

impl OpenFlags {
    /// Create flags for read-only access.
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Default::default()
        }
    }

    /// Create flags for read-write access (database must exist).
    pub fn read_write() -> Self {
        Self {
            read_write: true,
            ..Default::default()
        }
    }

    /// Create flags for read-write access with creation if needed.
    pub fn create_read_write() -> Self {
        Self {
            read_write: true,
            create: true,
            ..Default::default()
        }
    }

    fn to_sqlite_flags(self) -> c_int {
        let mut flags = 0;

        if self.read_only {
            flags |= ffi::SQLITE_OPEN_READONLY;
        }
        if self.read_write {
            flags |= ffi::SQLITE_OPEN_READWRITE;
        }
        if self.create {
            flags |= ffi::SQLITE_OPEN_CREATE;
        }
        if self.uri {
            flags |= ffi::SQLITE_OPEN_URI;
        }
        if self.no_mutex {
            flags |= ffi::SQLITE_OPEN_NOMUTEX;
        }

        // Default to read-write if no mode specified
        if flags & (ffi::SQLITE_OPEN_READONLY | ffi::SQLITE_OPEN_READWRITE) == 0 {
            flags |= ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE;
        }

        flags
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            flags: OpenFlags::create_read_write(),
            busy_timeout_ms: 5000,
        }
    }
}

impl SqliteConfig {
    /// Create a new config for a file-based database.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Create a new config for an in-memory database.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Set open flags.
    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set busy timeout.
    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }
}

/// A connection to a SQLite database.
///
/// The handle is owned exclusively; it may move between threads but is never
/// shared by two threads at once.
pub struct SqliteConnection {
    db: *mut ffi::sqlite3,
    path: String,
}

// SAFETY: the bundled SQLite is compiled in serialized threading mode, and
// SqliteConnection is not Sync, so only one thread uses a handle at a time.
unsafe impl Send for SqliteConnection {}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("path", &self.path)
            .field("open", &!self.db.is_null())
            .finish()
    }
}

impl SqliteConnection {
    /// Open a new SQLite connection with the given configuration.
    pub fn open(config: &SqliteConfig) -> Result<Self> {
        let c_path = CString::new(config.path.as_str()).map_err(|_| {
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: "Invalid path: contains null byte".to_string(),
                source: None,
            })
        })?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        let flags = config.flags.to_sqlite_flags();

        // SAFETY: We pass valid pointers and check the return value
        let rc = unsafe { ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };

        if rc != ffi::SQLITE_OK {
            let msg = if !db.is_null() {
                // SAFETY: db is valid even on failure; it must still be closed
                unsafe {
                    let msg = errmsg(db);
                    ffi::sqlite3_close(db);
                    msg
                }
            } else {
                error_string(rc)
            };

            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: format!("Failed to open database '{}': {}", config.path, msg),
                source: None,
            }));
        }

        if config.busy_timeout_ms > 0 {
            // SAFETY: db is valid
            unsafe {
                ffi::sqlite3_busy_timeout(db, config.busy_timeout_ms as c_int);
            }
        }

        tracing::trace!(path = %config.path, "Opened SQLite connection");

        Ok(Self {
            db,
            path: config.path.clone(),
        })
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self> {
        Self::open(&SqliteConfig::memory())
    }

    /// Open a file-based database.
    pub fn open_file(path: impl Into<String>) -> Result<Self> {
        Self::open(&SqliteConfig::file(path))
    }

    /// Get the database path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Execute SQL directly without preparing (for DDL, PRAGMAs, etc.)
    pub fn execute_raw(&self, sql: &str) -> Result<()> {
        let c_sql = sql_cstring(sql)?;
        let mut errmsg_ptr: *mut c_char = ptr::null_mut();

        // SAFETY: All pointers are valid
        let rc = unsafe {
            ffi::sqlite3_exec(
                self.db,
                c_sql.as_ptr(),
                None,
                ptr::null_mut(),
                &mut errmsg_ptr,
            )
        };

        if rc != ffi::SQLITE_OK {
            let msg = if !errmsg_ptr.is_null() {
                // SAFETY: errmsg_ptr was allocated by sqlite3_exec
                let msg = unsafe { CStr::from_ptr(errmsg_ptr).to_string_lossy().into_owned() };
                unsafe { ffi::sqlite3_free(errmsg_ptr.cast()) };
                msg
            } else {
                error_string(rc)
            };

            return Err(query_error(rc, sql, msg));
        }

        Ok(())
    }

    /// Run a query and return the first column of the first row as text.
    ///
    /// Returns `None` when the query yields no rows or the value is NULL.
    pub fn query_text(&self, sql: &str) -> Result<Option<String>> {
        let c_sql = sql_cstring(sql)?;
        let mut stmt: *mut ffi::sqlite3_stmt = ptr::null_mut();

        // SAFETY: All pointers are valid
        let rc = unsafe {
            ffi::sqlite3_prepare_v2(
                self.db,
                c_sql.as_ptr(),
                c_sql.as_bytes().len() as c_int,
                &mut stmt,
                ptr::null_mut(),
            )
        };
        if rc != ffi::SQLITE_OK {
            // SAFETY: db is valid
            return Err(query_error(rc, sql, unsafe { errmsg(self.db) }));
        }
        if stmt.is_null() {
            // Empty statement (whitespace or comment only)
            return Ok(None);
        }

        // SAFETY: stmt is a valid prepared statement
        let rc = unsafe { ffi::sqlite3_step(stmt) };
        let result = match rc {
            ffi::SQLITE_ROW => {
                // SAFETY: stmt is valid, we just got SQLITE_ROW
                unsafe { Ok(read_text_column(stmt, 0)) }
            }
            ffi::SQLITE_DONE => Ok(None),
            // SAFETY: db is valid
            _ => Err(query_error(rc, sql, unsafe { errmsg(self.db) })),
        };

        // SAFETY: stmt is valid and finalized exactly once
        unsafe { ffi::sqlite3_finalize(stmt) };

        result
    }

    /// Get the number of rows changed by the last statement.
    pub fn changes(&self) -> i32 {
        // SAFETY: db is valid
        unsafe { ffi::sqlite3_changes(self.db) }
    }

    /// Close the underlying handle, reporting failures.
    pub fn close(self) -> Result<()> {
        let mut this = self;
        let db = std::mem::replace(&mut this.db, ptr::null_mut());
        if db.is_null() {
            return Ok(());
        }

        // SAFETY: db is valid and no longer reachable through `this`
        let rc = unsafe { ffi::sqlite3_close(db) };
        if rc == ffi::SQLITE_OK {
            tracing::trace!(path = %this.path, "Closed SQLite connection");
            return Ok(());
        }

        // Outstanding statements keep the handle alive; hand it to
        // sqlite3_close_v2 so it is released once they finalize.
        // SAFETY: db is still valid because sqlite3_close failed
        let msg = unsafe {
            let msg = errmsg(db);
            sqlite3_close_v2(db);
            msg
        };
        Err(Error::Connection(ConnectionError {
            kind: ConnectionErrorKind::Close,
            message: format!("Failed to close database '{}': {}", this.path, msg),
            source: None,
        }))
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        if !self.db.is_null() {
            // SAFETY: db is valid
            unsafe {
                sqlite3_close_v2(self.db);
            }
        }
    }
}

impl Connection for SqliteConnection {
    fn execute_raw(&self, sql: &str) -> Result<()> {
        SqliteConnection::execute_raw(self, sql)
    }

    fn ping(&self) -> Result<()> {
        // Simple ping: step a trivial query
        self.query_text("SELECT 1").map(|_| ())
    }

    fn close(self) -> Result<()> {
        SqliteConnection::close(self)
    }
}

// Helper functions

fn sql_cstring(sql: &str) -> Result<CString> {
    CString::new(sql).map_err(|_| {
        Error::Query(QueryError {
            kind: QueryErrorKind::Syntax,
            sql: Some(sql.to_string()),
            message: "SQL contains null byte".to_string(),
            source: None,
        })
    })
}

/// # Safety
///
/// `db` must be a valid (possibly failed-open) sqlite3 handle.
unsafe fn errmsg(db: *mut ffi::sqlite3) -> String {
    // SAFETY: caller guarantees db is valid; errmsg returns a valid C string
    unsafe {
        let ptr = ffi::sqlite3_errmsg(db);
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

/// # Safety
///
/// `stmt` must be a valid statement positioned on a row.
unsafe fn read_text_column(stmt: *mut ffi::sqlite3_stmt, index: c_int) -> Option<String> {
    // SAFETY: caller guarantees stmt is on a row
    unsafe {
        if ffi::sqlite3_column_type(stmt, index) == ffi::SQLITE_NULL {
            return None;
        }
        let text = ffi::sqlite3_column_text(stmt, index);
        if text.is_null() {
            return None;
        }
        let len = ffi::sqlite3_column_bytes(stmt, index) as usize;
        let bytes = std::slice::from_raw_parts(text, len);
        Some(String::from_utf8_lossy(bytes).into_owned())
    }
}

/// Convert an SQLite result code to a human-readable string.
fn error_string(code: c_int) -> String {
    // SAFETY: sqlite3_errstr returns a static string
    unsafe {
        let ptr = ffi::sqlite3_errstr(code);
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

fn query_error(code: c_int, sql: &str, message: String) -> Error {
    Error::Query(QueryError {
        kind: error_code_to_kind(code),
        sql: Some(sql.to_string()),
        message,
        source: None,
    })
}

fn error_code_to_kind(code: c_int) -> QueryErrorKind {
    // Extended result codes keep the primary code in the low byte
    match code & 0xff {
        ffi::SQLITE_CONSTRAINT => QueryErrorKind::Constraint,
        ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED => QueryErrorKind::Busy,
        ffi::SQLITE_PERM | ffi::SQLITE_AUTH | ffi::SQLITE_READONLY => QueryErrorKind::Permission,
        ffi::SQLITE_NOTFOUND => QueryErrorKind::NotFound,
        ffi::SQLITE_TOOBIG => QueryErrorKind::DataTruncation,
        ffi::SQLITE_INTERRUPT => QueryErrorKind::Cancelled,
        _ => QueryErrorKind::Database,
    }
}
