//! Connection traits shared by drivers and the pool.
//!
//! A driver provides two things: a [`Connection`] (one live raw connection)
//! and a [`ConnectionManager`] (the factory that opens and configures new
//! connections for a single database target). The pool only ever talks to
//! these traits.

use crate::Result;

/// A single raw database connection.
///
/// Connections are used by one thread at a time: the pool hands each one out
/// exclusively, so implementations only need to be `Send`.
pub trait Connection: Send + 'static {
    /// Execute one or more SQL statements without returning rows.
    fn execute_raw(&self, sql: &str) -> Result<()>;

    /// Issue a trivial round-trip against the database.
    fn ping(&self) -> Result<()> {
        self.execute_raw("SELECT 1")
    }

    /// Check if the connection is still usable (ping that returns bool).
    ///
    /// Driver failures are reported as `false`, never as an error.
    fn is_valid(&self) -> bool {
        match self.ping() {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "Connection ping failed");
                false
            }
        }
    }

    /// Close the connection, reporting any driver-level failure.
    fn close(self) -> Result<()>
    where
        Self: Sized;
}

/// Opens and configures connections to one database target.
pub trait ConnectionManager: Send + Sync + 'static {
    /// The connection type produced by this manager.
    type Connection: Connection;

    /// Open a brand-new raw connection.
    fn connect(&self) -> Result<Self::Connection>;

    /// One-time setup applied to every newly opened connection.
    fn configure(&self, _conn: &Self::Connection) -> Result<()> {
        Ok(())
    }

    /// Human-readable description of the target, used in logs.
    fn target(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConnectionError, ConnectionErrorKind, Error};
    use std::cell::Cell;

    struct FlakyConnection {
        broken: Cell<bool>,
    }

    impl Connection for FlakyConnection {
        fn execute_raw(&self, _sql: &str) -> Result<()> {
            if self.broken.get() {
                Err(Error::Connection(ConnectionError {
                    kind: ConnectionErrorKind::Disconnected,
                    message: "socket closed".to_string(),
                    source: None,
                }))
            } else {
                Ok(())
            }
        }

        fn close(self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn is_valid_follows_ping() {
        let conn = FlakyConnection {
            broken: Cell::new(false),
        };
        assert!(conn.ping().is_ok());
        assert!(conn.is_valid());

        conn.broken.set(true);
        assert!(conn.ping().is_err());
        assert!(!conn.is_valid());
        assert!(conn.close().is_ok());
    }
}
