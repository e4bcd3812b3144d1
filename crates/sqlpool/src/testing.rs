//! Fault-injecting connection doubles shared by unit and integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use sqlpool_core::{
    Connection, ConnectionError, ConnectionErrorKind, ConnectionManager, Error, Result,
};

#[derive(Debug, Default)]
struct MockState {
    broken: AtomicBool,
    fail_close: AtomicBool,
    pings: AtomicUsize,
    closed: AtomicUsize,
}

/// Shared view of one mock connection's state.
#[derive(Debug, Clone)]
pub struct ConnProbe(Arc<MockState>);

impl ConnProbe {
    /// Make every subsequent ping fail.
    pub fn break_connection(&self) {
        self.0.broken.store(true, Ordering::SeqCst);
    }

    pub fn fail_close(&self) {
        self.0.fail_close.store(true, Ordering::SeqCst);
    }

    pub fn pings(&self) -> usize {
        self.0.pings.load(Ordering::SeqCst)
    }

    /// Number of times close was called (0 or 1).
    pub fn closed(&self) -> usize {
        self.0.closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct MockConnection {
    pub id: usize,
    state: Arc<MockState>,
}

impl MockConnection {
    pub fn healthy() -> Self {
        Self {
            id: 0,
            state: Arc::new(MockState::default()),
        }
    }

    pub fn probe(&self) -> ConnProbe {
        ConnProbe(Arc::clone(&self.state))
    }
}

impl Connection for MockConnection {
    fn execute_raw(&self, _sql: &str) -> Result<()> {
        if self.state.broken.load(Ordering::SeqCst) {
            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Disconnected,
                message: format!("mock connection {} is broken", self.id),
                source: None,
            }));
        }
        Ok(())
    }

    fn ping(&self) -> Result<()> {
        self.state.pings.fetch_add(1, Ordering::SeqCst);
        self.execute_raw("SELECT 1")
    }

    fn close(self) -> Result<()> {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_close.load(Ordering::SeqCst) {
            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Close,
                message: "mock close failure".to_string(),
                source: None,
            }));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ManagerState {
    created: AtomicUsize,
    configured: AtomicUsize,
    fail_connect: AtomicBool,
    born_broken: AtomicBool,
    probes: Mutex<Vec<ConnProbe>>,
}

/// Manager that records every connection it opens.
///
/// Clones share state, so a test keeps one clone and hands another to the pool.
#[derive(Debug, Clone, Default)]
pub struct MockManager(Arc<ManagerState>);

impl MockManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> usize {
        self.0.created.load(Ordering::SeqCst)
    }

    pub fn configured(&self) -> usize {
        self.0.configured.load(Ordering::SeqCst)
    }

    /// Make future `connect` calls fail.
    pub fn set_fail_connect(&self, fail: bool) {
        self.0.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Make future connections fail their health probe from the start.
    pub fn set_born_broken(&self, broken: bool) {
        self.0.born_broken.store(broken, Ordering::SeqCst);
    }

    /// Probes for every connection opened so far, in creation order.
    pub fn probes(&self) -> Vec<ConnProbe> {
        self.0.probes.lock().clone()
    }

    /// Number of opened connections that have been closed.
    pub fn closed(&self) -> usize {
        self.0.probes.lock().iter().map(ConnProbe::closed).sum()
    }

    pub fn break_all(&self) {
        for probe in self.0.probes.lock().iter() {
            probe.break_connection();
        }
    }
}

impl ConnectionManager for MockManager {
    type Connection = MockConnection;

    fn connect(&self) -> Result<MockConnection> {
        if self.0.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Connect,
                message: "mock connect failure".to_string(),
                source: None,
            }));
        }
        let id = self.0.created.fetch_add(1, Ordering::SeqCst);
        let conn = MockConnection {
            id,
            state: Arc::new(MockState::default()),
        };
        if self.0.born_broken.load(Ordering::SeqCst) {
            conn.state.broken.store(true, Ordering::SeqCst);
        }
        self.0.probes.lock().push(conn.probe());
        Ok(conn)
    }

    fn configure(&self, _conn: &MockConnection) -> Result<()> {
        self.0.configured.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn target(&self) -> &str {
        "mock"
    }
}
