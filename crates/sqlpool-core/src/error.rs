//! Error types for pool and driver operations.

use std::fmt;
use std::time::Duration;

/// The primary error type for all sqlpool operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (open, disconnect, health)
    Connection(ConnectionError),
    /// Statement execution errors
    Query(QueryError),
    /// Pool errors (checkout timeout, use after close)
    Pool(PoolError),
    /// Configuration errors
    Config(ConfigError),
    /// I/O errors
    Io(std::io::Error),
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to open the database
    Connect,
    /// Connection lost or unusable
    Disconnected,
    /// Closing the raw connection failed
    Close,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Permission denied
    Permission,
    /// Database busy or locked
    Busy,
    /// Data too large for column
    DataTruncation,
    /// Interrupted
    Cancelled,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct PoolError {
    pub kind: PoolErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolErrorKind {
    /// No connection became available within the acquire timeout
    Timeout,
    /// The pool has been closed
    Closed,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl PoolError {
    /// Checkout timed out after waiting `waited`.
    pub fn timeout(waited: Duration) -> Self {
        Self {
            kind: PoolErrorKind::Timeout,
            message: format!("Timed out waiting for a connection after {:?}", waited),
            source: None,
        }
    }

    /// Attach the underlying failure, e.g. the last connection error seen
    /// before a checkout gave up.
    pub fn with_source(
        mut self,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        self.source = Some(source.into());
        self
    }

    /// The attached cause, if it is one of ours.
    pub fn cause(&self) -> Option<&Error> {
        self.source.as_deref()?.downcast_ref::<Error>()
    }

    /// Checkout attempted on a closed pool.
    pub fn closed() -> Self {
        Self {
            kind: PoolErrorKind::Closed,
            message: "Pool is closed".to_string(),
            source: None,
        }
    }
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }
}

impl Error {
    /// Is this a retryable error (checkout timeout, busy database)?
    ///
    /// Callers serving requests should map these to an "overloaded, retry
    /// later" response rather than a generic failure.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Pool(p) => matches!(p.kind, PoolErrorKind::Timeout),
            Error::Query(q) => matches!(q.kind, QueryErrorKind::Busy),
            _ => false,
        }
    }

    pub fn is_pool_timeout(&self) -> bool {
        matches!(self, Error::Pool(p) if p.kind == PoolErrorKind::Timeout)
    }

    pub fn is_pool_closed(&self) -> bool {
        matches!(self, Error::Pool(p) if p.kind == PoolErrorKind::Closed)
    }

    /// Is this a connection error that likely requires reopening?
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::Connection(c) => matches!(
                c.kind,
                ConnectionErrorKind::Connect | ConnectionErrorKind::Disconnected
            ),
            Error::Io(_) => true,
            _ => false,
        }
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => write!(f, "Query error: {}", e.message),
            Error::Pool(e) => write!(f, "Pool error: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let boxed = match self {
            Error::Connection(e) => e.source.as_deref(),
            Error::Query(e) => e.source.as_deref(),
            Error::Pool(e) => e.source.as_deref(),
            Error::Config(e) => e.source.as_deref(),
            Error::Io(e) => return Some(e),
            Error::Custom(_) => None,
        };
        boxed.map(|err| err as &(dyn std::error::Error + 'static))
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<PoolError> for Error {
    fn from(err: PoolError) -> Self {
        Error::Pool(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Result type alias for sqlpool operations.
pub type Result<T> = std::result::Result<T, Error>;
