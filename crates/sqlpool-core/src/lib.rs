//! Core types and traits for sqlpool.
//!
//! This crate provides the shared vocabulary between drivers and the pool:
//!
//! - `Connection` trait for a single raw database connection
//! - `ConnectionManager` trait for opening and configuring connections
//! - `Error` taxonomy separating caller-visible pool conditions from
//!   driver-level failures

pub mod connection;
pub mod error;

pub use connection::{Connection, ConnectionManager};
pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, Error, PoolError, PoolErrorKind,
    QueryError, QueryErrorKind, Result,
};
