//! # tide-store
//!
//! `SQLite` state store for per-session todo lists.
//!
//! - [`TodoStore`]: atomic load-or-seed and full-replace save
//! - [`connection`]: r2d2 pool with WAL and foreign-key pragmas
//! - [`migrations`]: embedded, versioned schema
//!
//! All operations are blocking; async callers run them on the blocking pool.

#![deny(unsafe_code)]

pub mod connection;
pub mod errors;
pub mod migrations;
pub mod store;

pub use connection::{ConnectionConfig, ConnectionPool};
pub use errors::{Result, StoreError};
pub use store::TodoStore;
