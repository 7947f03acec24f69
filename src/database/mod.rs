//! Monitored database sessions.
//!
//! # Data Flow
//! ```text
//! SessionManager::acquire  (envelope: db.acquire)
//!     → ConnectionPool::checkout
//!     → MonitoredSession (Active; gauges +1)
//!     → execute(StatementKind, ..) marks the session mutated on writes
//! SessionManager::release  (envelope: db.release)
//!     → mutated?  commit (envelope: db.commit)
//!     → failed?   rollback (envelope: db.rollback)
//!     → ConnectionPool::checkin (gauges -1)
//! ```
//!
//! # Design Decisions
//! - The ORM is abstracted behind `ConnectionPool`/`Connection`
//! - `release` consumes the session, so double release cannot compile
//! - A session dropped without release is rolled back and counted as leaked

pub mod memory;
pub mod session;

use std::fmt;

use futures_util::future::BoxFuture;
use thiserror::Error;

pub use memory::MemoryPool;
pub use session::{MonitoredSession, SessionError, SessionManager, SessionState};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DbError {
    #[error("connection pool exhausted")]
    PoolExhausted,

    #[error("statement failed: {0}")]
    Statement(String),

    #[error("commit failed: {0}")]
    Commit(String),

    #[error("connection lost")]
    ConnectionLost,
}

/// Intent of a statement; anything but `Select` counts as a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Ddl,
}

impl StatementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::Select => "select",
            StatementKind::Insert => "insert",
            StatementKind::Update => "update",
            StatementKind::Delete => "delete",
            StatementKind::Ddl => "ddl",
        }
    }

    pub fn is_write(&self) -> bool {
        !matches!(self, StatementKind::Select)
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One checked-out database connection.
pub trait Connection: Send {
    /// Run a statement, returning the affected row count.
    fn execute<'a>(&'a mut self, statement: &'a str) -> BoxFuture<'a, Result<u64, DbError>>;

    fn commit(&mut self) -> BoxFuture<'_, Result<(), DbError>>;

    fn rollback(&mut self) -> BoxFuture<'_, Result<(), DbError>>;
}

pub trait ConnectionPool: Send + Sync {
    fn checkout(&self) -> BoxFuture<'_, Result<Box<dyn Connection>, DbError>>;

    fn checkin(&self, connection: Box<dyn Connection>);
}
