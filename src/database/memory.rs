//! In-memory connection pool for the demo service and tests.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::database::{Connection, ConnectionPool, DbError};

#[derive(Debug, Default)]
struct PoolCounters {
    checked_out: AtomicUsize,
    statements: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    fail_commits: AtomicBool,
    fail_rollbacks: AtomicBool,
}

/// Fixed-capacity pool whose connections only count what they are asked to do.
#[derive(Debug, Clone)]
pub struct MemoryPool {
    capacity: usize,
    counters: Arc<PoolCounters>,
}

impl MemoryPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            counters: Arc::new(PoolCounters::default()),
        }
    }

    pub fn checked_out(&self) -> usize {
        self.counters.checked_out.load(Ordering::SeqCst)
    }

    pub fn statements(&self) -> u64 {
        self.counters.statements.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> u64 {
        self.counters.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> u64 {
        self.counters.rollbacks.load(Ordering::SeqCst)
    }

    /// Make every following commit fail.
    pub fn fail_commits(&self, fail: bool) {
        self.counters.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Make every following rollback fail.
    pub fn fail_rollbacks(&self, fail: bool) {
        self.counters.fail_rollbacks.store(fail, Ordering::SeqCst);
    }
}

struct MemoryConnection {
    counters: Arc<PoolCounters>,
}

impl Connection for MemoryConnection {
    fn execute<'a>(&'a mut self, statement: &'a str) -> BoxFuture<'a, Result<u64, DbError>> {
        Box::pin(async move {
            if statement.trim().is_empty() {
                return Err(DbError::Statement("empty statement".into()));
            }
            self.counters.statements.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        })
    }

    fn commit(&mut self) -> BoxFuture<'_, Result<(), DbError>> {
        Box::pin(async move {
            if self.counters.fail_commits.load(Ordering::SeqCst) {
                return Err(DbError::Commit("deadlock detected".into()));
            }
            self.counters.commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn rollback(&mut self) -> BoxFuture<'_, Result<(), DbError>> {
        Box::pin(async move {
            self.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
            if self.counters.fail_rollbacks.load(Ordering::SeqCst) {
                return Err(DbError::ConnectionLost);
            }
            Ok(())
        })
    }
}

impl ConnectionPool for MemoryPool {
    fn checkout(&self) -> BoxFuture<'_, Result<Box<dyn Connection>, DbError>> {
        Box::pin(async move {
            let counters = &self.counters;
            let claimed = counters
                .checked_out
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    (n < self.capacity).then_some(n + 1)
                });
            match claimed {
                Ok(_) => Ok(Box::new(MemoryConnection {
                    counters: counters.clone(),
                }) as Box<dyn Connection>),
                Err(_) => Err(DbError::PoolExhausted),
            }
        })
    }

    fn checkin(&self, _connection: Box<dyn Connection>) {
        let _ = self
            .counters
            .checked_out
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}
