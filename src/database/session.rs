//! Session lifecycle with commit-on-mutation.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::database::{Connection, ConnectionPool, DbError, StatementKind};
use crate::observability::classify::{FailureCategory, ResultExtractor};
use crate::observability::descriptor::OperationDescriptor;
use crate::observability::envelope::Envelope;
use crate::observability::metrics::{
    MetricRegistry, ACTIVE_SESSIONS, DATABASE_CONNECTIONS_ACTIVE, DATABASE_SESSIONS_LEAKED_TOTAL,
};
use crate::observability::sink::{isolate, FailureLedger, SinkKind};
use crate::observability::telemetry::Telemetry;

/// Table label used for the session's own database_operation series.
pub const SESSION_TABLE: &str = "session";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Active,
    Committing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Idle => "idle",
            SessionState::Active => "active",
            SessionState::Committing => "committing",
            SessionState::Closed => "closed",
        })
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session {id} is {state}, expected active")]
    InvalidState { id: Uuid, state: SessionState },

    #[error(transparent)]
    Db(#[from] DbError),
}

impl FailureCategory for SessionError {
    fn failure_category(&self) -> Option<Cow<'static, str>> {
        match self {
            SessionError::InvalidState { .. } => Some(Cow::Borrowed("invalid_state")),
            SessionError::Db(DbError::PoolExhausted) => Some(Cow::Borrowed("pool_exhausted")),
            SessionError::Db(_) => None,
        }
    }
}

struct ManagerInner {
    pool: Arc<dyn ConnectionPool>,
    registry: Arc<MetricRegistry>,
    ledger: Arc<FailureLedger>,
    acquire: Envelope,
    release: Envelope,
    commit: Envelope,
    rollback: Envelope,
}

/// Hands out monitored sessions over a connection pool.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl SessionManager {
    pub fn new(pool: Arc<dyn ConnectionPool>, telemetry: &Telemetry) -> Self {
        let envelope = |op: &'static str| {
            telemetry.envelope(OperationDescriptor::database_operation(op, SESSION_TABLE))
        };
        Self {
            inner: Arc::new(ManagerInner {
                pool,
                registry: telemetry.registry().clone(),
                ledger: telemetry.ledger().clone(),
                acquire: envelope("acquire"),
                release: envelope("release"),
                commit: envelope("commit"),
                rollback: envelope("rollback"),
            }),
        }
    }

    /// Check out a connection. `idle → active`.
    pub async fn acquire(&self) -> Result<MonitoredSession, SessionError> {
        let inner = &self.inner;
        let connection = inner
            .acquire
            .run(&ResultExtractor::new(), async {
                inner.pool.checkout().await.map_err(SessionError::from)
            })
            .await?;

        let mut session = MonitoredSession {
            id: Uuid::new_v4(),
            acquired_at: Utc::now(),
            started: Instant::now(),
            connection: Some(connection),
            mutated: false,
            failed: false,
            state: SessionState::Idle,
            manager: self.clone(),
        };
        self.adjust_gauges(1);
        session.state = SessionState::Active;
        tracing::debug!(session = %session.id, "Session acquired");
        Ok(session)
    }

    /// Release the session: commit if it mutated anything, roll back if a
    /// statement failed, otherwise just return the connection.
    pub async fn release(&self, mut session: MonitoredSession) -> Result<(), SessionError> {
        session.ensure_active()?;
        let inner = &self.inner;
        let (mutated, failed) = (session.mutated, session.failed);
        if mutated && !failed {
            session.state = SessionState::Committing;
        }

        let id = session.id;
        let extractor = ResultExtractor::new().attribute("mutated", mutated);
        let connection = session.connection_mut()?;
        let result = inner
            .release
            .run(&extractor, async {
                if failed {
                    self.rollback_with(connection).await
                } else if mutated {
                    let committed = inner
                        .commit
                        .run(&ResultExtractor::new(), async {
                            connection.commit().await.map_err(SessionError::from)
                        })
                        .await;
                    if committed.is_err() {
                        if let Err(e) = self.rollback_with(connection).await {
                            tracing::warn!(
                                session = %id,
                                error = %e,
                                "Rollback after failed commit failed"
                            );
                        }
                    }
                    committed
                } else {
                    Ok(())
                }
            })
            .await;

        if result.is_err() {
            session.failed = true;
        }
        self.close(&mut session);
        result
    }

    /// Roll back and release. Any state `→ closed` with the error flag.
    pub async fn abort(&self, mut session: MonitoredSession) -> Result<(), SessionError> {
        session.ensure_active()?;
        session.failed = true;
        let connection = session.connection_mut()?;
        let result = self.rollback_with(connection).await;
        self.close(&mut session);
        result
    }

    async fn rollback_with(
        &self,
        connection: &mut Box<dyn Connection>,
    ) -> Result<(), SessionError> {
        self.inner
            .rollback
            .run(&ResultExtractor::new(), async {
                connection.rollback().await.map_err(SessionError::from)
            })
            .await
    }

    fn close(&self, session: &mut MonitoredSession) {
        session.state = SessionState::Closed;
        if let Some(connection) = session.connection.take() {
            self.inner.pool.checkin(connection);
        }
        self.adjust_gauges(-1);
        tracing::debug!(
            session = %session.id,
            mutated = session.mutated,
            failed = session.failed,
            held_ms = session.held_for().as_millis() as u64,
            "Session released"
        );
    }

    fn leaked(&self, id: Uuid, connection: Option<Box<dyn Connection>>, held_for: Duration) {
        self.inner.registry.increment_internal(DATABASE_SESSIONS_LEAKED_TOTAL);
        self.adjust_gauges(-1);
        tracing::error!(
            session = %id,
            held_ms = held_for.as_millis() as u64,
            "Session dropped without release, rolling back"
        );

        let Some(mut connection) = connection else {
            return;
        };
        let pool = self.inner.pool.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = connection.rollback().await {
                        tracing::warn!(
                            session = %id,
                            error = %e,
                            "Rollback of leaked session failed"
                        );
                    }
                    pool.checkin(connection);
                });
            }
            Err(_) => pool.checkin(connection),
        }
    }

    fn adjust_gauges(&self, delta: i64) {
        let registry = &self.inner.registry;
        isolate(SinkKind::Metrics, &self.inner.ledger, || {
            registry.gauge_add(DATABASE_CONNECTIONS_ACTIVE, &[], delta)?;
            registry.gauge_add(ACTIVE_SESSIONS, &[], delta)?;
            Ok(())
        });
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager").finish_non_exhaustive()
    }
}

/// A connection owned by exactly one task from acquire to release.
pub struct MonitoredSession {
    id: Uuid,
    acquired_at: DateTime<Utc>,
    started: Instant,
    connection: Option<Box<dyn Connection>>,
    mutated: bool,
    failed: bool,
    state: SessionState,
    manager: SessionManager,
}

impl MonitoredSession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_mutated(&self) -> bool {
        self.mutated
    }

    pub fn has_failed(&self) -> bool {
        self.failed
    }

    pub fn held_for(&self) -> Duration {
        self.started.elapsed()
    }

    /// Run a statement. Writes mark the session mutated; a failing
    /// statement flags the session so release rolls back.
    pub async fn execute(
        &mut self,
        kind: StatementKind,
        statement: &str,
    ) -> Result<u64, SessionError> {
        self.ensure_active()?;
        if kind.is_write() {
            self.mutated = true;
        }
        let result = self.connection_mut()?.execute(statement).await;
        result.map_err(|e| {
            self.failed = true;
            tracing::warn!(session = %self.id, kind = %kind, error = %e, "Statement failed");
            SessionError::from(e)
        })
    }

    /// Flag a write performed outside [`execute`](Self::execute).
    pub fn mark_mutation(&mut self) -> Result<(), SessionError> {
        self.ensure_active()?;
        self.mutated = true;
        Ok(())
    }

    fn ensure_active(&self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Active => Ok(()),
            state => Err(SessionError::InvalidState { id: self.id, state }),
        }
    }

    fn connection_mut(&mut self) -> Result<&mut Box<dyn Connection>, SessionError> {
        let (id, state) = (self.id, self.state);
        self.connection.as_mut().ok_or(SessionError::InvalidState { id, state })
    }
}

impl Drop for MonitoredSession {
    fn drop(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        self.failed = true;
        let connection = self.connection.take();
        self.manager.leaked(self.id, connection, self.held_for());
    }
}

impl fmt::Debug for MonitoredSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitoredSession")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("mutated", &self.mutated)
            .field("failed", &self.failed)
            .finish()
    }
}
