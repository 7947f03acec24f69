//! Buffered structured log emitter.
//!
//! `emit` never blocks on the network: records go into a bounded in-memory
//! queue and a single background flusher ships them in batches, on a timer or
//! as soon as a full batch is waiting.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;

use crate::config::schema::LogShippingConfig;
use crate::observability::logging::record::{LogLevel, LogRecord};
use crate::observability::logging::transport::{LogTransport, TransportError};
use crate::observability::metrics::{
    MetricRegistry, LOG_EXPORT_FAILURES_TOTAL, LOG_RECORDS_DROPPED_TOTAL,
};
use crate::observability::resource::Resource;
use crate::observability::sink::{panic_message, OutcomeSink, Recording, SinkError};
use crate::resilience::backoff::RetryPolicy;

/// Buffering and retry parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmitterSettings {
    pub batch_interval: Duration,
    pub max_batch_size: usize,
    pub max_buffered_records: usize,
    pub push_timeout: Duration,
    pub retry: RetryPolicy,
}

impl EmitterSettings {
    pub fn from_config(config: &LogShippingConfig) -> Self {
        Self {
            batch_interval: Duration::from_secs(config.batch_interval_secs.max(1)),
            max_batch_size: config.max_batch_size.max(1),
            max_buffered_records: config.max_buffered_records.max(1),
            push_timeout: Duration::from_secs(config.timeout_secs.max(1)),
            retry: RetryPolicy::from_config(config),
        }
    }
}

impl Default for EmitterSettings {
    fn default() -> Self {
        Self::from_config(&LogShippingConfig::default())
    }
}

/// Counters since the emitter was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitterStats {
    pub emitted: u64,
    pub exported: u64,
    pub dropped: u64,
    pub failed_batches: u64,
}

/// Result of one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub exported: usize,
    pub failed_batches: usize,
    pub lost_records: usize,
}

struct EmitterInner {
    buffer: Mutex<VecDeque<LogRecord>>,
    wake: Notify,
    flush_lock: tokio::sync::Mutex<()>,
    transport: Arc<dyn LogTransport>,
    settings: EmitterSettings,
    resource: Resource,
    registry: Option<Arc<MetricRegistry>>,
    emitted: AtomicU64,
    exported: AtomicU64,
    dropped: AtomicU64,
    failed_batches: AtomicU64,
}

/// Log sink. Cheap to clone; clones share the buffer.
#[derive(Clone)]
pub struct LogEmitter {
    inner: Arc<EmitterInner>,
}

impl LogEmitter {
    pub fn new(
        transport: Arc<dyn LogTransport>,
        settings: EmitterSettings,
        resource: Resource,
        registry: Option<Arc<MetricRegistry>>,
    ) -> Self {
        Self {
            inner: Arc::new(EmitterInner {
                buffer: Mutex::new(VecDeque::new()),
                wake: Notify::new(),
                flush_lock: tokio::sync::Mutex::new(()),
                transport,
                settings,
                resource,
                registry,
                emitted: AtomicU64::new(0),
                exported: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                failed_batches: AtomicU64::new(0),
            }),
        }
    }

    pub fn resource(&self) -> &Resource {
        &self.inner.resource
    }

    pub fn settings(&self) -> &EmitterSettings {
        &self.inner.settings
    }

    /// Queue a record. The privacy policy is applied first.
    pub fn emit(&self, record: LogRecord) {
        let record = record.scrubbed();
        mirror(&record);

        let inner = &self.inner;
        let (dropped, batch_ready) = {
            let mut buffer = inner.buffer.lock().unwrap_or_else(PoisonError::into_inner);
            let dropped = if buffer.len() >= inner.settings.max_buffered_records {
                buffer.pop_front();
                true
            } else {
                false
            };
            buffer.push_back(record);
            (dropped, buffer.len() >= inner.settings.max_batch_size)
        };

        inner.emitted.fetch_add(1, Ordering::Relaxed);
        if dropped {
            inner.dropped.fetch_add(1, Ordering::Relaxed);
            if let Some(registry) = &inner.registry {
                registry.increment_internal(LOG_RECORDS_DROPPED_TOTAL);
            }
        }
        if batch_ready {
            inner.wake.notify_one();
        }
    }

    /// Records waiting for the next flush.
    pub fn buffered(&self) -> usize {
        self.inner.buffer.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn stats(&self) -> EmitterStats {
        let inner = &self.inner;
        EmitterStats {
            emitted: inner.emitted.load(Ordering::Relaxed),
            exported: inner.exported.load(Ordering::Relaxed),
            dropped: inner.dropped.load(Ordering::Relaxed),
            failed_batches: inner.failed_batches.load(Ordering::Relaxed),
        }
    }

    /// Ship everything buffered when the flush starts.
    ///
    /// Only one flush runs at a time; a second caller waits for the first.
    pub async fn flush(&self) -> FlushReport {
        let inner = &self.inner;
        let _guard = inner.flush_lock.lock().await;
        let mut report = FlushReport::default();

        let mut remaining = self.buffered();
        while remaining > 0 {
            let batch: Vec<LogRecord> = {
                let mut buffer = inner.buffer.lock().unwrap_or_else(PoisonError::into_inner);
                let n = remaining.min(inner.settings.max_batch_size).min(buffer.len());
                buffer.drain(..n).collect()
            };
            if batch.is_empty() {
                break;
            }
            remaining -= batch.len();

            if self.push_with_retry(&batch).await {
                inner.exported.fetch_add(batch.len() as u64, Ordering::Relaxed);
                report.exported += batch.len();
            } else {
                report.failed_batches += 1;
                report.lost_records += batch.len();
            }
        }
        report
    }

    async fn push_with_retry(&self, batch: &[LogRecord]) -> bool {
        let inner = &self.inner;
        let policy = inner.settings.retry;
        let timeout = inner.settings.push_timeout;
        let mut attempt: u32 = 0;

        loop {
            let push = AssertUnwindSafe(inner.transport.push(batch)).catch_unwind();
            let result = match tokio::time::timeout(timeout, push).await {
                Ok(Ok(result)) => result,
                Ok(Err(payload)) => Err(TransportError::Unavailable(format!(
                    "transport panicked: {}",
                    panic_message(payload.as_ref())
                ))),
                Err(_) => Err(TransportError::Timeout(timeout)),
            };

            match result {
                Ok(()) => return true,
                Err(e) if attempt < policy.max_retries => {
                    attempt += 1;
                    let delay = policy.delay_for(attempt);
                    tracing::debug!(
                        transport = inner.transport.name(),
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Log push failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    inner.failed_batches.fetch_add(1, Ordering::Relaxed);
                    if let Some(registry) = &inner.registry {
                        registry.increment_internal(LOG_EXPORT_FAILURES_TOTAL);
                    }
                    tracing::warn!(
                        transport = inner.transport.name(),
                        records = batch.len(),
                        attempts = attempt + 1,
                        error = %e,
                        "Dropping log batch after exhausting retries"
                    );
                    return false;
                }
            }
        }
    }

    /// Start the background flusher. It flushes on every batch interval, when a
    /// full batch is waiting, and one final time on shutdown.
    pub fn spawn_flusher(&self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let emitter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(emitter.inner.settings.batch_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        let report = emitter.flush().await;
                        tracing::info!(
                            exported = report.exported,
                            lost = report.lost_records,
                            "Final log flush complete"
                        );
                        break;
                    }
                    _ = ticker.tick() => {
                        emitter.flush().await;
                    }
                    _ = emitter.inner.wake.notified() => {
                        emitter.flush().await;
                    }
                }
            }
        })
    }
}

impl OutcomeSink for LogEmitter {
    fn record(&self, recording: &Recording<'_>) -> Result<(), SinkError> {
        self.emit(LogRecord::from_recording(recording, &self.inner.resource));
        Ok(())
    }
}

impl std::fmt::Debug for LogEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogEmitter")
            .field("transport", &self.inner.transport.name())
            .field("settings", &self.inner.settings)
            .field("buffered", &self.buffered())
            .finish()
    }
}

/// Mirror a record on the diagnostic channel.
fn mirror(record: &LogRecord) {
    macro_rules! audit {
        ($level:ident) => {
            tracing::$level!(
                target: "identity_telemetry::audit",
                event_type = %record.event_type,
                status = %record.status,
                user_id = record.user_id.as_deref().unwrap_or(""),
                trace_id = record.trace_id.as_deref().unwrap_or(""),
                duration_seconds = record.duration_seconds.unwrap_or_default(),
                "{}",
                record.message
            )
        };
    }

    match record.level {
        LogLevel::Debug => audit!(debug),
        LogLevel::Info => audit!(info),
        LogLevel::Warn => audit!(warn),
        LogLevel::Error => audit!(error),
    }
}
