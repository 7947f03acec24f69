//! Broken telemetry never changes what the wrapped call returns.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    flushed_logs, telemetry_with, test_config, CallError, FailingExporter, FailingSink,
    MemoryTransport,
    PanickingExporter, PanickingSink, RecordingSink,
};
use futures_util::FutureExt;
use identity_telemetry::identity::{NewUser, UserDirectory};
use identity_telemetry::observability::resource::Resource;
use identity_telemetry::observability::tracing::{Sampler, SpanExporter, TraceRecorder};
use identity_telemetry::observability::{
    Envelope, EnvelopeChain, FailureLedger, OperationDescriptor, OutcomeSink, OutcomeStatus,
    ResultExtractor, SinkKind,
    Telemetry,
};

fn tracer_with(exporter: Arc<dyn SpanExporter>) -> TraceRecorder {
    TraceRecorder::new(Sampler::always_on(), exporter, Resource::default())
}

fn broken_envelope(
    ledger: &Arc<FailureLedger>,
    sink: Arc<dyn OutcomeSink>,
    exporter: Arc<dyn SpanExporter>,
) -> Envelope {
    Envelope::new(OperationDescriptor::user_operation("update"), ledger.clone())
        .with_metrics(sink.clone())
        .with_logs(sink)
        .with_tracer(tracer_with(exporter))
}

#[tokio::test]
async fn test_failing_sinks_leave_results_untouched() {
    let ledger = Arc::new(FailureLedger::new());
    let envelope = broken_envelope(&ledger, Arc::new(FailingSink), Arc::new(FailingExporter));

    let value = envelope
        .run(&ResultExtractor::new(), async { Ok::<_, CallError>(41 + 1) })
        .await;
    assert_eq!(value, Ok(42));

    let err = envelope
        .run(&ResultExtractor::new(), async { Err::<u32, _>(CallError::Denied) })
        .await;
    assert_eq!(err, Err(CallError::Denied));

    assert_eq!(ledger.failures(SinkKind::Metrics), 2);
    assert_eq!(ledger.failures(SinkKind::Logs), 2);
    assert_eq!(ledger.failures(SinkKind::Traces), 2);
}

#[tokio::test]
async fn test_panicking_sinks_are_contained() {
    let ledger = Arc::new(FailureLedger::new());
    let envelope = broken_envelope(&ledger, Arc::new(PanickingSink), Arc::new(PanickingExporter));

    let err = envelope
        .run(&ResultExtractor::new(), async {
            Err::<(), _>(CallError::Crashed("disk full".into()))
        })
        .await;
    assert_eq!(err, Err(CallError::Crashed("disk full".into())));

    assert_eq!(ledger.failures(SinkKind::Metrics), 1);
    assert_eq!(ledger.failures(SinkKind::Logs), 1);
    assert_eq!(ledger.failures(SinkKind::Traces), 1);
}

#[tokio::test]
async fn test_one_broken_sink_does_not_starve_the_others() {
    let ledger = Arc::new(FailureLedger::new());
    let logs = Arc::new(RecordingSink::default());
    let envelope = Envelope::new(OperationDescriptor::authentication("login"), ledger.clone())
        .with_metrics(Arc::new(PanickingSink))
        .with_logs(logs.clone());

    let result = envelope
        .run(&ResultExtractor::new(), async { Ok::<_, CallError>("token") })
        .await;
    assert_eq!(result, Ok("token"));
    assert_eq!(logs.len(), 1);
    assert_eq!(logs.outcomes()[0].status, OutcomeStatus::Success);
    assert_eq!(ledger.failures(SinkKind::Metrics), 1);
    assert_eq!(ledger.failures(SinkKind::Logs), 0);
}

#[tokio::test]
async fn test_error_passes_through_nested_chain() {
    let ledger = Arc::new(FailureLedger::new());
    let inner = Arc::new(RecordingSink::default());
    let outer = Arc::new(RecordingSink::default());
    let db_update = OperationDescriptor::database_operation("update", "users");
    let chain = EnvelopeChain::new()
        .layer(
            Envelope::new(OperationDescriptor::user_operation("update"), ledger.clone())
                .with_logs(outer.clone()),
        )
        .layer(
            Envelope::new(db_update, ledger.clone())
                .with_logs(inner.clone()),
        )
        .layer(
            Envelope::new(OperationDescriptor::user_operation("audit"), ledger.clone())
                .with_metrics(Arc::new(FailingSink)),
        );

    let extractor = ResultExtractor::new();
    let result: Result<(), CallError> = chain
        .run(&extractor, async { Err::<(), _>(CallError::Crashed("timeout".into())) }.boxed())
        .await;

    assert_eq!(result, Err(CallError::Crashed("timeout".into())));
    assert_eq!(inner.outcomes()[0].status, OutcomeStatus::Error);
    assert_eq!(outer.outcomes()[0].status, OutcomeStatus::Error);
    assert_eq!(ledger.failures(SinkKind::Metrics), 1);
}

#[tokio::test]
async fn test_unreachable_log_backend_does_not_fail_operations() {
    let (telemetry, transport) = telemetry_with(&test_config());
    transport.set_failing(true);
    let directory = UserDirectory::new(telemetry.clone());

    let user = directory
        .create_user(NewUser::new("carol@example.com", "Carol", "long-enough"))
        .await;
    assert!(user.is_ok());

    let report = telemetry.emitter().flush().await;
    assert_eq!(report.exported, 0);
    assert_eq!(report.failed_batches, 1);
    assert_eq!(report.lost_records, 1);
    // first attempt plus one retry
    assert_eq!(transport.pushes(), 2);

    transport.set_failing(false);
    directory
        .create_user(NewUser::new("dave@example.com", "Dave", "long-enough"))
        .await
        .unwrap();
    assert_eq!(flushed_logs(&telemetry, &transport).await.len(), 1);
}

#[tokio::test]
async fn test_shutdown_flushes_with_backend_down() {
    let (telemetry, transport) = telemetry_with(&test_config());
    telemetry.start();
    transport.set_failing(true);

    let directory = UserDirectory::new(telemetry.clone());
    let _ = directory.authenticate_user("eve@example.com", "nope").await;

    let report = tokio::time::timeout(Duration::from_secs(5), telemetry.shutdown())
        .await
        .expect("shutdown hung");
    assert_eq!(report.exported, 0);
    assert_eq!(telemetry.emitter().buffered(), 0);
}

#[tokio::test]
async fn test_disabled_everything_still_runs_calls() {
    let mut config = test_config();
    config.metrics.enabled = false;
    config.tracing.enabled = false;
    let telemetry = Telemetry::with_transport(&config, Arc::new(MemoryTransport::default()));

    let envelope = telemetry.envelope(OperationDescriptor::token_operation("generate", "access"));
    let result = envelope
        .run(&ResultExtractor::new(), async { Ok::<_, CallError>(7) })
        .await;
    assert_eq!(result, Ok(7));
    assert!(telemetry.snapshot().series_named("token_operations_total").next().is_none());
}
