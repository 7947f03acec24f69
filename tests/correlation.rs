//! Log records and spans of concurrent operations stay paired.

mod common;

use std::collections::{HashMap, HashSet};

use common::{flushed_logs, telemetry_with, test_config, CallError};
use identity_telemetry::observability::correlation::{self, CorrelationContext};
use identity_telemetry::observability::tracing::TraceContext;
use identity_telemetry::observability::{
    AttrValue, AttributeExtractor, OperationDescriptor, ResultExtractor, Settled,
};

const TASKS: usize = 128;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_operations_keep_their_own_trace() {
    let (telemetry, transport) = telemetry_with(&test_config());
    let envelope = telemetry.envelope(OperationDescriptor::user_operation("update"));

    let mut handles = Vec::with_capacity(TASKS);
    for i in 0..TASKS {
        let envelope = envelope.clone();
        handles.push(tokio::spawn(async move {
            let marker = format!("m{}", i);
            let extractor = ResultExtractor::new().attribute("marker", marker.clone());
            let seen = envelope
                .run(&extractor, async {
                    tokio::task::yield_now().await;
                    Ok::<_, CallError>(correlation::current())
                })
                .await
                .unwrap();
            (marker, seen)
        }));
    }

    let mut seen_by_marker = HashMap::new();
    for handle in handles {
        let (marker, seen) = handle.await.unwrap();
        seen_by_marker.insert(marker, seen);
    }

    let logs = flushed_logs(&telemetry, &transport).await;
    let spans = telemetry.span_buffer().drain();
    assert_eq!(logs.len(), TASKS);
    assert_eq!(spans.len(), TASKS);

    let spans_by_marker: HashMap<String, _> = spans
        .iter()
        .map(|s| (s.attribute_str("marker").unwrap().to_string(), s))
        .collect();

    for record in &logs {
        let Some(AttrValue::Str(marker)) = record.extra.get("marker") else {
            panic!("record without marker: {:?}", record);
        };
        let span = spans_by_marker[marker];
        let seen = &seen_by_marker[marker];
        assert_eq!(record.trace_id.as_deref(), Some(span.trace_id.as_str()));
        assert_eq!(record.span_id.as_deref(), Some(span.span_id.as_str()));
        assert_eq!(seen.trace_id_hex().as_deref(), Some(span.trace_id.as_str()));
        assert!(span.parent_span_id.is_none());
    }

    let distinct: HashSet<_> = spans.iter().map(|s| s.trace_id.clone()).collect();
    assert_eq!(distinct.len(), TASKS);
}

#[tokio::test]
async fn test_nested_operations_share_the_trace() {
    let (telemetry, transport) = telemetry_with(&test_config());
    let outer = telemetry.envelope(OperationDescriptor::user_operation("create"));
    let inner = telemetry.envelope(OperationDescriptor::database_operation("insert", "users"));

    outer
        .run(&ResultExtractor::new(), async {
            inner
                .run(&ResultExtractor::new(), async { Ok::<_, CallError>(()) })
                .await
        })
        .await
        .unwrap();

    let spans = telemetry.span_buffer().drain();
    let db = spans.iter().find(|s| s.name == "db.insert").unwrap();
    let user = spans.iter().find(|s| s.name == "user.create").unwrap();
    assert_eq!(db.trace_id, user.trace_id);
    assert_eq!(db.parent_span_id.as_deref(), Some(user.span_id.as_str()));

    let logs = flushed_logs(&telemetry, &transport).await;
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|r| r.trace_id.as_deref() == Some(user.trace_id.as_str())));
    // the inner operation settles first
    assert_eq!(logs[0].span_id.as_deref(), Some(db.span_id.as_str()));
}

#[tokio::test]
async fn test_remote_parent_is_continued() {
    let (telemetry, transport) = telemetry_with(&test_config());
    let envelope = telemetry.envelope(OperationDescriptor::authentication("login"));

    let parent =
        TraceContext::from_traceparent("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01")
            .unwrap();
    correlation::scope(CorrelationContext::from_trace_context(&parent), async {
        envelope
            .run(&ResultExtractor::new(), async { Ok::<_, CallError>(()) })
            .await
    })
    .await
    .unwrap();

    let spans = telemetry.span_buffer().drain();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].trace_id, "4bf92f3577b34da6a3ce929d0e0e4736");
    assert_eq!(spans[0].parent_span_id.as_deref(), Some("00f067aa0ba902b7"));

    let logs = flushed_logs(&telemetry, &transport).await;
    assert_eq!(logs[0].trace_id.as_deref(), Some("4bf92f3577b34da6a3ce929d0e0e4736"));
}

#[tokio::test]
async fn test_identity_is_masked_in_context() {
    let (telemetry, _transport) = telemetry_with(&test_config());
    let envelope = telemetry.envelope(OperationDescriptor::authentication("login"));

    struct Login;

    impl AttributeExtractor<CorrelationContext, CallError> for Login {
        fn identity(&self) -> Option<&str> {
            Some("alice@example.com")
        }

        fn on_ok(&self, _value: &CorrelationContext) -> Settled {
            Settled::success()
        }

        fn on_err(&self, _error: &CallError) -> Settled {
            Settled::failure("denied")
        }
    }

    let seen = envelope
        .run(&Login, async { Ok::<_, CallError>(correlation::current()) })
        .await
        .unwrap();
    assert_eq!(seen.masked_identity.as_deref(), Some("a***@example.com"));
    assert!(correlation::current().masked_identity.is_none());
}
