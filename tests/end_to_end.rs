//! Identity operations observed through every sink at once.

mod common;

use std::sync::Arc;

use common::{flushed_logs, telemetry_with, test_config};
use identity_telemetry::database::{MemoryPool, SessionManager, StatementKind};
use identity_telemetry::identity::{NewUser, UserDirectory};
use identity_telemetry::observability::metrics::{
    AUTHENTICATION_ATTEMPTS_TOTAL, DATABASE_OPERATIONS_TOTAL, FAILED_LOGIN_ATTEMPTS_TOTAL,
    USER_OPERATIONS_TOTAL,
};
use identity_telemetry::observability::AttrValue;

#[tokio::test]
async fn test_failed_login_reaches_every_sink() {
    let (telemetry, transport) = telemetry_with(&test_config());
    let directory = UserDirectory::new(telemetry.clone());

    let result = directory.authenticate_user("a@x.com", "wrong").await;
    assert!(matches!(result, Ok(None)));

    let snapshot = telemetry.snapshot();
    assert_eq!(
        snapshot.counter_value(
            AUTHENTICATION_ATTEMPTS_TOTAL,
            &[("auth_type", "login"), ("status", "failure")]
        ),
        1
    );
    assert_eq!(
        snapshot.counter_value(FAILED_LOGIN_ATTEMPTS_TOTAL, &[("reason", "invalid_credentials")]),
        1
    );

    let logs = flushed_logs(&telemetry, &transport).await;
    assert_eq!(logs.len(), 1);
    let record = &logs[0];
    assert_eq!(record.event_type, "authentication");
    assert_eq!(record.status, "failure");
    assert!(record.user_id.is_none());
    assert_eq!(record.extra.get("email"), Some(&AttrValue::Str("*@x.com".into())));

    let spans = telemetry.span_buffer().drain();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].name, "auth.login");
    assert_eq!(spans[0].attribute_str("auth.status"), Some("failure"));
    assert!(spans[0].status.is_error());
    assert_eq!(record.trace_id.as_deref(), Some(spans[0].trace_id.as_str()));
    assert_eq!(record.span_id.as_deref(), Some(spans[0].span_id.as_str()));
}

#[tokio::test]
async fn test_user_creation_success() {
    let (telemetry, transport) = telemetry_with(&test_config());
    let directory = UserDirectory::new(telemetry.clone());

    let user = directory
        .create_user(NewUser::new("bob@example.com", "Bob", "long-enough"))
        .await
        .unwrap();

    assert_eq!(
        telemetry
            .snapshot()
            .counter_value(
                USER_OPERATIONS_TOTAL,
                &[("operation_type", "create"), ("status", "success")]
            ),
        1
    );

    let logs = flushed_logs(&telemetry, &transport).await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].event_type, "user_operation");
    assert_eq!(logs[0].status, "success");
    assert_eq!(logs[0].user_id.as_deref(), Some(user.id.to_string().as_str()));

    let spans = telemetry.span_buffer().drain();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].attribute_str("user.operation.status"), Some("success"));
    assert_eq!(spans[0].attribute_str("user.id"), Some(user.id.to_string().as_str()));
}

#[tokio::test]
async fn test_duplicate_registration_is_a_failure() {
    let (telemetry, transport) = telemetry_with(&test_config());
    let directory = UserDirectory::new(telemetry.clone());

    directory
        .create_user(NewUser::new("bob@example.com", "Bob", "long-enough"))
        .await
        .unwrap();
    let err = directory
        .create_user(NewUser::new("bob@example.com", "Bob", "long-enough"))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "user already exists");

    assert_eq!(
        telemetry
            .snapshot()
            .counter_value(
                USER_OPERATIONS_TOTAL,
                &[("operation_type", "create"), ("status", "failure")]
            ),
        1
    );
    let logs = flushed_logs(&telemetry, &transport).await;
    assert_eq!(
        logs[1].extra.get("failure_reason"),
        Some(&AttrValue::Str("user_already_exists".into()))
    );
}

#[tokio::test]
async fn test_session_commits_only_after_writes() {
    let (telemetry, _transport) = telemetry_with(&test_config());
    let pool = Arc::new(MemoryPool::new(2));
    let sessions = SessionManager::new(pool.clone(), &telemetry);

    let mut writer = sessions.acquire().await.unwrap();
    writer
        .execute(StatementKind::Insert, "INSERT INTO users VALUES (1)")
        .await
        .unwrap();
    sessions.release(writer).await.unwrap();
    assert_eq!(pool.commits(), 1);

    let mut reader = sessions.acquire().await.unwrap();
    reader.execute(StatementKind::Select, "SELECT 1").await.unwrap();
    sessions.release(reader).await.unwrap();
    assert_eq!(pool.commits(), 1);
    assert_eq!(pool.checked_out(), 0);

    let snapshot = telemetry.snapshot();
    assert_eq!(
        snapshot.counter_value(
            DATABASE_OPERATIONS_TOTAL,
            &[("operation_type", "commit"), ("table", "session"), ("status", "success")]
        ),
        1
    );
    assert_eq!(
        snapshot.counter_value(
            DATABASE_OPERATIONS_TOTAL,
            &[("operation_type", "release"), ("table", "session"), ("status", "success")]
        ),
        2
    );

    // acquire + release per session, plus one commit nested in the first release.
    let spans = telemetry.span_buffer().drain();
    assert_eq!(spans.len(), 5);
    let commit = spans.iter().find(|s| s.name == "db.commit").unwrap();
    let release = spans
        .iter()
        .find(|s| s.name == "db.release" && Some(&s.span_id) == commit.parent_span_id.as_ref())
        .unwrap();
    assert_eq!(release.trace_id, commit.trace_id);
}

#[tokio::test]
async fn test_tracing_disabled_keeps_metrics_and_logs() {
    let mut config = test_config();
    config.tracing.enabled = false;
    let (telemetry, transport) = telemetry_with(&config);
    let directory = UserDirectory::new(telemetry.clone());

    let _ = directory.authenticate_user("a@x.com", "wrong").await;

    assert_eq!(
        telemetry
            .snapshot()
            .counter_value(
                AUTHENTICATION_ATTEMPTS_TOTAL,
                &[("auth_type", "login"), ("status", "failure")]
            ),
        1
    );
    let logs = flushed_logs(&telemetry, &transport).await;
    assert_eq!(logs.len(), 1);
    assert!(logs[0].trace_id.is_none());
    assert!(logs[0].span_id.is_none());
    assert!(telemetry.span_buffer().is_empty());
}

#[tokio::test]
async fn test_full_login_flow() {
    let (telemetry, transport) = telemetry_with(&test_config());
    let directory = UserDirectory::new(telemetry.clone());

    let admin = directory
        .create_user(
            NewUser::new("root@example.com", "Root", "root-password").with_roles(&["admin"]),
        )
        .await
        .unwrap();
    let user = directory
        .authenticate_user("root@example.com", "root-password")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.id, admin.id);

    directory.create_access_token(admin.id).await.unwrap();
    assert!(directory.check_permission(admin.id, "users", "delete", &["admin"]).await.unwrap());
    assert!(directory.lock_account(admin.id).await.unwrap());

    let locked = directory.authenticate_user("root@example.com", "root-password").await;
    assert!(locked.is_err());

    let report = telemetry.shutdown().await;
    assert_eq!(report.lost_records, 0);

    let logs = transport.records();
    let event_types: Vec<&str> = logs.iter().map(|r| r.event_type.as_str()).collect();
    assert_eq!(
        event_types,
        vec![
            "user_operation",
            "authentication",
            "token_operation",
            "authorization",
            "security",
            "authentication"
        ]
    );
    for record in &logs {
        let json = serde_json::to_string(record).unwrap();
        assert!(!json.contains("root@example.com"));
        assert!(!json.contains("root-password"));
    }
}
