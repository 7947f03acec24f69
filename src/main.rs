//! Identity telemetry demo service.
//!
//! Loads the telemetry config (path from the first argument, defaults
//! otherwise), installs the subscriber and the Prometheus exporter, then
//! drives a short identity workload through the instrumented directory and
//! a monitored database session.
//!
//! ```text
//!   identity workload ──▶ Envelope ──┬─▶ MetricRecorder ──▶ /metrics
//!                                    ├─▶ LogEmitter ──────▶ Loki / stdout
//!                                    └─▶ TraceRecorder ───▶ span buffer
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use identity_telemetry::config::load_with_env;
use identity_telemetry::database::{MemoryPool, SessionManager, StatementKind};
use identity_telemetry::identity::{NewUser, UserDirectory};
use identity_telemetry::observability::metrics::install_prometheus_exporter;
use identity_telemetry::observability::{init_subscriber, Telemetry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = load_with_env(path.as_deref())?;

    init_subscriber(&config.observability)?;
    tracing::info!(
        service = %config.service.name,
        version = %config.service.version,
        environment = %config.service.environment,
        "identity-telemetry starting"
    );

    if config.metrics.enabled {
        match config.metrics.listen_address.parse() {
            Ok(addr) => {
                match install_prometheus_exporter(addr) {
                    Ok(()) => {
                        tracing::info!(scrape_url = %config.metrics.scrape_url(), "Metrics ready")
                    }
                    Err(e) => tracing::error!(error = %e, "Failed to install Prometheus exporter"),
                }
            }
            Err(_) => tracing::error!(
                listen_address = %config.metrics.listen_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let telemetry = Arc::new(Telemetry::from_config(&config)?);
    telemetry.start();

    run_workload(&telemetry).await;

    println!("{}", serde_json::to_string_pretty(&telemetry.snapshot())?);

    let report = telemetry.shutdown().await;
    tracing::info!(
        exported = report.exported,
        lost = report.lost_records,
        spans = telemetry.span_buffer().len(),
        collector = %config.tracing.endpoint,
        "Shutdown complete, spans left for the trace transport"
    );
    Ok(())
}

/// A little of everything: registrations, good and bad logins, tokens,
/// permission checks, a lockout and two database sessions.
async fn run_workload(telemetry: &Arc<Telemetry>) {
    let directory = UserDirectory::new(telemetry.clone());

    let admin = directory
        .create_user(
            NewUser::new("admin@example.com", "Admin", "admin-password").with_roles(&["admin"]),
        )
        .await;
    let alice = directory
        .create_user(NewUser::new("alice@example.com", "Alice", "alice-password"))
        .await;
    let _ = directory
        .create_user(NewUser::new("alice@example.com", "Alice again", "alice-password"))
        .await;

    let _ = directory.authenticate_user("alice@example.com", "wrong").await;
    let _ = directory.authenticate_user("alice@example.com", "alice-password").await;
    let _ = directory.authenticate_user("nobody@example.com", "whatever").await;

    if let (Ok(admin), Ok(alice)) = (admin, alice) {
        let _ = directory.create_access_token(admin.id).await;
        let _ = directory.check_permission(admin.id, "users", "delete", &["admin"]).await;
        let _ = directory.check_permission(alice.id, "users", "delete", &["admin"]).await;
        let _ = directory.change_password(alice.id, "alice-password", "alice-password-2").await;
        let _ = directory.lock_account(alice.id).await;
        let _ = directory.authenticate_user("alice@example.com", "alice-password-2").await;
    }

    let pool = Arc::new(MemoryPool::new(4));
    let sessions = SessionManager::new(pool.clone(), telemetry);
    for write in [true, false] {
        let result = async {
            let mut session = sessions.acquire().await?;
            let (kind, statement) = if write {
                (StatementKind::Update, "UPDATE users SET last_seen = now()")
            } else {
                (StatementKind::Select, "SELECT id FROM users")
            };
            session.execute(kind, statement).await?;
            sessions.release(session).await
        }
        .await;
        if let Err(e) = result {
            tracing::warn!(error = %e, "Demo session failed");
        }
    }
    tracing::info!(commits = pool.commits(), statements = pool.statements(), "Workload finished");
}
