//! SALPA demo binary
//!
//! Wires the resilience façade and the commit-gated relay around a simulated
//! user service: downstream lookups go through a circuit breaker with a
//! fallback, and user-lifecycle events are staged in a unit of work and only
//! published (to a stdout broker) after commit.
//!
//! ## Environment Variables
//!
//! - `SALPA_LOG_LEVEL`: log level (default: "info")
//! - `SALPA_LOG_FORMAT`: "json" or "pretty" (default: "pretty")
//! - `SALPA_SLIDING_WINDOW_SIZE`, `SALPA_FAILURE_RATE_THRESHOLD`,
//!   `SALPA_WAIT_OPEN_MS`, `SALPA_HALF_OPEN_PERMITS`: breaker tuning
//! - `SALPA_MAX_ATTEMPTS`, `SALPA_RETRY_BASE_DELAY_MS`: retry tuning

use bytes::Bytes;
use salpa::config::LogFormat;
use salpa::{
    BreakerRegistry, Config, EventPublisher, OperationError, PrometheusSink, ResilientInvoker,
    RetryPolicy, StdoutBroker, TransactionalEventBuffer, UnitOfWorkId,
};
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Serialize)]
struct UserEvent {
    operation: &'static str,
    user_id: u64,
    user_name: String,
    email: String,
}

/// Simulated downstream user lookup that fails its first few calls
struct FlakyUserClient {
    calls: AtomicU32,
}

impl FlakyUserClient {
    async fn get_user(&self, id: u64) -> Result<String, OperationError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < 2 {
            Err(OperationError::connection("user-service refused connection"))
        } else {
            Ok(format!("user-{id}"))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.log_level.clone().into());
    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }

    info!(
        window = config.breaker.sliding_window_size,
        failure_rate = config.breaker.failure_rate_threshold,
        max_attempts = config.retry.max_attempts,
        "Starting SALPA demo"
    );

    let sink = Arc::new(PrometheusSink::init()?);

    // Resilience half: one breaker per downstream dependency
    let registry = BreakerRegistry::new(config.breaker.clone(), sink.clone())?;
    let invoker = ResilientInvoker::new(
        registry.get_or_create("user-service"),
        RetryPolicy::new(config.retry.clone()),
        sink.clone(),
    );

    // Relay half: commit-gated publication to a stdout broker
    let publisher = Arc::new(EventPublisher::new(
        Arc::new(StdoutBroker::pretty()),
        sink.clone(),
    ));
    let buffer = TransactionalEventBuffer::new(publisher);

    // A unit of work creating a user: stage the event, "commit", publish
    let uow = UnitOfWorkId::new();
    let event = UserEvent {
        operation: "CREATE",
        user_id: 1,
        user_name: "Matti".into(),
        email: "matti@example.com".into(),
    };
    buffer.stage(&uow, "user-events", Bytes::from(serde_json::to_vec(&event)?))?;
    info!(unit_of_work = %uow, "user persisted, committing");
    let outcomes = buffer.notify_commit(&uow).await?;
    for outcome in &outcomes {
        if !outcome.success {
            warn!(topic = %outcome.event.topic, "event was not delivered");
        }
    }

    // A protected downstream lookup with a fallback response
    let client = FlakyUserClient {
        calls: AtomicU32::new(0),
    };
    let user = invoker
        .call_or(
            || client.get_user(1),
            |_| "Service Temporarily Unavailable".to_string(),
        )
        .await;
    info!(%user, breaker_state = %invoker.breaker().state(), "lookup finished");

    info!(
        breakers = registry.len(),
        all_closed = registry.all_closed(),
        "SALPA demo finished"
    );
    println!("{}", salpa::metrics::gather());

    Ok(())
}
