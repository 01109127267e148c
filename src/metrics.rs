//! Metrics for SALPA
//!
//! A [`MetricsSink`] observes breaker state transitions, call outcomes, and
//! publish results. Sinks are strictly read-only consumers: a panicking or
//! misbehaving sink is caught and logged, never surfaced to the business
//! call that triggered it.

use crate::event::PublishOutcome;
use crate::resilience::CircuitState;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

/// Metrics registration error
#[derive(Error, Debug)]
#[error("metrics error: {0}")]
pub struct MetricsError(String);

/// Terminal classification of one call attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// Attempt succeeded
    Success,
    /// Attempt failed with a recorded error kind
    Failure,
    /// Attempt exceeded the slow-call threshold (reported alongside
    /// Success/Failure)
    Slow,
    /// Attempt failed with an ignored error kind (invisible to the breaker)
    Ignored,
    /// Breaker refused the call before it ran
    Rejected,
}

impl CallOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Slow => "slow",
            Self::Ignored => "ignored",
            Self::Rejected => "rejected",
        }
    }
}

/// Observer for breaker and publisher activity
///
/// Implementations must not block; they run inline on the calling task.
pub trait MetricsSink: Send + Sync {
    /// A breaker moved between states
    fn on_state_change(&self, breaker: &str, from: CircuitState, to: CircuitState);

    /// A call attempt settled
    fn on_outcome(&self, breaker: &str, outcome: CallOutcome, duration: Duration);

    /// An event delivery attempt settled
    fn on_publish(&self, outcome: &PublishOutcome);
}

/// Run a sink callback, swallowing and logging any panic
///
/// Sink misbehavior must never affect the caller's result.
pub(crate) fn guarded<F: FnOnce()>(f: F) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::error!("metrics sink panicked, outcome dropped");
    }
}

/// Sink that discards everything
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn on_state_change(&self, _: &str, _: CircuitState, _: CircuitState) {}
    fn on_outcome(&self, _: &str, _: CallOutcome, _: Duration) {}
    fn on_publish(&self, _: &PublishOutcome) {}
}

/// Global Prometheus handles (registration with the default registry can
/// only happen once per process)
static PROM: OnceLock<PromHandles> = OnceLock::new();

struct PromHandles {
    /// Breaker transitions (by breaker, from, to)
    transitions: CounterVec,

    /// Current breaker state (0 = closed, 1 = open, 2 = half_open)
    state: GaugeVec,

    /// Call outcomes (by breaker, outcome)
    outcomes: CounterVec,

    /// Call duration (by breaker)
    call_duration: HistogramVec,

    /// Publish attempts (by topic, result)
    publishes: CounterVec,
}

/// Prometheus-backed metrics sink
///
/// Handles are registered once per process; constructing the sink again
/// reuses them.
pub struct PrometheusSink;

impl PrometheusSink {
    /// Initialize the sink, registering metrics with the default registry
    ///
    /// Returns an error if metric registration fails.
    pub fn init() -> Result<Self, MetricsError> {
        if PROM.get().is_some() {
            return Ok(Self);
        }

        let handles = PromHandles {
            transitions: register_counter_vec!(
                "salpa_breaker_transitions_total",
                "Total circuit breaker state transitions",
                &["breaker", "from", "to"]
            )
            .map_err(|e| MetricsError(format!("transitions: {e}")))?,

            state: register_gauge_vec!(
                "salpa_breaker_state",
                "Current breaker state (0 = closed, 1 = open, 2 = half_open)",
                &["breaker"]
            )
            .map_err(|e| MetricsError(format!("state: {e}")))?,

            outcomes: register_counter_vec!(
                "salpa_call_outcomes_total",
                "Total protected call outcomes",
                &["breaker", "outcome"]
            )
            .map_err(|e| MetricsError(format!("outcomes: {e}")))?,

            call_duration: register_histogram_vec!(
                "salpa_call_duration_seconds",
                "Protected call duration",
                &["breaker"],
                vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0]
            )
            .map_err(|e| MetricsError(format!("call_duration: {e}")))?,

            publishes: register_counter_vec!(
                "salpa_publish_total",
                "Total event publish attempts",
                &["topic", "result"]
            )
            .map_err(|e| MetricsError(format!("publishes: {e}")))?,
        };

        let _ = PROM.set(handles);
        Ok(Self)
    }

    fn state_order(state: CircuitState) -> f64 {
        match state {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        }
    }
}

impl MetricsSink for PrometheusSink {
    fn on_state_change(&self, breaker: &str, from: CircuitState, to: CircuitState) {
        if let Some(prom) = PROM.get() {
            prom.transitions
                .with_label_values(&[breaker, &from.to_string(), &to.to_string()])
                .inc();
            prom.state
                .with_label_values(&[breaker])
                .set(Self::state_order(to));
        }
    }

    fn on_outcome(&self, breaker: &str, outcome: CallOutcome, duration: Duration) {
        if let Some(prom) = PROM.get() {
            prom.outcomes
                .with_label_values(&[breaker, outcome.as_str()])
                .inc();
            prom.call_duration
                .with_label_values(&[breaker])
                .observe(duration.as_secs_f64());
        }
    }

    fn on_publish(&self, outcome: &PublishOutcome) {
        if let Some(prom) = PROM.get() {
            let result = if outcome.success { "ok" } else { "error" };
            prom.publishes
                .with_label_values(&[&outcome.event.topic, result])
                .inc();
        }
    }
}

/// Gather all metrics and encode as Prometheus text format
pub fn gather() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_ok() {
        String::from_utf8(buffer).unwrap_or_default()
    } else {
        String::new()
    }
}
