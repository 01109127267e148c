//! Bounded retries with exponential backoff
//!
//! Every attempt is gated by the breaker first: a refusal aborts the whole
//! execution without consuming an attempt. Between failed retryable attempts
//! the calling task sleeps the deterministic backoff from
//! [`RetryConfig::backoff`]; other callers of the same breaker are not
//! blocked.

use crate::config::RetryConfig;
use crate::error::{CallError, OperationError};
use crate::metrics::{self, CallOutcome, MetricsSink};
use crate::resilience::CircuitBreaker;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Retry policy composed with a circuit breaker
///
/// Stateless between executions; per-call bookkeeping lives on the stack of
/// [`execute`](RetryPolicy::execute).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a policy from the given config
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Retry configuration
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `op` through the breaker with up to `max_attempts` attempts
    ///
    /// Outcome bookkeeping per attempt:
    /// - success: recorded to the breaker (plus SLOW when over threshold)
    /// - failure of a recorded kind: recorded to the breaker
    /// - failure of an ignored kind: invisible to the breaker, aborts
    ///   immediately
    /// - breaker refusal: aborts with [`CallError::Rejected`], no attempt
    ///   consumed
    pub async fn execute<T, F, Fut>(
        &self,
        breaker: &CircuitBreaker,
        sink: &Arc<dyn MetricsSink>,
        mut op: F,
    ) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        let mut attempt: u32 = 1;
        loop {
            if !breaker.allow_call() {
                let state = breaker.state();
                debug!(breaker = breaker.name(), %state, "call rejected by breaker");
                report(sink, breaker.name(), CallOutcome::Rejected, std::time::Duration::ZERO);
                return Err(CallError::Rejected {
                    breaker: breaker.name().to_string(),
                    state,
                });
            }

            let started = Instant::now();
            let result = op().await;
            let elapsed = started.elapsed();

            match result {
                Ok(value) => {
                    breaker.on_success(elapsed);
                    report(sink, breaker.name(), CallOutcome::Success, elapsed);
                    if breaker.is_slow(elapsed) {
                        report(sink, breaker.name(), CallOutcome::Slow, elapsed);
                    }
                    return Ok(value);
                }
                Err(err) => {
                    let recorded = breaker.config().records(err.kind);
                    if recorded {
                        breaker.on_failure(elapsed);
                        report(sink, breaker.name(), CallOutcome::Failure, elapsed);
                        if breaker.is_slow(elapsed) {
                            report(sink, breaker.name(), CallOutcome::Slow, elapsed);
                        }
                    } else {
                        report(sink, breaker.name(), CallOutcome::Ignored, elapsed);
                    }

                    let retryable = self.config.retryable_kinds.contains(&err.kind);
                    if !retryable {
                        debug!(
                            breaker = breaker.name(),
                            kind = %err.kind,
                            "non-retryable failure, aborting"
                        );
                        return Err(CallError::Operation(err));
                    }

                    if attempt >= self.config.max_attempts {
                        warn!(
                            breaker = breaker.name(),
                            attempts = attempt,
                            error = %err,
                            "retries exhausted"
                        );
                        return Err(CallError::RetryExhausted {
                            attempts: attempt,
                            last: err,
                        });
                    }

                    let wait = self.config.backoff(attempt);
                    debug!(
                        breaker = breaker.name(),
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        error = %err,
                        "attempt failed, backing off"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

fn report(
    sink: &Arc<dyn MetricsSink>,
    breaker: &str,
    outcome: CallOutcome,
    duration: std::time::Duration,
) {
    let sink = Arc::clone(sink);
    let breaker = breaker.to_string();
    metrics::guarded(move || sink.on_outcome(&breaker, outcome, duration));
}
