//! Resilient call façade
//!
//! The [`ResilientInvoker`] is what business code holds: it runs an operation
//! through the retry policy and circuit breaker, and - when a fallback is
//! supplied - absorbs rejections and exhausted retries into the fallback
//! result so the caller never observes the downstream failure directly.

use crate::error::{CallError, OperationError};
use crate::metrics::MetricsSink;
use crate::resilience::{CircuitBreaker, RetryPolicy};
use std::future::Future;
use std::sync::Arc;
use tracing::warn;

/// Façade for calls to one guarded dependency
///
/// Clone-cheap and safe to share across tasks; all synchronization is
/// internal to the breaker.
#[derive(Clone)]
pub struct ResilientInvoker {
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    sink: Arc<dyn MetricsSink>,
}

impl ResilientInvoker {
    /// Create an invoker around an existing breaker
    pub fn new(breaker: Arc<CircuitBreaker>, retry: RetryPolicy, sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            breaker,
            retry,
            sink,
        }
    }

    /// The breaker guarding this dependency
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Run the operation through retry + breaker
    ///
    /// Without a fallback, the terminal failure propagates verbatim; a
    /// breaker refusal is distinguishable via [`CallError::is_unavailable`]
    /// so upstream layers can answer "service unavailable, try later".
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        self.retry.execute(&self.breaker, &self.sink, op).await
    }

    /// Run the operation, substituting `fallback` on terminal failure
    ///
    /// The fallback receives the failure reason and must return a
    /// same-shaped result; it must not itself fail - anything it panics
    /// with propagates unguarded.
    pub async fn call_or<T, F, Fut, FB>(&self, op: F, fallback: FB) -> T
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
        FB: FnOnce(&CallError) -> T,
    {
        match self.call(op).await {
            Ok(value) => value,
            Err(err) => {
                warn!(
                    breaker = self.breaker.name(),
                    error = %err,
                    "fallback triggered"
                );
                fallback(&err)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::{BreakerConfig, RetryConfig};
    use crate::metrics::NoopSink;
    use crate::resilience::CircuitState;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn invoker(breaker_config: BreakerConfig) -> ResilientInvoker {
        let sink: Arc<dyn MetricsSink> = Arc::new(NoopSink);
        let breaker = Arc::new(CircuitBreaker::new(
            "downstream",
            breaker_config,
            Arc::clone(&sink),
        ));
        let retry = RetryPolicy::new(RetryConfig {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            ..Default::default()
        });
        ResilientInvoker::new(breaker, retry, sink)
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let invoker = invoker(BreakerConfig::default());

        let result = invoker
            .call(|| async { Ok::<_, OperationError>("hello") })
            .await;

        assert_eq!(result.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_fallback_absorbs_exhausted_retries() {
        let invoker = invoker(BreakerConfig::default());

        let value = invoker
            .call_or(
                || async { Err::<String, _>(OperationError::connection("refused")) },
                |err| {
                    assert!(!err.is_unavailable());
                    "Service Temporarily Unavailable".to_string()
                },
            )
            .await;

        assert_eq!(value, "Service Temporarily Unavailable");
    }

    #[tokio::test]
    async fn test_fallback_absorbs_rejection() {
        let invoker = invoker(BreakerConfig {
            sliding_window_size: 2,
            failure_rate_threshold: 50.0,
            wait_duration_in_open_state: Duration::from_secs(60),
            ..Default::default()
        });

        // Trip the breaker
        invoker.breaker().on_failure(Duration::from_millis(1));
        invoker.breaker().on_failure(Duration::from_millis(1));
        assert_eq!(invoker.breaker().state(), CircuitState::Open);

        let executed = AtomicU32::new(0);
        let value = invoker
            .call_or(
                || {
                    executed.fetch_add(1, Ordering::SeqCst);
                    async { Ok::<_, OperationError>(1) }
                },
                |err| {
                    assert!(err.is_unavailable());
                    -1
                },
            )
            .await;

        assert_eq!(value, -1);
        // The operation never ran
        assert_eq!(executed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fallback_not_invoked_on_success() {
        let invoker = invoker(BreakerConfig::default());

        let value = invoker
            .call_or(
                || async { Ok::<_, OperationError>(10) },
                |_| unreachable!("fallback must not run on success"),
            )
            .await;

        assert_eq!(value, 10);
    }

    #[tokio::test]
    async fn test_without_fallback_rejection_propagates() {
        let invoker = invoker(BreakerConfig {
            sliding_window_size: 1,
            failure_rate_threshold: 50.0,
            wait_duration_in_open_state: Duration::from_secs(60),
            ..Default::default()
        });
        invoker.breaker().on_failure(Duration::from_millis(1));

        let result = invoker.call(|| async { Ok::<_, OperationError>(()) }).await;

        assert!(matches!(result, Err(CallError::Rejected { .. })));
    }

    #[tokio::test]
    async fn test_call_volume_of_successes_keeps_breaker_closed() {
        let invoker = invoker(BreakerConfig {
            sliding_window_size: 5,
            ..Default::default()
        });

        for _ in 0..500 {
            let result = invoker.call(|| async { Ok::<_, OperationError>(()) }).await;
            assert!(result.is_ok());
        }
        assert_eq!(invoker.breaker().state(), CircuitState::Closed);
    }
}
