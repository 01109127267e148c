//! Breaker registry
//!
//! One breaker per guarded dependency, keyed by name. The registry is an
//! explicit object handed to whoever needs it - there is no hidden
//! process-wide singleton. Typically populated during startup and read-only
//! afterwards; breakers are never removed while the process runs.

use crate::config::{BreakerConfig, ConfigError};
use crate::metrics::MetricsSink;
use crate::resilience::{CircuitBreaker, CircuitState};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Registry of circuit breakers keyed by dependency name
pub struct BreakerRegistry {
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    default_config: BreakerConfig,
    sink: Arc<dyn MetricsSink>,
}

impl BreakerRegistry {
    /// Create a registry; `default_config` applies to breakers created via
    /// [`get_or_create`](Self::get_or_create)
    pub fn new(default_config: BreakerConfig, sink: Arc<dyn MetricsSink>) -> Result<Self, ConfigError> {
        default_config.validate()?;
        Ok(Self {
            breakers: Mutex::new(HashMap::new()),
            default_config,
            sink,
        })
    }

    /// Fetch the breaker for a dependency, creating it with the default
    /// config on first use
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock();
        if let Some(breaker) = breakers.get(name) {
            return Arc::clone(breaker);
        }
        info!(breaker = %name, "registered circuit breaker");
        let breaker = Arc::new(CircuitBreaker::new(
            name,
            self.default_config.clone(),
            Arc::clone(&self.sink),
        ));
        breakers.insert(name.to_string(), Arc::clone(&breaker));
        breaker
    }

    /// Register a breaker with a dependency-specific config
    ///
    /// Replaces any breaker previously registered under the same name.
    pub fn register(&self, name: &str, config: BreakerConfig) -> Result<Arc<CircuitBreaker>, ConfigError> {
        config.validate()?;
        let breaker = Arc::new(CircuitBreaker::new(name, config, Arc::clone(&self.sink)));
        info!(breaker = %name, "registered circuit breaker");
        self.breakers
            .lock()
            .insert(name.to_string(), Arc::clone(&breaker));
        Ok(breaker)
    }

    /// Fetch a breaker without creating one
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.lock().get(name).cloned()
    }

    /// Number of registered breakers
    pub fn len(&self) -> usize {
        self.breakers.lock().len()
    }

    /// True when no breakers are registered
    pub fn is_empty(&self) -> bool {
        self.breakers.lock().is_empty()
    }

    /// Snapshot of all breakers
    pub fn all(&self) -> Vec<Arc<CircuitBreaker>> {
        self.breakers.lock().values().cloned().collect()
    }

    /// Health view: are all breakers closed?
    pub fn all_closed(&self) -> bool {
        self.breakers
            .lock()
            .values()
            .all(|b| b.state() == CircuitState::Closed)
    }

    /// Number of breakers currently not closed
    pub fn open_count(&self) -> usize {
        self.breakers
            .lock()
            .values()
            .filter(|b| b.state() != CircuitState::Closed)
            .count()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::metrics::NoopSink;
    use std::time::Duration;

    fn registry() -> BreakerRegistry {
        BreakerRegistry::new(BreakerConfig::default(), Arc::new(NoopSink)).unwrap()
    }

    #[test]
    fn test_get_or_create_returns_same_instance() {
        let registry = registry();

        let a = registry.get_or_create("user-service");
        let b = registry.get_or_create("user-service");

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_get_without_create() {
        let registry = registry();
        assert!(registry.get("unknown").is_none());

        registry.get_or_create("notification-service");
        assert!(registry.get("notification-service").is_some());
    }

    #[test]
    fn test_register_with_custom_config() {
        let registry = registry();

        let breaker = registry
            .register(
                "slow-service",
                BreakerConfig {
                    sliding_window_size: 4,
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(breaker.config().sliding_window_size, 4);
        assert!(Arc::ptr_eq(&breaker, &registry.get("slow-service").unwrap()));
    }

    #[test]
    fn test_register_rejects_invalid_config() {
        let registry = registry();
        let result = registry.register(
            "bad",
            BreakerConfig {
                sliding_window_size: 0,
                ..Default::default()
            },
        );
        assert!(result.is_err());
        assert!(registry.get("bad").is_none());
    }

    #[test]
    fn test_health_view() {
        let registry = registry();
        let healthy = registry.get_or_create("healthy");
        let failing = registry
            .register(
                "failing",
                BreakerConfig {
                    sliding_window_size: 2,
                    failure_rate_threshold: 50.0,
                    ..Default::default()
                },
            )
            .unwrap();

        assert!(registry.all_closed());
        assert_eq!(registry.open_count(), 0);

        failing.on_failure(Duration::from_millis(1));
        failing.on_failure(Duration::from_millis(1));

        assert!(!registry.all_closed());
        assert_eq!(registry.open_count(), 1);
        assert_eq!(healthy.state(), CircuitState::Closed);
    }
}
