//! Circuit breaker state machine
//!
//! One breaker guards one named downstream dependency. Recent call outcomes
//! land in a sliding window (oldest evicted first); once the window is full
//! and the failure or slow-call rate crosses its threshold, the breaker opens
//! and refuses calls until `wait_duration_in_open_state` has elapsed. It then
//! admits a bounded number of trial calls (half-open); one failing trial
//! reopens it, a clean run of trials closes it.
//!
//! All state lives behind a single mutex per breaker, so outcome recording
//! and the resulting transition are atomic with respect to concurrent
//! callers, and half-open permit consumption cannot over-admit.

use crate::config::BreakerConfig;
use crate::metrics::{self, MetricsSink};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - calls pass through unconditionally
    Closed,
    /// Failing fast - calls are refused without executing
    Open,
    /// Probing recovery - a bounded number of trial calls is admitted
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// One recorded call outcome
///
/// Slow classification is independent of success/failure: a slow success
/// counts toward the slow rate but not the failure rate.
#[derive(Debug, Clone, Copy)]
struct OutcomeRecord {
    failure: bool,
    slow: bool,
}

struct BreakerState {
    state: CircuitState,
    /// Sliding outcome window; capacity is `sliding_window_size` while
    /// closed and `half_open_max_permits` while half-open
    window: VecDeque<OutcomeRecord>,
    /// Remaining trial calls while half-open
    half_open_permits: u32,
    /// Set on every transition to Open
    opened_at: Option<Instant>,
}

/// Circuit breaker guarding one named dependency
///
/// Cheap to share: clone the `Arc` handed out by the
/// [`BreakerRegistry`](crate::resilience::BreakerRegistry).
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerState>,
    sink: Arc<dyn MetricsSink>,
}

impl CircuitBreaker {
    /// Create a breaker for the named dependency
    ///
    /// The config is assumed validated (see [`BreakerConfig::validate`]);
    /// the registry validates before construction.
    pub fn new(name: impl Into<String>, config: BreakerConfig, sink: Arc<dyn MetricsSink>) -> Self {
        let capacity = config
            .sliding_window_size
            .max(config.half_open_max_permits as usize);
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                window: VecDeque::with_capacity(capacity),
                half_open_permits: 0,
                opened_at: None,
            }),
            sink,
        }
    }

    /// Name of the guarded dependency
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Breaker configuration
    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Current state
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Failure rate (%) over the current window, 0 when empty
    pub fn failure_rate(&self) -> f32 {
        let inner = self.inner.lock();
        rate(&inner.window, |r| r.failure)
    }

    /// Slow-call rate (%) over the current window, 0 when empty
    pub fn slow_rate(&self) -> f32 {
        let inner = self.inner.lock();
        rate(&inner.window, |r| r.slow)
    }

    /// May a new call proceed?
    ///
    /// Side effect: performs the Open -> HalfOpen transition once the open
    /// wait has elapsed. While half-open, an admission consumes one trial
    /// permit as part of the same atomic step.
    pub fn allow_call(&self) -> bool {
        let mut transition = None;
        let allowed = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::Closed => true,
                CircuitState::Open => {
                    let elapsed = inner
                        .opened_at
                        .map(|t| t.elapsed())
                        .unwrap_or(Duration::ZERO);
                    if elapsed >= self.config.wait_duration_in_open_state {
                        transition =
                            self.transition_locked(&mut inner, CircuitState::HalfOpen);
                        // The probing caller takes the first trial permit
                        inner.half_open_permits -= 1;
                        true
                    } else {
                        false
                    }
                }
                CircuitState::HalfOpen => {
                    if inner.half_open_permits > 0 {
                        inner.half_open_permits -= 1;
                        true
                    } else {
                        false
                    }
                }
            }
        };
        self.notify(transition);
        allowed
    }

    /// Record a successful call
    pub fn on_success(&self, duration: Duration) {
        self.record(OutcomeRecord {
            failure: false,
            slow: self.is_slow(duration),
        });
    }

    /// Record a failed call of a recorded error kind
    ///
    /// Callers classify first: ignored kinds must not reach this method.
    pub fn on_failure(&self, duration: Duration) {
        self.record(OutcomeRecord {
            failure: true,
            slow: self.is_slow(duration),
        });
    }

    /// Did this call exceed the slow-call threshold?
    pub fn is_slow(&self, duration: Duration) -> bool {
        duration >= self.config.slow_call_duration_threshold
    }

    fn record(&self, outcome: OutcomeRecord) {
        let mut transition = None;
        {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::Closed => {
                    inner.window.push_back(outcome);
                    if inner.window.len() > self.config.sliding_window_size {
                        inner.window.pop_front();
                    }
                    // A partially filled window never opens the breaker
                    if inner.window.len() == self.config.sliding_window_size {
                        let failure_rate = rate(&inner.window, |r| r.failure);
                        let slow_rate = rate(&inner.window, |r| r.slow);
                        if failure_rate >= self.config.failure_rate_threshold
                            || slow_rate >= self.config.slow_call_rate_threshold
                        {
                            warn!(
                                breaker = %self.name,
                                failure_rate,
                                slow_rate,
                                "thresholds crossed, opening circuit"
                            );
                            transition = self.transition_locked(&mut inner, CircuitState::Open);
                        }
                    }
                }
                CircuitState::HalfOpen => {
                    if outcome.failure {
                        // One failing trial is enough
                        transition = self.transition_locked(&mut inner, CircuitState::Open);
                    } else {
                        inner.window.push_back(outcome);
                        if inner.window.len() as u32 >= self.config.half_open_max_permits {
                            transition = self.transition_locked(&mut inner, CircuitState::Closed);
                        }
                    }
                }
                CircuitState::Open => {
                    // Outcome of a call admitted before the breaker opened;
                    // the open decision already stands, drop it
                    debug!(breaker = %self.name, "discarding outcome recorded while open");
                }
            }
        }
        self.notify(transition);
    }

    /// Transition while holding the lock; returns the edge for deferred
    /// sink notification (sinks run outside the lock)
    fn transition_locked(
        &self,
        inner: &mut BreakerState,
        to: CircuitState,
    ) -> Option<(CircuitState, CircuitState)> {
        let from = inner.state;
        if from == to {
            return None;
        }
        inner.state = to;
        match to {
            CircuitState::Open => {
                inner.opened_at = Some(Instant::now());
                inner.window.clear();
            }
            CircuitState::HalfOpen => {
                inner.half_open_permits = self.config.half_open_max_permits;
                inner.window.clear();
            }
            CircuitState::Closed => {
                inner.opened_at = None;
                inner.window.clear();
            }
        }
        Some((from, to))
    }

    fn notify(&self, transition: Option<(CircuitState, CircuitState)>) {
        if let Some((from, to)) = transition {
            debug!(breaker = %self.name, %from, %to, "circuit state changed");
            let sink = Arc::clone(&self.sink);
            let name = self.name.clone();
            metrics::guarded(move || sink.on_state_change(&name, from, to));
        }
    }
}

fn rate(window: &VecDeque<OutcomeRecord>, pred: impl Fn(&OutcomeRecord) -> bool) -> f32 {
    if window.is_empty() {
        return 0.0;
    }
    let hits = window.iter().filter(|r| pred(r)).count();
    hits as f32 / window.len() as f32 * 100.0
}
