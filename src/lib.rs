//! SALPA - Resilient Call Guard and Commit-Gated Event Relay
//!
//! SALPA protects calls to downstream dependencies with a circuit-breaker /
//! retry façade, and guarantees that domain events produced inside a unit of
//! work are only handed to the message broker after that unit of work has
//! durably committed.
//!
//! # Architecture
//!
//! ```text
//! business op ──► ResilientInvoker ──► RetryPolicy ──► CircuitBreaker ──► downstream
//!      │
//!      └──► TransactionalEventBuffer ──(commit)──► EventPublisher ──► Broker
//! ```
//!
//! The two halves are deliberately decoupled: broker unavailability can never
//! trip a breaker guarding an unrelated dependency.

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod relay;
pub mod resilience;

pub use config::{BreakerConfig, Config, RetryConfig};
pub use error::{BrokerError, BufferError, CallError, FailureKind, OperationError};
pub use event::{BufferedEvent, PublishOutcome, UnitOfWorkId};
pub use metrics::{CallOutcome, MetricsSink, NoopSink, PrometheusSink};
pub use relay::{Broker, EventPublisher, RollbackObserver, StdoutBroker, TransactionalEventBuffer};
pub use resilience::{BreakerRegistry, CircuitBreaker, CircuitState, ResilientInvoker, RetryPolicy};
