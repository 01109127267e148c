//! Resilience layer for downstream calls
//!
//! Composable protection for calls to named dependencies:
//! - **CircuitBreaker**: fail-fast when a dependency is unhealthy
//! - **RetryPolicy**: bounded re-attempts with exponential backoff
//! - **ResilientInvoker**: the façade business code calls, with optional
//!   fallback absorption
//! - **BreakerRegistry**: one breaker per dependency, explicit lifecycle
//!
//! # Example
//!
//! ```ignore
//! use salpa::resilience::*;
//!
//! let registry = BreakerRegistry::new(BreakerConfig::default(), sink.clone())?;
//! let invoker = ResilientInvoker::new(
//!     registry.get_or_create("user-service"),
//!     RetryPolicy::default(),
//!     sink,
//! );
//!
//! let user = invoker
//!     .call_or(|| client.get_user(id), |_| UserResponse::unavailable(id))
//!     .await;
//! ```

mod breaker;
mod invoker;
mod registry;
mod retry;

pub use breaker::{CircuitBreaker, CircuitState};
pub use invoker::ResilientInvoker;
pub use registry::BreakerRegistry;
pub use retry::RetryPolicy;
