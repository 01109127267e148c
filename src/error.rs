//! Error types for SALPA

use thiserror::Error;

/// Classification of a downstream operation failure
///
/// The kind decides how the resilience layer treats the failure: whether it
/// lands in the breaker's outcome window and whether another attempt is worth
/// making. Business-level kinds (`Validation`, `NotFound`) are invisible to
/// the breaker and never retried; infrastructure kinds are recorded and
/// (mostly) retryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Could not reach the dependency
    Connection,
    /// The call did not complete in time
    Timeout,
    /// The dependency answered with a transport-level error
    Transport,
    /// The dependency is shedding load
    RateLimited,
    /// The request itself was invalid (business error)
    Validation,
    /// The requested entity does not exist (business error)
    NotFound,
    /// Anything else
    Internal,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Connection => "connection",
            Self::Timeout => "timeout",
            Self::Transport => "transport",
            Self::RateLimited => "rate_limited",
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// A failure raised by a protected downstream operation
#[derive(Error, Debug, Clone)]
#[error("operation failed ({kind}): {message}")]
pub struct OperationError {
    /// Failure classification, see [`FailureKind`]
    pub kind: FailureKind,
    /// Human-readable detail
    pub message: String,
}

impl OperationError {
    /// Create an operation error with an explicit kind
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Connection failure
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Connection, message)
    }

    /// Timeout failure
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    /// Transport failure
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transport, message)
    }

    /// Business validation failure (ignored by the breaker)
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Validation, message)
    }

    /// Entity not found (ignored by the breaker)
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(FailureKind::NotFound, message)
    }
}

/// Terminal result of a protected call
///
/// This is what a caller of [`ResilientInvoker::call`](crate::ResilientInvoker::call)
/// observes when no fallback is supplied.
#[derive(Error, Debug, Clone)]
pub enum CallError {
    /// The breaker refused the call - it never executed
    #[error("call rejected: breaker '{breaker}' is {state}, try later")]
    Rejected {
        /// Name of the refusing breaker
        breaker: String,
        /// Breaker state at the time of refusal
        state: crate::resilience::CircuitState,
    },

    /// All attempts failed with a retryable error
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetryExhausted {
        /// Number of attempts actually executed
        attempts: u32,
        /// The last operation failure
        last: OperationError,
    },

    /// A non-retryable operation failure, surfaced on first occurrence
    #[error(transparent)]
    Operation(#[from] OperationError),
}

impl CallError {
    /// True when the failure means "service unavailable, try later"
    /// rather than a fault in the request itself
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CallError::Rejected { .. })
    }

    /// The underlying operation error, if any attempt actually ran
    pub fn last_error(&self) -> Option<&OperationError> {
        match self {
            CallError::Rejected { .. } => None,
            CallError::RetryExhausted { last, .. } => Some(last),
            CallError::Operation(e) => Some(e),
        }
    }
}

/// Misuse of the transactional event buffer
///
/// These indicate caller bugs and are never swallowed or retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// Commit or rollback reported twice for one unit of work
    #[error("unit of work '{unit_of_work}' already resolved as {resolution}")]
    DuplicateResolution {
        /// Offending unit-of-work id
        unit_of_work: String,
        /// How it resolved the first time ("commit" or "rollback")
        resolution: &'static str,
    },

    /// Event staged after the unit of work resolved
    #[error("cannot stage event: unit of work '{unit_of_work}' already resolved")]
    AlreadyResolved {
        /// Offending unit-of-work id
        unit_of_work: String,
    },
}

/// Error type for broker operations
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Connection error
    #[error("connection error: {0}")]
    Connection(String),

    /// Send failed
    #[error("send failed: {0}")]
    Send(String),

    /// Broker not ready
    #[error("broker not ready")]
    NotReady,

    /// Payload could not be serialized for the wire
    #[error("serialization error: {0}")]
    Serialization(String),
}
