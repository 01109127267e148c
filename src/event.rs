//! Event envelope types for the commit-gated relay
//!
//! A [`BufferedEvent`] is the universal envelope staged inside a unit of work
//! and, after commit, handed to the broker. The payload is opaque `Bytes` -
//! SALPA doesn't interpret it; business code serializes it, the broker
//! implementation puts it on the wire.

use bytes::Bytes;

/// Correlation id for one unit of work
///
/// Opaque to SALPA; the persistence-layer integration mints one per
/// transaction and reports commit/rollback against it exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitOfWorkId(String);

impl UnitOfWorkId {
    /// Mint a fresh unit-of-work id (ULID)
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    /// Wrap an id supplied by the persistence layer
    pub fn from_external(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for UnitOfWorkId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UnitOfWorkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A domain event staged inside a unit of work
///
/// Ownership transfers from the unit of work to the publisher exactly once,
/// at commit. After rollback it is discarded without publication.
#[derive(Debug, Clone)]
pub struct BufferedEvent {
    /// Unique identifier (ULID)
    pub id: String,

    /// Broker topic the event is destined for
    pub topic: String,

    /// Opaque serialized payload
    pub payload: Bytes,

    /// Unix timestamp in nanoseconds when the event was staged
    pub staged_at: i64,

    /// The unit of work this event belongs to
    pub unit_of_work: UnitOfWorkId,
}

impl BufferedEvent {
    /// Create a new event with auto-generated id and current timestamp
    pub fn new(unit_of_work: UnitOfWorkId, topic: impl Into<String>, payload: Bytes) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            topic: topic.into(),
            payload,
            staged_at: chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0),
            unit_of_work,
        }
    }

    /// Payload as a string slice (if valid UTF-8)
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Result of one delivery attempt for one event
///
/// Ephemeral: produced by the publisher, consumed by the metrics sink and the
/// caller's logging. Not persisted - recovery after a crash between commit
/// and publish is out of scope.
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    /// The event that was attempted
    pub event: BufferedEvent,

    /// Whether the broker accepted it
    pub success: bool,

    /// Broker error message on failure
    pub error: Option<String>,

    /// Delivery attempt number (1-based)
    pub attempt: u32,
}
