//! Commit-gated event relay
//!
//! Domain events staged inside a unit of work only reach the broker after
//! the unit of work durably commits:
//!
//! ```text
//! stage(uow, topic, payload) ──► TransactionalEventBuffer
//!                                      │ notify_commit(uow)
//!                                      ▼
//!                               EventPublisher ──► Broker
//! ```
//!
//! On `notify_rollback` staged events are discarded and a
//! [`RollbackObserver`] is told about each one.

mod buffer;
mod publisher;

pub use buffer::{RollbackObserver, TransactionalEventBuffer};
pub use publisher::{Broker, EventPublisher, StdoutBroker};
