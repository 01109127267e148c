//! Transactional event buffer
//!
//! Events staged during a unit of work are held here and only handed to the
//! publisher once the persistence layer reports a durable commit for that
//! unit of work. On rollback they are discarded and a rollback observer is
//! told about each one. This enforces publish-after-commit without two-phase
//! commit across the store and the broker: delivery is commit-gated and
//! at-most-once, not exactly-once.
//!
//! The persistence-layer integration must call exactly one of
//! [`notify_commit`](TransactionalEventBuffer::notify_commit) /
//! [`notify_rollback`](TransactionalEventBuffer::notify_rollback) per unit of
//! work. A second resolution is a caller bug and fails loudly.

use crate::error::BufferError;
use crate::event::{BufferedEvent, PublishOutcome, UnitOfWorkId};
use crate::relay::EventPublisher;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Observer invoked once per event discarded by a rollback
pub trait RollbackObserver: Send + Sync {
    /// Called for each discarded event, in staging order
    fn on_discard(&self, event: &BufferedEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Commit,
    Rollback,
}

impl Resolution {
    fn as_str(self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Rollback => "rollback",
        }
    }
}

/// How many resolved unit-of-work ids to remember for duplicate detection
///
/// Oldest ids are evicted past this horizon, so a duplicate resolution for a
/// very old unit of work may go undetected; memory stays bounded in return.
const DEFAULT_RESOLVED_CAPACITY: usize = 10_000;

struct BufferInner {
    /// Staged events per in-flight unit of work, in staging order
    staged: HashMap<UnitOfWorkId, Vec<BufferedEvent>>,
    /// Resolved units, for duplicate-resolution detection
    resolved: HashMap<UnitOfWorkId, Resolution>,
    /// Eviction order for `resolved`
    resolved_order: VecDeque<UnitOfWorkId>,
}

/// Commit-gated buffer for domain events
///
/// Shares nothing with the circuit breakers: broker trouble can never trip a
/// breaker guarding an unrelated dependency.
pub struct TransactionalEventBuffer {
    inner: Mutex<BufferInner>,
    resolved_capacity: usize,
    publisher: Arc<EventPublisher>,
    rollback_observer: Option<Arc<dyn RollbackObserver>>,
}

impl TransactionalEventBuffer {
    /// Create a buffer that forwards committed events to `publisher`
    pub fn new(publisher: Arc<EventPublisher>) -> Self {
        Self {
            inner: Mutex::new(BufferInner {
                staged: HashMap::new(),
                resolved: HashMap::new(),
                resolved_order: VecDeque::new(),
            }),
            resolved_capacity: DEFAULT_RESOLVED_CAPACITY,
            publisher,
            rollback_observer: None,
        }
    }

    /// Register an observer for rolled-back events
    pub fn with_rollback_observer(mut self, observer: Arc<dyn RollbackObserver>) -> Self {
        self.rollback_observer = Some(observer);
        self
    }

    /// Override the resolved-id history capacity
    pub fn with_resolved_capacity(mut self, capacity: usize) -> Self {
        self.resolved_capacity = capacity;
        self
    }

    /// Stage an event under a unit of work
    ///
    /// May be called many times per unit of work, from concurrent sub-steps;
    /// staging order is preserved for delivery. Fails once the unit of work
    /// has resolved.
    pub fn stage(
        &self,
        unit_of_work: &UnitOfWorkId,
        topic: impl Into<String>,
        payload: Bytes,
    ) -> Result<(), BufferError> {
        let event = BufferedEvent::new(unit_of_work.clone(), topic, payload);
        let mut inner = self.inner.lock();
        if inner.resolved.contains_key(unit_of_work) {
            return Err(BufferError::AlreadyResolved {
                unit_of_work: unit_of_work.to_string(),
            });
        }
        debug!(
            unit_of_work = %unit_of_work,
            topic = %event.topic,
            event_id = %event.id,
            "event staged"
        );
        inner
            .staged
            .entry(unit_of_work.clone())
            .or_default()
            .push(event);
        Ok(())
    }

    /// Number of events currently staged under a unit of work
    pub fn staged_count(&self, unit_of_work: &UnitOfWorkId) -> usize {
        self.inner
            .lock()
            .staged
            .get(unit_of_work)
            .map_or(0, Vec::len)
    }

    /// The persistence layer committed this unit of work
    ///
    /// Hands every staged event to the publisher in staging order, exactly
    /// once each, and returns the delivery outcomes. A unit of work that
    /// staged nothing commits trivially with no outcomes.
    pub async fn notify_commit(
        &self,
        unit_of_work: &UnitOfWorkId,
    ) -> Result<Vec<PublishOutcome>, BufferError> {
        let events = self.resolve(unit_of_work, Resolution::Commit)?;
        info!(
            unit_of_work = %unit_of_work,
            events = events.len(),
            "unit of work committed, publishing staged events"
        );

        let mut outcomes = Vec::with_capacity(events.len());
        for event in &events {
            outcomes.push(self.publisher.publish(event).await);
        }
        Ok(outcomes)
    }

    /// The persistence layer rolled this unit of work back
    ///
    /// Discards every staged event without publishing, telling the rollback
    /// observer about each one. Returns the number discarded.
    pub fn notify_rollback(&self, unit_of_work: &UnitOfWorkId) -> Result<usize, BufferError> {
        let events = self.resolve(unit_of_work, Resolution::Rollback)?;
        if !events.is_empty() {
            warn!(
                unit_of_work = %unit_of_work,
                events = events.len(),
                "unit of work rolled back, discarding staged events"
            );
        }
        for event in &events {
            if let Some(observer) = &self.rollback_observer {
                observer.on_discard(event);
            }
        }
        Ok(events.len())
    }

    /// Atomically mark the unit resolved and take its staged events
    fn resolve(
        &self,
        unit_of_work: &UnitOfWorkId,
        resolution: Resolution,
    ) -> Result<Vec<BufferedEvent>, BufferError> {
        let mut inner = self.inner.lock();
        if let Some(prior) = inner.resolved.get(unit_of_work) {
            return Err(BufferError::DuplicateResolution {
                unit_of_work: unit_of_work.to_string(),
                resolution: prior.as_str(),
            });
        }

        inner.resolved.insert(unit_of_work.clone(), resolution);
        inner.resolved_order.push_back(unit_of_work.clone());
        while inner.resolved_order.len() > self.resolved_capacity {
            if let Some(evicted) = inner.resolved_order.pop_front() {
                inner.resolved.remove(&evicted);
            }
        }

        Ok(inner.staged.remove(unit_of_work).unwrap_or_default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::BrokerError;
    use crate::metrics::NoopSink;
    use crate::relay::Broker;
    use async_trait::async_trait;

    /// Broker recording every send, optionally failing
    struct RecordingBroker {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    impl RecordingBroker {
        fn new(fail: bool) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail,
            }
        }
    }

    #[async_trait]
    impl Broker for RecordingBroker {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn send(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
            if self.fail {
                return Err(BrokerError::Connection("unreachable".into()));
            }
            self.sent.lock().push((
                topic.to_string(),
                String::from_utf8_lossy(payload).into_owned(),
            ));
            Ok(())
        }
    }

    struct CountingObserver {
        discarded: Mutex<Vec<String>>,
    }

    impl RollbackObserver for CountingObserver {
        fn on_discard(&self, event: &BufferedEvent) {
            self.discarded.lock().push(event.id.clone());
        }
    }

    fn buffer_with(fail: bool) -> (TransactionalEventBuffer, Arc<RecordingBroker>) {
        let broker = Arc::new(RecordingBroker::new(fail));
        let publisher = Arc::new(EventPublisher::new(broker.clone(), Arc::new(NoopSink)));
        (TransactionalEventBuffer::new(publisher), broker)
    }

    #[tokio::test]
    async fn test_commit_publishes_in_staging_order() {
        let (buffer, broker) = buffer_with(false);
        let uow = UnitOfWorkId::new();

        buffer.stage(&uow, "user-events", Bytes::from("A")).unwrap();
        buffer.stage(&uow, "user-events", Bytes::from("B")).unwrap();
        buffer.stage(&uow, "user-events", Bytes::from("C")).unwrap();
        assert_eq!(buffer.staged_count(&uow), 3);

        let outcomes = buffer.notify_commit(&uow).await.unwrap();

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| o.success));
        let sent = broker.sent.lock();
        let payloads: Vec<&str> = sent.iter().map(|(_, p)| p.as_str()).collect();
        assert_eq!(payloads, vec!["A", "B", "C"]);
        assert_eq!(buffer.staged_count(&uow), 0);
    }

    #[tokio::test]
    async fn test_rollback_publishes_nothing_and_notifies_observer() {
        let (buffer, broker) = buffer_with(false);
        let observer = Arc::new(CountingObserver {
            discarded: Mutex::new(Vec::new()),
        });
        let buffer = buffer.with_rollback_observer(observer.clone());
        let uow = UnitOfWorkId::new();

        for payload in ["A", "B", "C"] {
            buffer.stage(&uow, "user-events", Bytes::from(payload)).unwrap();
        }

        let discarded = buffer.notify_rollback(&uow).unwrap();

        assert_eq!(discarded, 3);
        assert_eq!(observer.discarded.lock().len(), 3);
        assert!(broker.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_commit_fails() {
        let (buffer, _broker) = buffer_with(false);
        let uow = UnitOfWorkId::new();
        buffer.stage(&uow, "user-events", Bytes::from("A")).unwrap();

        buffer.notify_commit(&uow).await.unwrap();
        let second = buffer.notify_commit(&uow).await;

        assert_eq!(
            second.unwrap_err(),
            BufferError::DuplicateResolution {
                unit_of_work: uow.to_string(),
                resolution: "commit",
            }
        );
    }

    #[tokio::test]
    async fn test_rollback_after_commit_fails() {
        let (buffer, _broker) = buffer_with(false);
        let uow = UnitOfWorkId::new();

        buffer.notify_commit(&uow).await.unwrap();
        let result = buffer.notify_rollback(&uow);

        assert!(matches!(
            result.unwrap_err(),
            BufferError::DuplicateResolution { .. }
        ));
    }

    #[tokio::test]
    async fn test_stage_after_resolution_fails() {
        let (buffer, _broker) = buffer_with(false);
        let uow = UnitOfWorkId::new();

        buffer.notify_rollback(&uow).unwrap();
        let result = buffer.stage(&uow, "user-events", Bytes::from("late"));

        assert_eq!(
            result.unwrap_err(),
            BufferError::AlreadyResolved {
                unit_of_work: uow.to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_commit_with_unreachable_broker_surfaces_failures() {
        let (buffer, _broker) = buffer_with(true);
        let uow = UnitOfWorkId::new();
        buffer.stage(&uow, "user-events", Bytes::from("A")).unwrap();

        let outcomes = buffer.notify_commit(&uow).await.unwrap();

        // Commit itself succeeds; the loss is visible per event
        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].success);
        assert!(outcomes[0].error.as_ref().unwrap().contains("unreachable"));

        // The event was consumed either way - no re-staging
        assert_eq!(buffer.staged_count(&uow), 0);
    }

    #[tokio::test]
    async fn test_independent_units_do_not_interfere() {
        let (buffer, broker) = buffer_with(false);
        let u1 = UnitOfWorkId::new();
        let u2 = UnitOfWorkId::new();

        buffer.stage(&u1, "user-events", Bytes::from("u1-a")).unwrap();
        buffer.stage(&u2, "user-events", Bytes::from("u2-a")).unwrap();
        buffer.stage(&u1, "user-events", Bytes::from("u1-b")).unwrap();

        buffer.notify_rollback(&u2).unwrap();
        let outcomes = buffer.notify_commit(&u1).await.unwrap();

        assert_eq!(outcomes.len(), 2);
        let sent = broker.sent.lock();
        let payloads: Vec<&str> = sent.iter().map(|(_, p)| p.as_str()).collect();
        assert_eq!(payloads, vec!["u1-a", "u1-b"]);
    }

    #[tokio::test]
    async fn test_concurrent_staging_loses_nothing() {
        let (buffer, _broker) = buffer_with(false);
        let buffer = Arc::new(buffer);
        let uow = UnitOfWorkId::new();

        let mut handles = Vec::new();
        for i in 0..8 {
            let buffer = Arc::clone(&buffer);
            let uow = uow.clone();
            handles.push(tokio::spawn(async move {
                for j in 0..25 {
                    buffer
                        .stage(&uow, "user-events", Bytes::from(format!("{i}-{j}")))
                        .unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(buffer.staged_count(&uow), 200);
    }

    #[tokio::test]
    async fn test_resolved_history_eviction() {
        let (buffer, _broker) = buffer_with(false);
        let buffer = buffer.with_resolved_capacity(2);

        let old = UnitOfWorkId::new();
        buffer.notify_rollback(&old).unwrap();
        buffer.notify_rollback(&UnitOfWorkId::new()).unwrap();
        buffer.notify_rollback(&UnitOfWorkId::new()).unwrap();

        // `old` fell off the horizon, a second resolution is no longer caught
        assert!(buffer.notify_rollback(&old).is_ok());
    }
}
