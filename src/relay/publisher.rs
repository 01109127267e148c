//! Event publisher and broker interface
//!
//! The [`Broker`] trait is the only thing SALPA needs from a message broker
//! client: a single `send`. The [`EventPublisher`] is a deliberately simple
//! leaf - one delivery attempt per event, no internal retries, no
//! re-staging. Callers wanting retries compose with
//! [`RetryPolicy`](crate::RetryPolicy); deduplication, if any, is the
//! broker/topic design's job.

use crate::error::BrokerError;
use crate::event::{BufferedEvent, PublishOutcome};
use crate::metrics::{self, MetricsSink};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

/// Broker client interface
///
/// # Example
///
/// ```ignore
/// struct KafkaBroker {
///     producer: FutureProducer,
/// }
///
/// #[async_trait]
/// impl Broker for KafkaBroker {
///     fn name(&self) -> &'static str { "kafka" }
///
///     async fn send(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
///         self.producer.send(topic, payload).await
///             .map_err(|e| BrokerError::Send(e.to_string()))
///     }
/// }
/// ```
#[async_trait]
pub trait Broker: Send + Sync {
    /// Broker name for identification and logging
    fn name(&self) -> &'static str;

    /// Deliver one payload to a topic
    async fn send(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError>;

    /// Health check for the broker connection
    async fn health(&self) -> bool {
        true
    }

    /// Graceful shutdown
    async fn shutdown(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}

/// Delivers committed events to the broker, one attempt each
pub struct EventPublisher {
    broker: Arc<dyn Broker>,
    sink: Arc<dyn MetricsSink>,
}

impl EventPublisher {
    /// Create a publisher over the given broker
    pub fn new(broker: Arc<dyn Broker>, sink: Arc<dyn MetricsSink>) -> Self {
        Self { broker, sink }
    }

    /// The underlying broker
    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Attempt delivery of one event
    ///
    /// A transport failure is surfaced in the outcome and logged with the
    /// event's topic and unit-of-work id for operational recovery; the event
    /// is not re-staged. There is no durable outbox - an event lost between
    /// commit and a successful publish survives only as this log line.
    pub async fn publish(&self, event: &BufferedEvent) -> PublishOutcome {
        let outcome = match self.broker.send(&event.topic, &event.payload).await {
            Ok(()) => {
                debug!(
                    broker = self.broker.name(),
                    topic = %event.topic,
                    event_id = %event.id,
                    "event published"
                );
                PublishOutcome {
                    event: event.clone(),
                    success: true,
                    error: None,
                    attempt: 1,
                }
            }
            Err(e) => {
                error!(
                    broker = self.broker.name(),
                    topic = %event.topic,
                    unit_of_work = %event.unit_of_work,
                    event_id = %event.id,
                    error = %e,
                    "event publish failed, event is lost unless recovered from this log"
                );
                PublishOutcome {
                    event: event.clone(),
                    success: false,
                    error: Some(e.to_string()),
                    attempt: 1,
                }
            }
        };

        let sink = Arc::clone(&self.sink);
        let reported = outcome.clone();
        metrics::guarded(move || sink.on_publish(&reported));

        outcome
    }
}

/// Stdout broker for debugging
///
/// Prints events in a human-readable format. Useful for development; not a
/// real broker.
pub struct StdoutBroker {
    /// Pretty print payloads
    pretty: bool,
    /// Count of payloads sent
    sent_count: AtomicU64,
}

impl StdoutBroker {
    /// Create a new StdoutBroker
    pub fn new() -> Self {
        Self {
            pretty: false,
            sent_count: AtomicU64::new(0),
        }
    }

    /// Create a new StdoutBroker with pretty printing
    pub fn pretty() -> Self {
        Self {
            pretty: true,
            sent_count: AtomicU64::new(0),
        }
    }

    /// Total payloads sent
    pub fn sent_count(&self) -> u64 {
        self.sent_count.load(Ordering::Relaxed)
    }
}

impl Default for StdoutBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for StdoutBroker {
    fn name(&self) -> &'static str {
        "stdout"
    }

    async fn send(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        use std::io::Write;

        let mut stdout = std::io::stdout().lock();
        if self.pretty {
            writeln!(stdout, "┌─ Event ─────────────────────────────────────").ok();
            writeln!(stdout, "│ Topic:   {topic}").ok();
            writeln!(stdout, "│ Bytes:   {}", payload.len()).ok();
            if let Ok(text) = std::str::from_utf8(payload) {
                writeln!(stdout, "│ Payload: {text}").ok();
            }
            writeln!(stdout, "└─────────────────────────────────────────────").ok();
        } else {
            let text = String::from_utf8_lossy(payload);
            writeln!(stdout, "[{topic}] {text}").ok();
        }

        self.sent_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
