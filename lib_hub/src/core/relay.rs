//! # Relay Loop
//!
//! Drains the broker queue one item at a time and hands each envelope to the
//! matching live connection.
//!
//! Delivery is at-most-once and best effort: an item is popped exactly once
//! and discarded after a single delivery attempt whatever the outcome. There
//! is no acknowledgement, no redelivery and no dead-letter queue. Ordering is
//! the broker's FIFO dequeue order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::core::envelope::Envelope;
use crate::core::queue::MessageQueue;
use crate::core::registry::ConnectionRegistry;

/// What happened to one dequeued item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Handed to the target connection.
    Delivered,
    /// No live connection under the target id; the item was dropped.
    NoConnection,
    /// The item was not a valid envelope; it was discarded.
    Malformed,
    /// The target was registered but its session had already ended.
    DeliveryFailed,
}

/// Running totals of dispatch outcomes, shared with the health endpoint.
#[derive(Debug, Default)]
pub struct RelayStats {
    delivered: AtomicU64,
    dropped: AtomicU64,
    malformed: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of `RelayStats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RelayCounters {
    /// Items delivered to a connection.
    pub delivered: u64,
    /// Items whose target had no live connection.
    pub dropped: u64,
    /// Items that failed to decode.
    pub malformed: u64,
    /// Items whose delivery failed.
    pub failed: u64,
}

impl RelayStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one outcome.
    pub fn record(&self, outcome: DispatchOutcome) {
        let counter = match outcome {
            DispatchOutcome::Delivered => &self.delivered,
            DispatchOutcome::NoConnection => &self.dropped,
            DispatchOutcome::Malformed => &self.malformed,
            DispatchOutcome::DeliveryFailed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Reads all counters.
    pub fn snapshot(&self) -> RelayCounters {
        RelayCounters {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// # Relay Loop
///
/// Owns the consuming side of the queue for its whole life.
pub struct RelayLoop<Q> {
    queue: Q,
    registry: ConnectionRegistry,
    stats: Arc<RelayStats>,
    shutdown: CancellationToken,
}

impl<Q: MessageQueue> RelayLoop<Q> {
    /// Wires the loop to its queue, the shared registry and the shutdown token.
    pub fn new(
        queue: Q,
        registry: ConnectionRegistry,
        stats: Arc<RelayStats>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            queue,
            registry,
            stats,
            shutdown,
        }
    }

    /// Runs until the shutdown token is cancelled.
    ///
    /// Decode failures, unknown targets, delivery failures and broker errors
    /// are logged and never end the loop. A pending dequeue is abandoned as
    /// soon as shutdown is requested.
    pub async fn run(mut self) {
        tracing::info!("Relay loop started");

        loop {
            let popped = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                popped = self.queue.pop() => popped,
            };

            match popped {
                Ok(Some(raw)) => {
                    let outcome = self.dispatch(&raw);
                    self.stats.record(outcome);
                }
                Ok(None) => {
                    tracing::trace!("Queue wait window elapsed with no items");
                }
                Err(e) => {
                    // The queue paces its own reconnect attempts.
                    tracing::error!(error = %e, "Dequeue failed");
                }
            }
        }

        tracing::info!("Relay loop stopped");
    }

    /// Decodes one raw item and delivers it verbatim to its target.
    pub fn dispatch(&self, raw: &str) -> DispatchOutcome {
        let envelope = match Envelope::decode(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, item = raw, "Discarding malformed queue item");
                return DispatchOutcome::Malformed;
            }
        };

        let Some(connection) = self.registry.lookup(&envelope.target) else {
            tracing::info!(conn_id = %envelope.target, "No live connection, message dropped");
            return DispatchOutcome::NoConnection;
        };

        match connection.send(raw.to_owned()) {
            Ok(()) => {
                tracing::debug!(conn_id = %envelope.target, bytes = raw.len(), "Message relayed");
                DispatchOutcome::Delivered
            }
            Err(e) => {
                tracing::warn!(conn_id = %envelope.target, error = %e, "Delivery failed");
                DispatchOutcome::DeliveryFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::queue::MemoryQueue;
    use crate::core::registry::{Connection, ConnectionRole};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn register(registry: &ConnectionRegistry, id: &str) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register(Connection::new(
            id,
            ConnectionRole::Subscriber,
            tx,
            CancellationToken::new(),
        ));
        rx
    }

    fn relay(registry: &ConnectionRegistry) -> RelayLoop<MemoryQueue> {
        RelayLoop::new(
            MemoryQueue::new(),
            registry.clone(),
            Arc::new(RelayStats::new()),
            CancellationToken::new(),
        )
    }

    #[test]
    fn dispatch_delivers_item_verbatim() {
        let registry = ConnectionRegistry::new();
        let mut rx = register(&registry, "abc123");
        let relay = relay(&registry);

        let raw = r#"{ "boa-conn" : "abc123", "msg": "hello", "nested": {"k": [1, 2.5]} }"#;
        assert_eq!(relay.dispatch(raw), DispatchOutcome::Delivered);
        assert_eq!(rx.try_recv().expect("delivered"), raw);
        assert!(rx.try_recv().is_err(), "exactly one frame");
    }

    #[test]
    fn dispatch_classifies_failures() {
        let registry = ConnectionRegistry::new();
        let rx = register(&registry, "gone");
        drop(rx);
        let relay = relay(&registry);

        assert_eq!(relay.dispatch("{oops"), DispatchOutcome::Malformed);
        assert_eq!(
            relay.dispatch(r#"{"boa-conn":"nobody","msg":1}"#),
            DispatchOutcome::NoConnection
        );
        assert_eq!(
            relay.dispatch(r#"{"boa-conn":"gone","msg":1}"#),
            DispatchOutcome::DeliveryFailed
        );
        // Delivery failure does not clean up the stale entry.
        assert!(registry.lookup("gone").is_some());
    }

    #[tokio::test]
    async fn loop_survives_bad_items_and_stops_on_shutdown() {
        let registry = ConnectionRegistry::new();
        let mut rx = register(&registry, "abc123");
        let queue = MemoryQueue::new();
        let publisher = queue.publisher();
        let stats = Arc::new(RelayStats::new());
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(
            RelayLoop::new(queue, registry.clone(), stats.clone(), shutdown.clone()).run(),
        );

        publisher.publish("definitely not json");
        publisher.publish(r#"{"boa-conn":"ghost","msg":"lost"}"#);
        publisher.publish(r#"{"boa-conn":"abc123","msg":"hello"}"#);

        let frame = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("relay stayed live")
            .expect("frame");
        assert_eq!(frame, r#"{"boa-conn":"abc123","msg":"hello"}"#);

        shutdown.cancel();
        timeout(Duration::from_secs(2), handle)
            .await
            .expect("loop exits on shutdown")
            .expect("no panic");

        assert_eq!(
            stats.snapshot(),
            RelayCounters {
                delivered: 1,
                dropped: 1,
                malformed: 1,
                failed: 0,
            }
        );
    }
}
