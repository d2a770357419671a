//! The single ordered inbound event stream.
//!
//! Transports publish, the engine consumes. Events leave the bus in the
//! order they were published, which gives per-chat ordering for free as
//! long as there is one consumer.

use crate::error::{BusError, BusResult};
use crate::events::InboundEvent;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tracing::trace;

/// Default capacity for the inbound queue.
const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Async event bus that decouples transports from the engine.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}

struct EventBusInner {
    inbound_tx: mpsc::Sender<InboundEvent>,
    inbound_rx: Mutex<mpsc::Receiver<InboundEvent>>,
    published: AtomicU64,
    consumed: AtomicU64,
}

/// Event bus statistics.
#[derive(Debug, Default, Clone, Copy)]
pub struct BusStats {
    /// Events published.
    pub published: u64,
    /// Events handed to the consumer.
    pub consumed: u64,
}

impl EventBus {
    /// Create a new event bus with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a new event bus with the given queue capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity.max(1));
        Self {
            inner: Arc::new(EventBusInner {
                inbound_tx,
                inbound_rx: Mutex::new(inbound_rx),
                published: AtomicU64::new(0),
                consumed: AtomicU64::new(0),
            }),
        }
    }

    /// Publish an inbound event. Waits while the queue is full.
    pub async fn publish(&self, event: InboundEvent) -> BusResult<()> {
        trace!(
            transport = %event.transport,
            kind = event.kind_label(),
            "publishing inbound event"
        );

        self.inner
            .inbound_tx
            .send(event)
            .await
            .map_err(|_| BusError::InboundClosed)?;

        self.inner.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Consume the next inbound event.
    ///
    /// Only the engine loop should call this. The future is cancel-safe, so
    /// it can sit in a `tokio::select!`.
    pub async fn consume(&self) -> Option<InboundEvent> {
        let event = self.inner.inbound_rx.lock().await.recv().await;
        if event.is_some() {
            self.inner.consumed.fetch_add(1, Ordering::Relaxed);
        }
        event
    }

    /// Consume the next inbound event, giving up after `timeout`.
    pub async fn consume_timeout(&self, timeout: Duration) -> Option<InboundEvent> {
        tokio::time::timeout(timeout, self.consume())
            .await
            .ok()
            .flatten()
    }

    /// Get current bus statistics.
    #[must_use]
    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.inner.published.load(Ordering::Relaxed),
            consumed: self.inner.consumed.load(Ordering::Relaxed),
        }
    }

    /// Create a lightweight publishing handle for a transport.
    #[must_use]
    pub fn inbound_handle(&self) -> InboundHandle {
        InboundHandle {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Lightweight handle for publishing inbound events.
#[derive(Clone)]
pub struct InboundHandle {
    inner: Arc<EventBusInner>,
}

impl std::fmt::Debug for InboundHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundHandle").finish_non_exhaustive()
    }
}

impl InboundHandle {
    /// Publish an inbound event.
    pub async fn publish(&self, event: InboundEvent) -> BusResult<()> {
        self.inner
            .inbound_tx
            .send(event)
            .await
            .map_err(|_| BusError::InboundClosed)?;
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Publish from a thread outside the runtime (e.g. a stdin reader).
    pub fn blocking_publish(&self, event: InboundEvent) -> BusResult<()> {
        self.inner
            .inbound_tx
            .blocking_send(event)
            .map_err(|_| BusError::InboundClosed)?;
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChatId, EventKind, Sender};

    fn event(text: &str) -> InboundEvent {
        InboundEvent::message("test", Sender::new(1, "u"), ChatId(1), text)
    }

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let bus = EventBus::new();
        bus.publish(event("one")).await.unwrap();
        bus.inbound_handle().publish(event("two")).await.unwrap();

        for expected in ["one", "two"] {
            let received = bus.consume_timeout(Duration::from_millis(100)).await.unwrap();
            assert!(matches!(received.kind, EventKind::Message { ref text } if text == expected));
        }
    }

    #[tokio::test]
    async fn test_consume_timeout_when_empty() {
        let bus = EventBus::new();
        assert!(bus.consume_timeout(Duration::from_millis(10)).await.is_none());
    }

    #[tokio::test]
    async fn test_stats() {
        let bus = EventBus::with_capacity(4);
        bus.publish(event("a")).await.unwrap();
        bus.publish(event("b")).await.unwrap();
        let _ = bus.consume().await;

        let stats = bus.stats();
        assert_eq!(stats.published, 2);
        assert_eq!(stats.consumed, 1);
    }
}
