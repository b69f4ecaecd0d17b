//! Typed publish/subscribe hub used by the Viewport and its guards.
//!
//! Delivery is fan-out over a broadcast channel: per event kind the
//! subscription order is preserved, no cross-kind ordering is promised.
//! Listener panics cannot propagate back into publishers; slow receivers
//! lag and drop rather than block the hub.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

/// Payload types that can be carried on the hub.
pub trait Event: Clone + Send + Sync + std::fmt::Debug + 'static {}

impl<T> Event for T where T: Clone + Send + Sync + std::fmt::Debug + 'static {}

#[derive(Clone, Debug, Error)]
pub enum HubError {
    /// Publish with no live subscribers, or after the hub was dropped.
    #[error("event hub closed: {0}")]
    Closed(String),
}

#[async_trait]
pub trait EventHub<E>: Send + Sync
where
    E: Event,
{
    async fn publish(&self, event: E) -> Result<(), HubError>;
    fn subscribe(&self) -> broadcast::Receiver<E>;
}

/// In-memory hub backed by a tokio broadcast channel.
pub struct InMemoryHub<E>
where
    E: Event,
{
    sender: broadcast::Sender<E>,
}

impl<E> InMemoryHub<E>
where
    E: Event,
{
    pub fn new(capacity: usize) -> Arc<Self> {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Arc::new(Self { sender })
    }

    /// Publish without failing when nobody is listening yet.
    ///
    /// Guards come and go; events emitted between detach and the next
    /// attach are intentionally dropped.
    pub fn publish_lossy(&self, event: E) {
        if self.sender.send(event).is_err() {
            warn!(target: "event-hub", "event dropped (no subscribers)");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl<E> EventHub<E> for InMemoryHub<E>
where
    E: Event,
{
    async fn publish(&self, event: E) -> Result<(), HubError> {
        self.sender
            .send(event)
            .map(|_| ())
            .map_err(|err| HubError::Closed(err.to_string()))
    }

    fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }
}

/// Materialise an mpsc receiver from a hub subscription so callers can
/// await events without handling broadcast lag semantics directly.
pub fn to_mpsc<E>(hub: Arc<InMemoryHub<E>>, capacity: usize) -> mpsc::Receiver<E>
where
    E: Event,
{
    let mut rx = hub.subscribe();
    let (tx, out_rx) = mpsc::channel(capacity.max(1));
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ev) => {
                    if tx.send(ev).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(target: "event-hub", skipped, "subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    out_rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_in_publish_order() {
        let hub: Arc<InMemoryHub<u32>> = InMemoryHub::new(8);
        let mut rx = hub.subscribe();
        for n in 0..4u32 {
            hub.publish(n).await.expect("publish");
        }
        for n in 0..4u32 {
            assert_eq!(rx.recv().await.expect("recv"), n);
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_closed() {
        let hub: Arc<InMemoryHub<u32>> = InMemoryHub::new(8);
        assert!(hub.publish(1).await.is_err());
        hub.publish_lossy(2);
    }

    #[tokio::test]
    async fn mpsc_bridge_forwards_events() {
        let hub: Arc<InMemoryHub<&'static str>> = InMemoryHub::new(8);
        let mut rx = to_mpsc(Arc::clone(&hub), 8);
        hub.publish("ready").await.expect("publish");
        assert_eq!(rx.recv().await, Some("ready"));
    }
}
