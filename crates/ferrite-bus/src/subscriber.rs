//! # Event Subscriber
//!
//! The receiving side of the event bus: a filtered view over the broadcast
//! channel.

use thiserror::Error;
use tokio::sync::broadcast;
use tracing::warn;

use crate::events::{EventFilter, NodeEvent};

/// Errors a subscriber can observe.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    /// The bus was dropped; no more events will arrive.
    #[error("Event bus closed")]
    Closed,
}

/// A filtered subscription to the bus.
///
/// Events not matching the filter are skipped transparently. If the
/// subscriber lags behind the channel capacity, the skipped backlog is
/// logged and reception continues from the oldest retained event.
pub struct Subscription {
    receiver: broadcast::Receiver<NodeEvent>,
    filter: EventFilter,
}

impl Subscription {
    /// Wrap a raw broadcast receiver with a filter.
    pub fn new(receiver: broadcast::Receiver<NodeEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// Receive the next matching event, waiting if none is buffered.
    pub async fn recv(&mut self) -> Result<NodeEvent, SubscriptionError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(&event) => return Ok(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Bus subscriber lagged; events dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(SubscriptionError::Closed)
                }
            }
        }
    }

    /// Receive without waiting; `None` when no matching event is buffered.
    pub fn try_recv(&mut self) -> Result<Option<NodeEvent>, SubscriptionError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.filter.matches(&event) => return Ok(Some(event)),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Bus subscriber lagged; events dropped");
                    continue;
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(SubscriptionError::Closed)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventTopic;
    use crate::publisher::{EventPublisher, InMemoryEventBus};
    use ferrite_types::{Digest, PeerKey};

    #[tokio::test]
    async fn test_recv_matching_event() {
        let bus = InMemoryEventBus::new();
        let mut sub = bus.subscribe(EventFilter::all());

        bus.publish(NodeEvent::PeerConnected(PeerKey::new("h", 1)))
            .await;

        let event = sub.recv().await.unwrap();
        assert!(matches!(event, NodeEvent::PeerConnected(_)));
    }

    #[tokio::test]
    async fn test_filter_skips_unmatched() {
        let bus = InMemoryEventBus::new();
        let mut sub = bus.subscribe(EventFilter::topics(vec![EventTopic::Chain]));

        bus.publish(NodeEvent::PeerConnected(PeerKey::new("h", 1)))
            .await;
        bus.publish(NodeEvent::BlockApplied {
            block: Digest::ZERO,
            height: 7,
            included: vec![],
        })
        .await;

        // The network event is filtered out; the chain event arrives.
        let event = sub.recv().await.unwrap();
        assert!(matches!(event, NodeEvent::BlockApplied { height: 7, .. }));
    }

    #[tokio::test]
    async fn test_try_recv_empty() {
        let bus = InMemoryEventBus::new();
        let mut sub = bus.subscribe(EventFilter::all());
        assert!(sub.try_recv().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_closed_bus() {
        let bus = InMemoryEventBus::new();
        let mut sub = bus.subscribe(EventFilter::all());
        drop(bus);
        assert!(matches!(sub.recv().await, Err(SubscriptionError::Closed)));
    }
}
