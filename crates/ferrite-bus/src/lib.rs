//! # Ferrite Event Bus
//!
//! Cross-subsystem communication happens through this bus, never through
//! direct references: the mempool publishes admission events, the gossip
//! layer subscribes; the chain publishes tip changes, the producer and the
//! gossip layer subscribe. No component holds a pointer to another, so the
//! mempool/gossip/peer-manager call cycle of a naive layering cannot form.
//!
//! ```text
//! ┌──────────────┐                    ┌──────────────┐
//! │   Mempool    │                    │    Gossip    │
//! │              │    publish()       │              │
//! │              │ ──────┐            │              │
//! └──────────────┘       │            └──────────────┘
//!                        ▼                    ↑
//!                  ┌──────────────┐          │
//!                  │  Event Bus   │ ─────────┘
//!                  └──────────────┘  subscribe()
//! ```

pub mod events;
pub mod publisher;
pub mod subscriber;

pub use events::{EventFilter, EventTopic, NodeEvent};
pub use publisher::{EventPublisher, InMemoryEventBus};
pub use subscriber::{Subscription, SubscriptionError};

/// Maximum events buffered per subscriber before the oldest are dropped.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;
