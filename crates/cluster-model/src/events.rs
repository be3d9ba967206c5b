//! Lifecycle and update events, and the observers that receive them.
//!
//! Every entity carries its own [`Observers`] list and invokes it synchronously
//! when its state changes. Children inherit the list of their parent at
//! creation, so an observer registered on the coordinator sees the whole tree
//! while one registered on a single gateway only sees that gateway's subtree.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::ids::{EntityId, InstanceKey, ServiceId, SessionId};

/// Reference to the entity an event is about
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EntityRef {
    /// Identity of the entity, stable across rekeys
    pub entity_id: EntityId,
    /// Instance key of the owning gateway at the time of the event
    pub instance_key: InstanceKey,
    /// Owning service, for service and session events
    pub service_id: Option<ServiceId>,
    /// The session, for session events
    pub session_id: Option<SessionId>,
}

impl EntityRef {
    /// Reference to a gateway
    #[must_use]
    pub const fn gateway(entity_id: EntityId, instance_key: InstanceKey) -> Self {
        Self {
            entity_id,
            instance_key,
            service_id: None,
            session_id: None,
        }
    }

    /// Reference to a service
    #[must_use]
    pub const fn service(
        entity_id: EntityId,
        instance_key: InstanceKey,
        service_id: ServiceId,
    ) -> Self {
        Self {
            entity_id,
            instance_key,
            service_id: Some(service_id),
            session_id: None,
        }
    }

    /// Reference to a session
    #[must_use]
    pub const fn session(
        entity_id: EntityId,
        instance_key: InstanceKey,
        service_id: ServiceId,
        session_id: SessionId,
    ) -> Self {
        Self {
            entity_id,
            instance_key,
            service_id: Some(service_id),
            session_id: Some(session_id),
        }
    }
}

/// State change in the cluster model
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClusterEvent {
    /// A gateway entered the model
    GatewayAdded(EntityRef),

    /// The self gateway learned its instance key
    GatewayRekeyed {
        /// The gateway under its new key
        gateway: EntityRef,
        /// The key it was registered under before
        previous: InstanceKey,
    },

    /// A gateway connected and delivered its configuration
    GatewayAvailable(EntityRef),

    /// A gateway lost its connection but has not stopped
    GatewayUnavailable(EntityRef),

    /// A gateway stopped; its entry is kept for history
    GatewayStopped {
        /// The stopped gateway
        gateway: EntityRef,
        /// When the stop was observed
        stop_time: DateTime<Utc>,
    },

    /// A gateway was destroyed and removed from the model
    GatewayRemoved(EntityRef),

    /// Gateway summary metrics or connection details changed
    GatewayUpdated(EntityRef),

    /// A service entered the model
    ServiceAdded(EntityRef),

    /// Service summary metrics or details changed
    ServiceUpdated(EntityRef),

    /// A service was destroyed along with its gateway
    ServiceRemoved(EntityRef),

    /// A session opened
    SessionOpened(EntityRef),

    /// Session counters changed
    SessionUpdated(EntityRef),

    /// A session closed; its entry is kept until pruned or destroyed
    SessionClosed {
        /// The closed session
        session: EntityRef,
        /// When the close happened
        stop_time: DateTime<Utc>,
    },

    /// A session was removed from the model
    SessionRemoved(EntityRef),
}

impl ClusterEvent {
    /// The entity this event is about
    #[must_use]
    pub fn entity(&self) -> &EntityRef {
        match self {
            Self::GatewayAdded(entity)
            | Self::GatewayRekeyed {
                gateway: entity, ..
            }
            | Self::GatewayAvailable(entity)
            | Self::GatewayUnavailable(entity)
            | Self::GatewayStopped {
                gateway: entity, ..
            }
            | Self::GatewayRemoved(entity)
            | Self::GatewayUpdated(entity)
            | Self::ServiceAdded(entity)
            | Self::ServiceUpdated(entity)
            | Self::ServiceRemoved(entity)
            | Self::SessionOpened(entity)
            | Self::SessionUpdated(entity)
            | Self::SessionClosed {
                session: entity, ..
            }
            | Self::SessionRemoved(entity) => entity,
        }
    }
}

/// Callback invoked synchronously for every event an entity emits
pub type Observer = Arc<dyn Fn(&ClusterEvent) + Send + Sync>;

/// Observers registered on one entity
#[derive(Clone, Default)]
pub struct Observers {
    list: Vec<Observer>,
}

impl Observers {
    /// Create an empty observer list
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer
    pub fn push(&mut self, observer: Observer) {
        self.list.push(observer);
    }

    /// Invoke every observer with the event, in registration order
    pub fn notify(&self, event: &ClusterEvent) {
        for observer in &self.list {
            observer(event);
        }
    }

    /// Drop every observer
    pub fn clear(&mut self) {
        self.list.clear();
    }

    /// Number of registered observers
    #[must_use]
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// Whether no observer is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("count", &self.list.len())
            .finish()
    }
}

/// Fans events out to async display consumers over a broadcast channel
#[derive(Clone, Debug)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<ClusterEvent>,
}

impl EventBroadcaster {
    /// Create a broadcaster that buffers up to `capacity` events per subscriber
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events emitted from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.sender.subscribe()
    }

    /// An observer that forwards every event to the subscribers
    #[must_use]
    pub fn observer(&self) -> Observer {
        let sender = self.sender.clone();
        Arc::new(move |event: &ClusterEvent| {
            // No subscribers is not an error for a display feed
            let _ = sender.send(event.clone());
        })
    }
}
