//! Live model of a gateway cluster for the operations dashboard.
//!
//! This crate provides:
//! - Entity identity types and the keyed [`EntityRegistry`]
//! - The cluster → gateway → service → session tree with lifecycle handling
//! - Membership and bulk-listing reconciliation
//! - Notification dispatch, observers and serialized ingestion
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod cluster;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod ids;
pub mod metrics;
pub mod notification;
pub mod reconcile;
pub mod registry;
pub mod router;
pub mod service;
pub mod session;
pub mod shared;
pub mod transport;

pub use cluster::{ClusterCoordinator, ClusterSummary, MembershipChange};
pub use config::ClusterConfig;
pub use error::{Error, Result};
pub use events::{ClusterEvent, EntityRef, EventBroadcaster, Observer, Observers};
pub use gateway::{GatewayNode, LifecycleState};
pub use ids::{EntityId, InstanceKey, ServiceId, SessionId};
pub use metrics::{GatewaySummary, ServiceSummary, SessionSummary};
pub use notification::{
    ClusterStateSnapshot, DecodedNotification, GatewayConfig, NotificationKind, ServiceInfo,
    ServiceList, SessionList, SessionRecord,
};
pub use registry::EntityRegistry;
pub use router::{ClusterInput, DispatchOutcome};
pub use service::{ServiceNode, ServiceNotification};
pub use session::SessionNode;
pub use shared::{InputPump, SharedCluster};
pub use transport::{DetachedTransport, GatewayTransport};
