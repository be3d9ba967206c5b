//! Routing of decoded inputs into the coordinator.
//!
//! Nothing here returns an error to the caller: a notification that cannot be
//! applied is logged and reported as [`DispatchOutcome::Dropped`] so the next
//! one is processed normally.

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::cluster::ClusterCoordinator;
use crate::error::{Error, Result};
use crate::gateway::GatewayNode;
use crate::ids::{InstanceKey, ServiceId};
use crate::metrics::{GatewaySummary, ServiceSummary, SessionSummary};
use crate::notification::{
    ClusterStateSnapshot, DecodedNotification, GatewayConfig, NotificationKind, ServiceList,
    SessionList,
};
use crate::service::ServiceNotification;
use crate::transport::GatewayTransport;

/// Result of handing one input to the coordinator
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The input was applied
    Applied,
    /// The input was dropped and logged
    Dropped(Error),
}

impl DispatchOutcome {
    /// Whether the input was applied
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }

    /// Why the input was dropped, if it was
    #[must_use]
    pub const fn error(&self) -> Option<&Error> {
        match self {
            Self::Applied => None,
            Self::Dropped(e) => Some(e),
        }
    }
}

impl From<Result<()>> for DispatchOutcome {
    fn from(result: Result<()>) -> Self {
        match result {
            Ok(()) => Self::Applied,
            Err(e) => Self::Dropped(e),
        }
    }
}

/// Everything the transport can feed into a cluster
#[derive(Clone, Debug)]
pub enum ClusterInput {
    /// A live notification
    Notification(DecodedNotification),

    /// A full membership snapshot
    Membership {
        /// Alive members
        snapshot: ClusterStateSnapshot,
        /// When the snapshot was taken
        observed_at: DateTime<Utc>,
    },

    /// A gateway connected and its configuration was fetched
    GatewayConfig {
        /// Gateway that connected
        instance_key: InstanceKey,
        /// Fetched configuration
        config: GatewayConfig,
    },

    /// A gateway's connection dropped
    ConnectionLost {
        /// Gateway that dropped
        instance_key: InstanceKey,
    },

    /// Services reported by a gateway
    ServiceList {
        /// Reporting gateway
        instance_key: InstanceKey,
        /// Reported services
        services: ServiceList,
    },

    /// Sessions reported by one service
    SessionList {
        /// Reporting gateway
        instance_key: InstanceKey,
        /// Reporting service
        service_id: ServiceId,
        /// Listed sessions
        sessions: SessionList,
        /// When the listing was taken
        observed_at: DateTime<Utc>,
    },
}

impl ClusterInput {
    /// Short label used in logs
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Notification(n) => &n.kind,
            Self::Membership { .. } => "membership",
            Self::GatewayConfig { .. } => "gateway-config",
            Self::ConnectionLost { .. } => "connection-lost",
            Self::ServiceList { .. } => "service-list",
            Self::SessionList { .. } => "session-list",
        }
    }
}

impl From<DecodedNotification> for ClusterInput {
    fn from(notification: DecodedNotification) -> Self {
        Self::Notification(notification)
    }
}

impl<T> ClusterCoordinator<T>
where
    T: GatewayTransport,
{
    /// Apply a decoded notification to the entity it names
    pub fn dispatch(&mut self, notification: &DecodedNotification) -> DispatchOutcome {
        let outcome = DispatchOutcome::from(self.route(notification));
        if let DispatchOutcome::Dropped(e) = &outcome {
            warn!("Dropping {} notification: {}", notification.kind, e);
        }
        outcome
    }

    /// Apply any transport input
    pub fn apply(&mut self, input: ClusterInput) -> DispatchOutcome {
        let label = input.label().to_string();
        let prune_closed = self.config().prune_closed_sessions;

        let result = match input {
            ClusterInput::Notification(notification) => return self.dispatch(&notification),
            ClusterInput::Membership {
                snapshot,
                observed_at,
            } => {
                self.reconcile_membership(&snapshot, observed_at);
                Ok(())
            }
            ClusterInput::GatewayConfig {
                instance_key,
                config,
            } => self
                .parent_gateway(&label, &instance_key)
                .and_then(|gateway| gateway.connected(config)),
            ClusterInput::ConnectionLost { instance_key } => self
                .parent_gateway(&label, &instance_key)
                .and_then(GatewayNode::connection_lost),
            ClusterInput::ServiceList {
                instance_key,
                services,
            } => self
                .parent_gateway(&label, &instance_key)
                .map(|gateway| gateway.apply_service_list(&services)),
            ClusterInput::SessionList {
                instance_key,
                service_id,
                sessions,
                observed_at,
            } => self
                .parent_gateway(&label, &instance_key)
                .and_then(|gateway| {
                    gateway.apply_session_list(service_id, &sessions, observed_at, prune_closed)
                }),
        };

        let outcome = DispatchOutcome::from(result);
        if let DispatchOutcome::Dropped(e) = &outcome {
            warn!("Dropping {} input: {}", label, e);
        }
        outcome
    }

    fn route(&mut self, notification: &DecodedNotification) -> Result<()> {
        let kind: NotificationKind = notification.kind.parse()?;
        let instance_key = notification.require_instance_key()?;

        let service_notification = match kind {
            NotificationKind::MemberJoined => {
                self.join(instance_key, Some(notification.timestamp));
                return Ok(());
            }
            NotificationKind::MemberLeft => {
                self.process_leave(instance_key, notification.timestamp);
                return Ok(());
            }
            NotificationKind::ManagementUrl => {
                let url = notification.require_payload_str("url")?;
                self.parent_gateway(kind.as_str(), instance_key)?
                    .set_connection_url(url);
                return Ok(());
            }
            NotificationKind::GatewaySummary => {
                let summary: GatewaySummary = notification.payload_as()?;
                self.parent_gateway(kind.as_str(), instance_key)?
                    .merge_summary(&summary, notification.timestamp);
                return Ok(());
            }
            NotificationKind::ServiceSummary => {
                let summary: ServiceSummary = notification.payload_as()?;
                ServiceNotification::Summary(summary)
            }
            NotificationKind::SessionOpened => ServiceNotification::SessionOpened {
                session_id: notification.require_session_id()?,
                at: notification.timestamp,
            },
            NotificationKind::SessionClosed => ServiceNotification::SessionClosed {
                session_id: notification.require_session_id()?,
                at: notification.timestamp,
            },
            NotificationKind::SessionSummary => {
                let session_id = notification.require_session_id()?;
                let summary: SessionSummary = notification.payload_as()?;
                ServiceNotification::SessionSummary {
                    session_id,
                    summary,
                }
            }
        };

        let service_id = notification.require_service_id()?;
        self.parent_gateway(kind.as_str(), instance_key)?
            .process_service_notification(service_id, &service_notification)
    }

    fn parent_gateway(
        &mut self,
        kind: &str,
        instance_key: &InstanceKey,
    ) -> Result<&mut GatewayNode> {
        self.gateway_mut(instance_key)
            .map_err(|_| Error::UnknownParent {
                kind: kind.to_string(),
                parent: format!("gateway {instance_key}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SessionId;
    use crate::notification::ServiceInfo;
    use crate::transport::DetachedTransport;
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::sync::Arc;

    fn notification(kind: &str, key: &str) -> DecodedNotification {
        DecodedNotification {
            kind: kind.to_string(),
            instance_key: Some(InstanceKey::from(key)),
            service_id: None,
            session_id: None,
            timestamp: DateTime::from_timestamp(100, 0).unwrap(),
            payload: serde_json::Value::Null,
        }
    }

    fn cluster_with_service() -> ClusterCoordinator<DetachedTransport> {
        let mut cluster = ClusterCoordinator::new(Arc::new(DetachedTransport));
        cluster.process_join(&InstanceKey::from("abc"));
        cluster
            .apply_service_list(
                &InstanceKey::from("abc"),
                &ServiceList {
                    services: [(ServiceId::new(1), ServiceInfo::default())].into(),
                },
            )
            .unwrap();
        cluster
    }

    #[test]
    fn test_unknown_kind_is_dropped() {
        let mut cluster = cluster_with_service();

        let outcome = cluster.dispatch(&notification("cpu-list", "abc"));

        assert_matches!(outcome, DispatchOutcome::Dropped(Error::UnknownKind(_)));
    }

    #[test]
    fn test_session_notification_requires_ids() {
        let mut cluster = cluster_with_service();

        let outcome = cluster.dispatch(&notification("session-opened", "abc"));

        assert_matches!(
            outcome,
            DispatchOutcome::Dropped(Error::MalformedNotification { .. })
        );
    }

    #[test]
    fn test_unknown_gateway_is_unknown_parent() {
        let mut cluster = cluster_with_service();
        let mut n = notification("session-opened", "zzz");
        n.service_id = Some(ServiceId::new(1));
        n.session_id = Some(SessionId::new(7));

        assert_matches!(
            cluster.dispatch(&n),
            DispatchOutcome::Dropped(Error::UnknownParent { kind, .. }) if kind == "session-opened"
        );
    }

    #[test]
    fn test_session_open_routes_to_service() {
        let mut cluster = cluster_with_service();
        let mut n = notification("session-opened", "abc");
        n.service_id = Some(ServiceId::new(1));
        n.session_id = Some(SessionId::new(7));

        assert!(cluster.dispatch(&n).is_applied());

        let gateway = cluster.find_by_instance_key(&InstanceKey::from("abc")).unwrap();
        let session = gateway
            .service(ServiceId::new(1))
            .and_then(|service| service.session(SessionId::new(7)))
            .unwrap();
        assert!(session.is_open());
        assert_eq!(session.start_time(), Some(n.timestamp));
    }

    #[test]
    fn test_management_url_sets_connection_url() {
        let mut cluster = cluster_with_service();
        let mut n = notification("management-url", "abc");
        n.payload = json!({ "url": "ws://abc:8000" });

        assert!(cluster.dispatch(&n).is_applied());
        assert!(cluster.find_by_connection_url("ws://abc:8000").is_some());
    }

    #[test]
    fn test_apply_connection_lost_on_unknown_gateway() {
        let mut cluster = cluster_with_service();

        let outcome = cluster.apply(ClusterInput::ConnectionLost {
            instance_key: InstanceKey::from("zzz"),
        });

        assert_matches!(
            outcome,
            DispatchOutcome::Dropped(Error::UnknownParent { kind, .. }) if kind == "connection-lost"
        );
    }

    #[test]
    fn test_join_time_is_start_time_until_uptime_reported() {
        let mut cluster = ClusterCoordinator::new(Arc::new(DetachedTransport));

        assert!(cluster.dispatch(&notification("member-joined", "j")).is_applied());
        let joined = cluster.find_by_instance_key(&InstanceKey::from("j")).unwrap();
        assert_eq!(joined.start_time(), DateTime::from_timestamp(100, 0));

        let mut summary = notification("gateway-summary", "j");
        summary.timestamp = DateTime::from_timestamp(500, 0).unwrap();
        summary.payload = json!({ "uptimeSeconds": 450, "cpuPercentage": 3.5 });
        assert!(cluster.dispatch(&summary).is_applied());

        let gateway = cluster.find_by_instance_key(&InstanceKey::from("j")).unwrap();
        assert_eq!(gateway.start_time(), DateTime::from_timestamp(50, 0));
        assert_eq!(gateway.uptime_seconds(), 450);
        assert_eq!(gateway.summary().cpu_percentage, Some(3.5));
    }

    #[test]
    fn test_gateway_summary_for_unknown_gateway() {
        let mut cluster = cluster_with_service();
        let mut n = notification("gateway-summary", "zzz");
        n.payload = json!({ "uptimeSeconds": 10 });

        assert_matches!(
            cluster.dispatch(&n),
            DispatchOutcome::Dropped(Error::UnknownParent { kind, .. }) if kind == "gateway-summary"
        );
    }

    #[test]
    fn test_service_summary_routes_to_service() {
        let mut cluster = cluster_with_service();
        let mut n = notification("service-summary", "abc");
        n.service_id = Some(ServiceId::new(1));
        n.payload = json!({ "currentSessionCount": 4, "totalSessionCount": 9 });

        assert!(cluster.dispatch(&n).is_applied());

        let service = cluster
            .find_by_instance_key(&InstanceKey::from("abc"))
            .and_then(|gateway| gateway.service(ServiceId::new(1)))
            .unwrap();
        assert_eq!(service.current_session_count(), 4);
        assert_eq!(service.total_session_count(), 9);

        n.service_id = None;
        assert_matches!(
            cluster.dispatch(&n),
            DispatchOutcome::Dropped(Error::MalformedNotification { .. })
        );
    }

    #[test]
    fn test_apply_listings_on_unknown_gateway() {
        let mut cluster = cluster_with_service();

        let outcome = cluster.apply(ClusterInput::ServiceList {
            instance_key: InstanceKey::from("zzz"),
            services: ServiceList::default(),
        });
        assert_matches!(
            outcome,
            DispatchOutcome::Dropped(Error::UnknownParent { kind, .. }) if kind == "service-list"
        );

        let outcome = cluster.apply(ClusterInput::SessionList {
            instance_key: InstanceKey::from("zzz"),
            service_id: ServiceId::new(1),
            sessions: SessionList::default(),
            observed_at: DateTime::from_timestamp(10, 0).unwrap(),
        });
        assert_matches!(
            outcome,
            DispatchOutcome::Dropped(Error::UnknownParent { kind, .. }) if kind == "session-list"
        );
    }
}
