//! Gateway entity and its lifecycle state machine

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::events::{ClusterEvent, EntityRef, Observer, Observers};
use crate::ids::{EntityId, InstanceKey, ServiceId};
use crate::metrics::GatewaySummary;
use crate::notification::{GatewayConfig, ServiceList, SessionList};
use crate::reconcile::diff_keys;
use crate::registry::EntityRegistry;
use crate::service::{ServiceNode, ServiceNotification};

/// Lifecycle of a gateway connection.
///
/// `Connecting` moves to `Available` or `Unavailable`, which may alternate
/// until the gateway reaches `Stopped`. Nothing leaves `Stopped`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    /// Connection attempt in progress
    Connecting,
    /// Connected with a configuration snapshot
    Available,
    /// Not reachable right now
    Unavailable,
    /// Gone for good
    Stopped,
}

/// One cluster member as seen through its management connection
#[derive(Clone, Debug)]
pub struct GatewayNode {
    entity_id: EntityId,
    instance_key: InstanceKey,
    connection_url: Option<String>,
    start_time: Option<DateTime<Utc>>,
    stop_time: Option<DateTime<Utc>>,
    state: LifecycleState,
    config: Option<GatewayConfig>,
    summary: GatewaySummary,
    services: EntityRegistry<ServiceId, ServiceNode>,
    observers: Observers,
}

impl GatewayNode {
    pub(crate) fn new(
        instance_key: InstanceKey,
        connection_url: Option<String>,
        start_time: Option<DateTime<Utc>>,
        observers: Observers,
    ) -> Self {
        Self {
            entity_id: EntityId::next(),
            instance_key,
            connection_url: connection_url.filter(|url| !url.is_empty()),
            start_time,
            stop_time: None,
            state: LifecycleState::Connecting,
            config: None,
            summary: GatewaySummary::default(),
            services: EntityRegistry::new(),
            observers,
        }
    }

    /// Identity of this gateway, stable across rekeys
    #[must_use]
    pub const fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    /// Current instance key; unassigned for the self node until it is learned
    #[must_use]
    pub const fn instance_key(&self) -> &InstanceKey {
        &self.instance_key
    }

    /// Management endpoint, once known
    #[must_use]
    pub fn connection_url(&self) -> Option<&str> {
        self.connection_url.as_deref()
    }

    /// When the gateway process started, if known
    #[must_use]
    pub const fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    /// When the gateway was seen to stop; `None` while live or unknown
    #[must_use]
    pub const fn stop_time(&self) -> Option<DateTime<Utc>> {
        self.stop_time
    }

    /// Current lifecycle state
    #[must_use]
    pub const fn lifecycle_state(&self) -> LifecycleState {
        self.state
    }

    /// Whether the gateway has stopped
    #[must_use]
    pub const fn is_stopped(&self) -> bool {
        self.stop_time.is_some()
    }

    /// Whether the gateway is connected with a configuration snapshot
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.state == LifecycleState::Available
    }

    /// Whether the gateway has a configuration snapshot and has not stopped
    #[must_use]
    pub const fn is_usable(&self) -> bool {
        self.config.is_some() && self.stop_time.is_none()
    }

    /// Last fetched configuration snapshot
    #[must_use]
    pub const fn config(&self) -> Option<&GatewayConfig> {
        self.config.as_ref()
    }

    /// Latest host metrics
    #[must_use]
    pub const fn summary(&self) -> &GatewaySummary {
        &self.summary
    }

    /// CPU usage in percent, zero until reported
    #[must_use]
    pub fn cpu_percentage(&self) -> f64 {
        self.summary.cpu_percentage.unwrap_or_default()
    }

    /// Seconds since the process started, zero until reported
    #[must_use]
    pub fn uptime_seconds(&self) -> u64 {
        self.summary.uptime_seconds.unwrap_or_default()
    }

    /// The service registry
    #[must_use]
    pub const fn services(&self) -> &EntityRegistry<ServiceId, ServiceNode> {
        &self.services
    }

    /// Look up a service
    #[must_use]
    pub fn service(&self, service_id: ServiceId) -> Option<&ServiceNode> {
        self.services.get(&service_id)
    }

    /// Number of sessions the model holds open across all services
    #[must_use]
    pub fn open_session_count(&self) -> usize {
        self.services
            .values()
            .iter()
            .map(|service| service.open_session_count())
            .sum()
    }

    /// Number of sessions the model holds across all services
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.services
            .values()
            .iter()
            .map(|service| service.sessions().len())
            .sum()
    }

    /// Reference used in events about this gateway
    #[must_use]
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::gateway(self.entity_id, self.instance_key.clone())
    }

    /// Register an observer for this gateway and everything below it
    pub fn observe(&mut self, observer: Observer) {
        self.observers.push(observer.clone());
        for service in self.services.values_mut() {
            service.observe(observer.clone());
        }
    }

    pub(crate) fn emit(&self, event: &ClusterEvent) {
        self.observers.notify(event);
    }

    /// Carry a new instance key down to every service and session
    pub(crate) fn set_instance_key(&mut self, instance_key: InstanceKey) {
        for service in self.services.values_mut() {
            service.set_instance_key(&instance_key);
        }
        self.instance_key = instance_key;
    }

    /// Record the management endpoint. Returns whether it changed.
    pub(crate) fn set_connection_url(&mut self, url: &str) -> bool {
        if url.is_empty() || self.connection_url.as_deref() == Some(url) {
            return false;
        }

        self.connection_url = Some(url.to_string());
        self.emit(&ClusterEvent::GatewayUpdated(self.entity_ref()));
        true
    }

    fn transition(&mut self, to: LifecycleState) -> Result<bool> {
        if self.state == LifecycleState::Stopped {
            return Err(Error::InvalidTransition {
                instance_key: self.instance_key.to_string(),
                from: self.state,
                to,
            });
        }

        if self.state == to {
            return Ok(false);
        }

        debug!(
            "Gateway {} moving from {:?} to {:?}",
            self.instance_key, self.state, to
        );
        self.state = to;
        Ok(true)
    }

    /// The connection is up and delivered a configuration snapshot
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] if the gateway has stopped.
    pub(crate) fn connected(&mut self, config: GatewayConfig) -> Result<()> {
        self.transition(LifecycleState::Available)?;
        self.config = Some(config);

        info!("Gateway {} is available", self.instance_key);
        self.emit(&ClusterEvent::GatewayAvailable(self.entity_ref()));
        Ok(())
    }

    /// The connection dropped without the member leaving
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] if the gateway has stopped.
    pub(crate) fn connection_lost(&mut self) -> Result<()> {
        if self.transition(LifecycleState::Unavailable)? {
            info!("Gateway {} is unavailable", self.instance_key);
            self.emit(&ClusterEvent::GatewayUnavailable(self.entity_ref()));
        }
        Ok(())
    }

    /// Mark the gateway stopped at `at`, closing everything below it.
    /// Returns `false` if it had already stopped.
    pub(crate) fn mark_stopped(&mut self, at: DateTime<Utc>) -> bool {
        if self.stop_time.is_some() {
            return false;
        }

        self.stop_time = Some(at);
        self.state = LifecycleState::Stopped;
        for service in self.services.values_mut() {
            service.parent_stopped(at);
        }

        info!("Gateway {} stopped at {}", self.instance_key, at);
        self.emit(&ClusterEvent::GatewayStopped {
            gateway: self.entity_ref(),
            stop_time: at,
        });
        true
    }

    /// Merge host metrics reported at `observed_at`.
    ///
    /// A reported uptime pins the start time of the gateway process, replacing
    /// the join time used until then.
    pub(crate) fn merge_summary(&mut self, update: &GatewaySummary, observed_at: DateTime<Utc>) {
        let mut changed = self.summary.merge(update);

        let started = update
            .uptime_seconds
            .and_then(|uptime| started_before(observed_at, uptime));
        if started.is_some() && self.start_time != started {
            self.start_time = started;
            changed = true;
        }

        if changed {
            self.emit(&ClusterEvent::GatewayUpdated(self.entity_ref()));
        }
    }

    /// Reconcile services against the list the gateway reported.
    ///
    /// Listed services are created or updated. Services missing from the list
    /// are kept: a service only goes away with its gateway.
    pub fn apply_service_list(&mut self, list: &ServiceList) {
        let diff = diff_keys(&self.services.keys(), list.services.keys());

        if !diff.missing.is_empty() {
            debug!(
                "Gateway {} no longer lists services {:?}, keeping them",
                self.instance_key, diff.missing
            );
        }

        for service_id in &diff.retained {
            if let (Some(service), Some(info)) = (
                self.services.get_mut(service_id),
                list.services.get(service_id),
            ) {
                service.apply_info(info);
            }
        }

        for service_id in diff.added {
            let Some(info) = list.services.get(&service_id) else {
                continue;
            };

            let mut service = ServiceNode::new(
                self.instance_key.clone(),
                service_id,
                info.clone(),
                self.observers.clone(),
            );
            if let Some(at) = self.stop_time {
                service.parent_stopped(at);
            }

            service.emit(&ClusterEvent::ServiceAdded(service.entity_ref()));
            self.services.put(service_id, service);
        }
    }

    /// Route a notification to one of this gateway's services
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownParent`] if the service is not registered, or
    /// whatever the service itself rejects.
    pub fn process_service_notification(
        &mut self,
        service_id: ServiceId,
        notification: &ServiceNotification,
    ) -> Result<()> {
        let instance_key = self.instance_key.clone();
        let service = self
            .services
            .get_mut(&service_id)
            .ok_or_else(|| Error::UnknownParent {
                kind: notification_label(notification).to_string(),
                parent: format!("service {service_id} of gateway {instance_key}"),
            })?;

        service.process_notification(notification)
    }

    /// Reconcile one service's sessions against a full listing
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownParent`] if the service is not registered.
    pub fn apply_session_list(
        &mut self,
        service_id: ServiceId,
        listing: &SessionList,
        observed_at: DateTime<Utc>,
        prune_closed: bool,
    ) -> Result<()> {
        let instance_key = self.instance_key.clone();
        let service = self
            .services
            .get_mut(&service_id)
            .ok_or_else(|| Error::UnknownParent {
                kind: "session-list".to_string(),
                parent: format!("service {service_id} of gateway {instance_key}"),
            })?;

        service.update_session_data(listing, observed_at, prune_closed);
        Ok(())
    }

    /// Tear down the gateway and everything it owns, bottom-up.
    ///
    /// The caller removes the gateway from its registry afterwards.
    pub fn destroy(&mut self, at: DateTime<Utc>) {
        self.mark_stopped(at);

        for (_, mut service) in self.services.drain() {
            service.destroy(at);
        }

        info!("Destroyed gateway {}", self.instance_key);
        self.emit(&ClusterEvent::GatewayRemoved(self.entity_ref()));
        self.observers.clear();
    }
}

fn started_before(observed_at: DateTime<Utc>, uptime_seconds: u64) -> Option<DateTime<Utc>> {
    let uptime = TimeDelta::try_seconds(i64::try_from(uptime_seconds).ok()?)?;
    observed_at.checked_sub_signed(uptime)
}

const fn notification_label(notification: &ServiceNotification) -> &'static str {
    match notification {
        ServiceNotification::Summary(_) => "service-summary",
        ServiceNotification::SessionOpened { .. } => "session-opened",
        ServiceNotification::SessionClosed { .. } => "session-closed",
        ServiceNotification::SessionSummary { .. } => "session-summary",
    }
}
