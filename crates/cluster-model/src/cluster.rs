//! Cluster coordinator: membership reconciliation and gateway lifecycle

use std::cmp::Ordering;
use std::fmt::{self, Debug};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ClusterConfig;
use crate::error::{Error, Result};
use crate::events::{ClusterEvent, Observer, Observers};
use crate::gateway::GatewayNode;
use crate::ids::{EntityId, InstanceKey, ServiceId};
use crate::metrics::GatewaySummary;
use crate::notification::{ClusterStateSnapshot, GatewayConfig, ServiceList, SessionList};
use crate::reconcile::diff_keys;
use crate::registry::EntityRegistry;
use crate::service::ServiceNotification;
use crate::transport::GatewayTransport;

/// What a membership reconciliation changed
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MembershipChange {
    /// Gateways that were marked stopped
    pub stopped: Vec<InstanceKey>,
    /// Gateways that were created
    pub added: Vec<InstanceKey>,
}

impl MembershipChange {
    /// Whether the reconciliation changed nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stopped.is_empty() && self.added.is_empty()
    }
}

/// Aggregate counts for display headers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ClusterSummary {
    /// Gateways that have not stopped
    pub live_nodes: usize,
    /// Gateways kept for history after stopping
    pub stopped_nodes: usize,
    /// Sessions currently open
    pub open_sessions: usize,
    /// Sessions held, open or closed
    pub total_sessions: usize,
}

/// Owns every gateway of one cluster and reconciles membership against it.
///
/// Entry points take `&mut self`; callers that share a coordinator across
/// threads wrap it in [`crate::SharedCluster`] so handlers never interleave.
pub struct ClusterCoordinator<T>
where
    T: GatewayTransport,
{
    gateways: EntityRegistry<InstanceKey, GatewayNode>,
    transport: Arc<T>,
    observers: Observers,
    config: ClusterConfig,
}

impl<T> ClusterCoordinator<T>
where
    T: GatewayTransport,
{
    /// Create a coordinator with default configuration
    pub fn new(transport: Arc<T>) -> Self {
        Self::with_config(transport, ClusterConfig::default())
    }

    /// Create a coordinator with custom configuration
    pub fn with_config(transport: Arc<T>, config: ClusterConfig) -> Self {
        debug!("Creating cluster coordinator with {:?}", config);

        Self {
            gateways: EntityRegistry::new(),
            transport,
            observers: Observers::new(),
            config,
        }
    }

    /// Configuration in use
    pub const fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Transport used for disconnects
    pub const fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Register an observer for every current and future entity
    pub fn observe(&mut self, observer: Observer) {
        self.observers.push(observer.clone());
        for gateway in self.gateways.values_mut() {
            gateway.observe(observer.clone());
        }
    }

    fn create_gateway(
        &mut self,
        instance_key: InstanceKey,
        url: Option<String>,
        start_time: Option<DateTime<Utc>>,
    ) -> EntityId {
        let gateway = GatewayNode::new(
            instance_key.clone(),
            url,
            start_time,
            self.observers.clone(),
        );
        let entity_id = gateway.entity_id();

        info!(
            "Adding gateway {} at {}",
            instance_key,
            gateway.connection_url().unwrap_or("<unknown url>")
        );
        gateway.emit(&ClusterEvent::GatewayAdded(gateway.entity_ref()));
        self.gateways.put(instance_key, gateway);

        entity_id
    }

    pub(crate) fn gateway_mut(&mut self, instance_key: &InstanceKey) -> Result<&mut GatewayNode> {
        self.gateways
            .get_mut(instance_key)
            .ok_or_else(|| Error::KeyNotFound {
                key: instance_key.to_string(),
            })
    }

    /// Create the self node for the gateway we connect to first.
    ///
    /// Its instance key stays unassigned until [`Self::adopt_instance_key`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::SelfNodeExists`] if an unassigned node already exists.
    pub fn start(&mut self, connection_url: &str) -> Result<EntityId> {
        let key = InstanceKey::unassigned();
        if self.gateways.contains_key(&key) {
            return Err(Error::SelfNodeExists);
        }

        Ok(self.create_gateway(key, Some(connection_url.to_string()), None))
    }

    /// Give the self node its real instance key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyNotFound`] if there is no self node waiting for a
    /// key, or [`Error::KeyCollision`] if another gateway already holds
    /// `instance_key`. Both nodes are left as they were on collision.
    pub fn adopt_instance_key(&mut self, instance_key: InstanceKey) -> Result<()> {
        if instance_key.is_unassigned() {
            return Ok(());
        }

        let previous = InstanceKey::unassigned();
        if let Err(e) = self.gateways.rekey(&previous, instance_key.clone()) {
            warn!("Cannot adopt instance key {}: {}", instance_key, e);
            return Err(e);
        }

        let gateway = self.gateway_mut(&instance_key)?;
        gateway.set_instance_key(instance_key.clone());

        info!("Self gateway is instance {}", instance_key);
        gateway.emit(&ClusterEvent::GatewayRekeyed {
            gateway: gateway.entity_ref(),
            previous,
        });

        Ok(())
    }

    /// Reconcile the gateway registry against a full membership snapshot.
    ///
    /// Gateways absent from the snapshot are marked stopped at `observed_at`,
    /// unknown members are created, and everything else is left untouched. The
    /// self node is skipped while its key is unassigned: it cannot appear in a
    /// snapshot under a key we don't know yet.
    pub fn reconcile_membership(
        &mut self,
        snapshot: &ClusterStateSnapshot,
        observed_at: DateTime<Utc>,
    ) -> MembershipChange {
        let existing: Vec<InstanceKey> = self
            .gateways
            .keys()
            .into_iter()
            .filter(|key| !key.is_unassigned())
            .collect();
        let diff = diff_keys(&existing, snapshot.members.keys());

        let mut change = MembershipChange::default();

        for key in diff.missing {
            if let Some(gateway) = self.gateways.get_mut(&key) {
                if gateway.mark_stopped(observed_at) {
                    change.stopped.push(key);
                }
            }
        }

        for key in diff.added {
            if key.is_unassigned() {
                warn!("Ignoring membership entry without an instance key");
                continue;
            }

            let url = snapshot.members.get(&key).cloned().flatten();
            self.create_gateway(key.clone(), url, None);
            change.added.push(key);
        }

        debug!(
            "Membership reconciled: {} stopped, {} added, {} confirmed",
            change.stopped.len(),
            change.added.len(),
            diff.retained.len()
        );

        change
    }

    /// A member joined. Returns `false` if it is already known.
    pub fn process_join(&mut self, instance_key: &InstanceKey) -> bool {
        self.join(instance_key, None)
    }

    /// A member joined at `joined_at`, which stands in for its start time until
    /// a summary reports its uptime.
    pub(crate) fn join(
        &mut self,
        instance_key: &InstanceKey,
        joined_at: Option<DateTime<Utc>>,
    ) -> bool {
        if instance_key.is_unassigned() {
            warn!("Ignoring join without an instance key");
            return false;
        }

        if self.gateways.contains_key(instance_key) {
            debug!("Duplicate join for gateway {}", instance_key);
            return false;
        }

        self.create_gateway(instance_key.clone(), None, joined_at);
        true
    }

    /// A member left. Returns `false` if it is unknown or already stopped.
    pub fn process_leave(
        &mut self,
        instance_key: &InstanceKey,
        observed_at: DateTime<Utc>,
    ) -> bool {
        match self.gateways.get_mut(instance_key) {
            Some(gateway) => gateway.mark_stopped(observed_at),
            None => {
                debug!("Ignoring leave for unknown gateway {}", instance_key);
                false
            }
        }
    }

    /// Destroy a gateway and everything it owns, then remove it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyNotFound`] if the gateway is not registered.
    pub fn destroy_gateway(&mut self, instance_key: &InstanceKey) -> Result<()> {
        self.gateway_mut(instance_key)?.destroy(Utc::now());
        self.gateways.remove(instance_key);
        Ok(())
    }

    /// Disconnect and destroy every gateway, whatever its state.
    ///
    /// Runs to completion before returning so the transport has issued every
    /// disconnect by the time the caller tears it down. Returns how many
    /// gateways were removed.
    pub fn logout_all(&mut self) -> usize {
        let at = Utc::now();
        let keys = self.gateways.keys();

        info!("Logging out of {} gateways", keys.len());

        for key in &keys {
            if let Some(gateway) = self.gateways.get_mut(key) {
                self.transport.disconnect(gateway);
                gateway.destroy(at);
            }
            self.gateways.remove(key);
        }

        keys.len()
    }

    /// Record a gateway's management endpoint
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyNotFound`] if the gateway is not registered.
    pub fn set_connection_url(&mut self, instance_key: &InstanceKey, url: &str) -> Result<()> {
        self.gateway_mut(instance_key)?.set_connection_url(url);
        Ok(())
    }

    /// A gateway connected and its configuration snapshot was fetched
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyNotFound`] for an unknown gateway, or
    /// [`Error::InvalidTransition`] if it has stopped.
    pub fn gateway_connected(
        &mut self,
        instance_key: &InstanceKey,
        config: GatewayConfig,
    ) -> Result<()> {
        self.gateway_mut(instance_key)?.connected(config)
    }

    /// A gateway's connection dropped
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyNotFound`] for an unknown gateway, or
    /// [`Error::InvalidTransition`] if it has stopped.
    pub fn gateway_connection_lost(&mut self, instance_key: &InstanceKey) -> Result<()> {
        self.gateway_mut(instance_key)?.connection_lost()
    }

    /// Merge host metrics reported at `observed_at` into a gateway
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyNotFound`] if the gateway is not registered.
    pub fn merge_gateway_summary(
        &mut self,
        instance_key: &InstanceKey,
        summary: &GatewaySummary,
        observed_at: DateTime<Utc>,
    ) -> Result<()> {
        self.gateway_mut(instance_key)?
            .merge_summary(summary, observed_at);
        Ok(())
    }

    /// Reconcile a gateway's services against the list it reported
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyNotFound`] if the gateway is not registered.
    pub fn apply_service_list(
        &mut self,
        instance_key: &InstanceKey,
        list: &ServiceList,
    ) -> Result<()> {
        self.gateway_mut(instance_key)?.apply_service_list(list);
        Ok(())
    }

    /// Reconcile one service's sessions against a full listing
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyNotFound`] for an unknown gateway or
    /// [`Error::UnknownParent`] for an unknown service.
    pub fn apply_session_list(
        &mut self,
        instance_key: &InstanceKey,
        service_id: ServiceId,
        listing: &SessionList,
        observed_at: DateTime<Utc>,
    ) -> Result<()> {
        let prune_closed = self.config.prune_closed_sessions;
        self.gateway_mut(instance_key)?
            .apply_session_list(service_id, listing, observed_at, prune_closed)
    }

    /// Route a notification to a service of a gateway
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyNotFound`] for an unknown gateway, or whatever the
    /// gateway and service reject.
    pub fn process_service_notification(
        &mut self,
        instance_key: &InstanceKey,
        service_id: ServiceId,
        notification: &ServiceNotification,
    ) -> Result<()> {
        self.gateway_mut(instance_key)?
            .process_service_notification(service_id, notification)
    }

    /// Every gateway, in registration order
    pub fn nodes(&self) -> Vec<&GatewayNode> {
        self.gateways.values()
    }

    /// Every gateway in display order.
    ///
    /// Ordered by connection URL, gateways without one last. For the same URL
    /// the live instance comes first, then stopped instances oldest stop first.
    pub fn sorted_nodes(&self) -> Vec<&GatewayNode> {
        let mut nodes = self.gateways.values();
        nodes.sort_by(|a, b| display_order(a, b));
        nodes
    }

    /// Gateways that are connected with a configuration snapshot, in display order
    pub fn available_nodes(&self) -> Vec<&GatewayNode> {
        self.sorted_nodes()
            .into_iter()
            .filter(|gateway| gateway.is_available())
            .collect()
    }

    /// Gateways with a configuration snapshot, a connection URL and no stop
    /// time, in display order
    pub fn usable_nodes(&self) -> Vec<&GatewayNode> {
        self.sorted_nodes()
            .into_iter()
            .filter(|gateway| gateway.is_usable() && gateway.connection_url().is_some())
            .collect()
    }

    /// Look up a gateway by instance key
    pub fn find_by_instance_key(&self, instance_key: &InstanceKey) -> Option<&GatewayNode> {
        self.gateways.get(instance_key)
    }

    /// Look up the gateway reached through a connection URL, preferring the
    /// live instance over stopped ones
    pub fn find_by_connection_url(&self, url: &str) -> Option<&GatewayNode> {
        self.sorted_nodes()
            .into_iter()
            .find(|gateway| gateway.connection_url() == Some(url))
    }

    /// Look up a gateway by entity id
    pub fn find_by_entity_id(&self, entity_id: EntityId) -> Option<&GatewayNode> {
        self.gateways
            .values()
            .into_iter()
            .find(|gateway| gateway.entity_id() == entity_id)
    }

    /// Aggregate counts across the cluster
    pub fn summary(&self) -> ClusterSummary {
        self.gateways
            .values()
            .iter()
            .fold(ClusterSummary::default(), |mut summary, gateway| {
                if gateway.is_stopped() {
                    summary.stopped_nodes += 1;
                } else {
                    summary.live_nodes += 1;
                }
                summary.open_sessions += gateway.open_session_count();
                summary.total_sessions += gateway.session_count();
                summary
            })
    }

    /// Number of gateways held, stopped ones included
    pub fn len(&self) -> usize {
        self.gateways.len()
    }

    /// Whether no gateway is held
    pub fn is_empty(&self) -> bool {
        self.gateways.is_empty()
    }
}

fn display_order(a: &GatewayNode, b: &GatewayNode) -> Ordering {
    let by_url = match (a.connection_url(), b.connection_url()) {
        (Some(a_url), Some(b_url)) => a_url.cmp(b_url),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };

    by_url
        .then_with(|| a.is_stopped().cmp(&b.is_stopped()))
        .then_with(|| a.stop_time().cmp(&b.stop_time()))
}

impl<T> Debug for ClusterCoordinator<T>
where
    T: GatewayTransport,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterCoordinator")
            .field("gateways", &self.gateways.keys())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
