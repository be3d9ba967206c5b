//! Service entity and per-service notification handling

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::events::{ClusterEvent, EntityRef, Observer, Observers};
use crate::ids::{EntityId, InstanceKey, ServiceId, SessionId};
use crate::metrics::{ServiceSummary, SessionSummary};
use crate::notification::{ServiceInfo, SessionList};
use crate::reconcile::diff_keys;
use crate::registry::EntityRegistry;
use crate::session::SessionNode;

/// Notification addressed to one service
#[derive(Clone, Debug, PartialEq)]
pub enum ServiceNotification {
    /// Running totals for the service
    Summary(ServiceSummary),

    /// A session opened
    SessionOpened {
        /// The new session
        session_id: SessionId,
        /// When it opened
        at: DateTime<Utc>,
    },

    /// A session closed
    SessionClosed {
        /// The closed session
        session_id: SessionId,
        /// When it closed
        at: DateTime<Utc>,
    },

    /// Traffic counters for one session
    SessionSummary {
        /// The session
        session_id: SessionId,
        /// The counters
        summary: SessionSummary,
    },
}

/// One service hosted by a gateway.
///
/// Services are created from their gateway's service list and destroyed only
/// together with their gateway.
#[derive(Clone, Debug)]
pub struct ServiceNode {
    entity_id: EntityId,
    instance_key: InstanceKey,
    service_id: ServiceId,
    info: ServiceInfo,
    stop_time: Option<DateTime<Utc>>,
    summary: ServiceSummary,
    sessions: EntityRegistry<SessionId, SessionNode>,
    observers: Observers,
}

impl ServiceNode {
    pub(crate) fn new(
        instance_key: InstanceKey,
        service_id: ServiceId,
        info: ServiceInfo,
        observers: Observers,
    ) -> Self {
        Self {
            entity_id: EntityId::next(),
            instance_key,
            service_id,
            info,
            stop_time: None,
            summary: ServiceSummary::default(),
            sessions: EntityRegistry::new(),
            observers,
        }
    }

    /// Identity of this service, stable for its lifetime
    #[must_use]
    pub const fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    /// Service id
    #[must_use]
    pub const fn service_id(&self) -> ServiceId {
        self.service_id
    }

    /// Instance key of the owning gateway
    #[must_use]
    pub const fn instance_key(&self) -> &InstanceKey {
        &self.instance_key
    }

    /// Configured name
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.info.name.as_deref()
    }

    /// Service type
    #[must_use]
    pub fn service_type(&self) -> Option<&str> {
        self.info.service_type.as_deref()
    }

    /// Stop time inherited from the gateway
    #[must_use]
    pub const fn stop_time(&self) -> Option<DateTime<Utc>> {
        self.stop_time
    }

    /// Latest running totals
    #[must_use]
    pub const fn summary(&self) -> &ServiceSummary {
        &self.summary
    }

    /// Sessions currently open according to the gateway's own count
    #[must_use]
    pub fn current_session_count(&self) -> u64 {
        self.summary.current_session_count.unwrap_or_default()
    }

    /// Sessions opened since the service started
    #[must_use]
    pub fn total_session_count(&self) -> u64 {
        self.summary.total_session_count.unwrap_or_default()
    }

    /// The session registry
    #[must_use]
    pub const fn sessions(&self) -> &EntityRegistry<SessionId, SessionNode> {
        &self.sessions
    }

    /// Look up a session
    #[must_use]
    pub fn session(&self, session_id: SessionId) -> Option<&SessionNode> {
        self.sessions.get(&session_id)
    }

    /// Number of sessions the model currently holds open
    #[must_use]
    pub fn open_session_count(&self) -> usize {
        self.sessions.values().iter().filter(|s| s.is_open()).count()
    }

    /// Reference used in events about this service
    #[must_use]
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::service(self.entity_id, self.instance_key.clone(), self.service_id)
    }

    /// Register an observer for this service and its sessions
    pub fn observe(&mut self, observer: Observer) {
        self.observers.push(observer.clone());
        for session in self.sessions.values_mut() {
            session.observe(observer.clone());
        }
    }

    pub(crate) fn emit(&self, event: &ClusterEvent) {
        self.observers.notify(event);
    }

    pub(crate) fn set_instance_key(&mut self, instance_key: &InstanceKey) {
        self.instance_key = instance_key.clone();
        for session in self.sessions.values_mut() {
            session.set_instance_key(instance_key.clone());
        }
    }

    /// Update name and type from a service listing
    pub(crate) fn apply_info(&mut self, info: &ServiceInfo) {
        if self.info != *info {
            self.info = info.clone();
            self.emit(&ClusterEvent::ServiceUpdated(self.entity_ref()));
        }
    }

    /// Apply one notification addressed to this service
    ///
    /// # Errors
    ///
    /// Returns [`Error::EntityStopped`] for a session open on a stopped service.
    pub fn process_notification(&mut self, notification: &ServiceNotification) -> Result<()> {
        match notification {
            ServiceNotification::Summary(update) => {
                if self.summary.merge(update) {
                    self.emit(&ClusterEvent::ServiceUpdated(self.entity_ref()));
                }
            }
            ServiceNotification::SessionOpened { session_id, at } => {
                self.open_session(*session_id, *at)?;
            }
            ServiceNotification::SessionClosed { session_id, at } => {
                self.close_session(*session_id, *at);
            }
            ServiceNotification::SessionSummary {
                session_id,
                summary,
            } => match self.sessions.get_mut(session_id) {
                Some(session) => session.merge_summary(summary),
                None => debug!(
                    "Ignoring counters for unknown session {} on service {}",
                    session_id, self.service_id
                ),
            },
        }

        Ok(())
    }

    /// Create a session for a live open notification.
    ///
    /// Returns `false` if the session already exists; the existing entry wins
    /// so a racing bulk listing never loses fields.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EntityStopped`] if the service has stopped.
    pub fn open_session(&mut self, session_id: SessionId, at: DateTime<Utc>) -> Result<bool> {
        if self.stop_time.is_some() {
            return Err(Error::EntityStopped {
                entity: format!("service {} of {}", self.service_id, self.instance_key),
            });
        }

        if self.sessions.contains_key(&session_id) {
            debug!(
                "Duplicate open for session {} on service {}",
                session_id, self.service_id
            );
            return Ok(false);
        }

        let session = SessionNode::opened(
            self.instance_key.clone(),
            self.service_id,
            session_id,
            at,
            self.observers.clone(),
        );
        session.emit(&ClusterEvent::SessionOpened(session.entity_ref()));
        self.sessions.put(session_id, session);

        Ok(true)
    }

    /// Close a session. Unknown sessions are ignored; their open notification
    /// was lost or superseded.
    pub fn close_session(&mut self, session_id: SessionId, at: DateTime<Utc>) -> bool {
        match self.sessions.get_mut(&session_id) {
            Some(session) => session.close(at),
            None => {
                debug!(
                    "Ignoring close for unknown session {} on service {}",
                    session_id, self.service_id
                );
                false
            }
        }
    }

    /// Reconcile the live session set against a full listing.
    ///
    /// Open sessions missing from the listing are closed at `observed_at`;
    /// sessions that were already closed and are missing are removed when
    /// `prune_closed` is set. Listed sessions are merged or created.
    pub fn update_session_data(
        &mut self,
        listing: &SessionList,
        observed_at: DateTime<Utc>,
        prune_closed: bool,
    ) {
        let diff = diff_keys(&self.sessions.keys(), listing.sessions.keys());

        for session_id in &diff.missing {
            let Some(session) = self.sessions.get_mut(session_id) else {
                continue;
            };

            if session.is_open() {
                session.close(observed_at);
            } else if prune_closed {
                if let Some(mut session) = self.sessions.remove(session_id) {
                    session.retire();
                }
            }
        }

        for session_id in &diff.retained {
            if let (Some(session), Some(record)) = (
                self.sessions.get_mut(session_id),
                listing.sessions.get(session_id),
            ) {
                session.load(record);
            }
        }

        if self.stop_time.is_some() && !diff.added.is_empty() {
            debug!(
                "Service {} has stopped, not adding {} listed sessions",
                self.service_id,
                diff.added.len()
            );
            return;
        }

        for session_id in diff.added {
            let Some(record) = listing.sessions.get(&session_id) else {
                continue;
            };

            let session = SessionNode::listed(
                self.instance_key.clone(),
                self.service_id,
                session_id,
                record,
                self.observers.clone(),
            );
            session.emit(&ClusterEvent::SessionOpened(session.entity_ref()));
            self.sessions.put(session_id, session);
        }
    }

    /// The owning gateway stopped: inherit its stop time and close every session
    pub(crate) fn parent_stopped(&mut self, at: DateTime<Utc>) {
        if self.stop_time.is_some() {
            return;
        }

        self.stop_time = Some(at);
        for session in self.sessions.values_mut() {
            session.close(at);
        }
    }

    /// Tear down the service and every session it owns
    pub(crate) fn destroy(&mut self, at: DateTime<Utc>) {
        self.parent_stopped(at);

        for (_, mut session) in self.sessions.drain() {
            session.destroy(at);
        }

        info!(
            "Destroyed service {} of {}",
            self.service_id, self.instance_key
        );
        self.emit(&ClusterEvent::ServiceRemoved(self.entity_ref()));
        self.observers.clear();
    }
}
