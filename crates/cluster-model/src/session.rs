//! Session entity

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::events::{ClusterEvent, EntityRef, Observer, Observers};
use crate::ids::{EntityId, InstanceKey, ServiceId, SessionId};
use crate::metrics::SessionSummary;
use crate::notification::SessionRecord;

/// One session inside a service.
///
/// Closed sessions stay in their service's registry until the service is
/// destroyed or a bulk listing prunes them.
#[derive(Clone, Debug)]
pub struct SessionNode {
    entity_id: EntityId,
    instance_key: InstanceKey,
    service_id: ServiceId,
    session_id: SessionId,
    open: bool,
    start_time: Option<DateTime<Utc>>,
    stop_time: Option<DateTime<Utc>>,
    summary: SessionSummary,
    observers: Observers,
}

impl SessionNode {
    /// A session announced by a live open notification
    pub(crate) fn opened(
        instance_key: InstanceKey,
        service_id: ServiceId,
        session_id: SessionId,
        start_time: DateTime<Utc>,
        observers: Observers,
    ) -> Self {
        Self {
            entity_id: EntityId::next(),
            instance_key,
            service_id,
            session_id,
            open: true,
            start_time: Some(start_time),
            stop_time: None,
            summary: SessionSummary::zeroed(),
            observers,
        }
    }

    /// A session first seen in a bulk listing
    pub(crate) fn listed(
        instance_key: InstanceKey,
        service_id: ServiceId,
        session_id: SessionId,
        record: &SessionRecord,
        observers: Observers,
    ) -> Self {
        let mut summary = SessionSummary::zeroed();
        summary.merge(&record.summary);

        Self {
            entity_id: EntityId::next(),
            instance_key,
            service_id,
            session_id,
            open: true,
            start_time: record.start_time,
            stop_time: None,
            summary,
            observers,
        }
    }

    /// Identity of this session, stable for its lifetime
    #[must_use]
    pub const fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    /// Session id
    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Owning service
    #[must_use]
    pub const fn service_id(&self) -> ServiceId {
        self.service_id
    }

    /// Instance key of the owning gateway
    #[must_use]
    pub const fn instance_key(&self) -> &InstanceKey {
        &self.instance_key
    }

    /// Whether the session is still open
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.open
    }

    /// When the session opened, if known
    #[must_use]
    pub const fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    /// When the session closed; `None` while open
    #[must_use]
    pub const fn stop_time(&self) -> Option<DateTime<Utc>> {
        self.stop_time
    }

    /// Latest traffic counters
    #[must_use]
    pub const fn summary(&self) -> &SessionSummary {
        &self.summary
    }

    /// Bytes read from the client
    #[must_use]
    pub fn read_bytes(&self) -> u64 {
        self.summary.read_bytes.unwrap_or_default()
    }

    /// Bytes written to the client
    #[must_use]
    pub fn written_bytes(&self) -> u64 {
        self.summary.written_bytes.unwrap_or_default()
    }

    /// Reference used in events about this session
    #[must_use]
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::session(
            self.entity_id,
            self.instance_key.clone(),
            self.service_id,
            self.session_id,
        )
    }

    /// Register an observer for this session's events
    pub fn observe(&mut self, observer: Observer) {
        self.observers.push(observer);
    }

    pub(crate) fn emit(&self, event: &ClusterEvent) {
        self.observers.notify(event);
    }

    pub(crate) fn set_instance_key(&mut self, instance_key: InstanceKey) {
        self.instance_key = instance_key;
    }

    /// Mark the session closed. Returns `false` if it already was.
    pub(crate) fn close(&mut self, at: DateTime<Utc>) -> bool {
        if !self.open {
            return false;
        }

        self.open = false;
        self.stop_time = Some(at);

        debug!(
            "Session {} on service {} of {} closed",
            self.session_id, self.service_id, self.instance_key
        );
        self.emit(&ClusterEvent::SessionClosed {
            session: self.entity_ref(),
            stop_time: at,
        });

        true
    }

    /// Merge fresh counters
    pub(crate) fn merge_summary(&mut self, update: &SessionSummary) {
        if self.summary.merge(update) {
            self.emit(&ClusterEvent::SessionUpdated(self.entity_ref()));
        }
    }

    /// Merge what a bulk listing knows about this session.
    ///
    /// A listing never reopens a closed session; the listing was taken before
    /// the close was processed.
    pub(crate) fn load(&mut self, record: &SessionRecord) {
        if self.start_time.is_none() {
            self.start_time = record.start_time;
        }

        if !self.open {
            debug!(
                "Listing reports closed session {} on service {} as open, keeping it closed",
                self.session_id, self.service_id
            );
        }

        self.merge_summary(&record.summary);
    }

    /// Announce removal from the registry and drop every observer
    pub(crate) fn retire(&mut self) {
        self.emit(&ClusterEvent::SessionRemoved(self.entity_ref()));
        self.observers.clear();
    }

    /// Tear the session down as part of its service's destruction
    pub(crate) fn destroy(&mut self, at: DateTime<Utc>) {
        self.close(at);
        self.retire();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn session() -> SessionNode {
        SessionNode::opened(
            InstanceKey::from("abc"),
            ServiceId::new(1),
            SessionId::new(42),
            at(10),
            Observers::new(),
        )
    }

    #[test]
    fn test_opened_session_has_zeroed_counters() {
        let session = session();

        assert!(session.is_open());
        assert_eq!(session.start_time(), Some(at(10)));
        assert_eq!(session.read_bytes(), 0);
        assert_eq!(session.summary().written_bytes, Some(0));
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut session = session();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        session.observe(Arc::new(move |event: &ClusterEvent| {
            sink.lock().push(event.clone());
        }));

        assert!(session.close(at(20)));
        assert!(!session.close(at(30)));

        assert!(!session.is_open());
        assert_eq!(session.stop_time(), Some(at(20)));
        assert_eq!(events.lock().len(), 1);
    }

    #[test]
    fn test_load_does_not_regress_counters() {
        let mut session = session();
        session.merge_summary(&SessionSummary {
            read_bytes: Some(500),
            ..SessionSummary::default()
        });

        session.load(&SessionRecord {
            start_time: Some(at(5)),
            summary: SessionSummary {
                written_bytes: Some(7),
                ..SessionSummary::default()
            },
        });

        assert_eq!(session.read_bytes(), 500);
        assert_eq!(session.written_bytes(), 7);
        assert_eq!(session.start_time(), Some(at(10)));
    }

    #[test]
    fn test_load_never_reopens() {
        let mut session = session();
        session.close(at(20));

        session.load(&SessionRecord::default());

        assert!(!session.is_open());
    }
}
