//! Test doubles and fixtures for the cluster model.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use proven_cluster_model::{
    DecodedNotification, GatewayNode, GatewayTransport, InstanceKey, NotificationKind, ServiceId,
    SessionId,
};
use serde_json::Value;

/// A transport that records every disconnect it is asked for. Used for testing.
#[derive(Clone, Debug, Default)]
pub struct RecordingTransport {
    disconnected: Arc<Mutex<Vec<(InstanceKey, Option<String>)>>>,
}

impl RecordingTransport {
    /// Creates a new instance of `RecordingTransport`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Instance keys disconnected so far, in call order.
    #[must_use]
    pub fn disconnected(&self) -> Vec<InstanceKey> {
        self.disconnected
            .lock()
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Connection URLs of disconnected gateways, in call order.
    #[must_use]
    pub fn disconnected_urls(&self) -> Vec<Option<String>> {
        self.disconnected
            .lock()
            .iter()
            .map(|(_, url)| url.clone())
            .collect()
    }
}

impl GatewayTransport for RecordingTransport {
    fn disconnect(&self, gateway: &GatewayNode) {
        self.disconnected.lock().push((
            gateway.instance_key().clone(),
            gateway.connection_url().map(ToString::to_string),
        ));
    }
}

/// Timestamp `secs` seconds after the Unix epoch.
#[must_use]
pub fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

/// Builds decoded notifications the way the transport would deliver them.
#[derive(Clone, Debug)]
pub struct NotificationBuilder {
    notification: DecodedNotification,
}

impl NotificationBuilder {
    /// Starts a notification of the given kind for a gateway.
    #[must_use]
    pub fn new(kind: NotificationKind, instance_key: &str) -> Self {
        Self::raw(kind.as_str(), instance_key)
    }

    /// Starts a notification with an arbitrary wire kind.
    #[must_use]
    pub fn raw(kind: &str, instance_key: &str) -> Self {
        Self {
            notification: DecodedNotification {
                kind: kind.to_string(),
                instance_key: Some(InstanceKey::from(instance_key)),
                service_id: None,
                session_id: None,
                timestamp: ts(0),
                payload: Value::Null,
            },
        }
    }

    /// A `member-joined` notification.
    #[must_use]
    pub fn joined(instance_key: &str) -> DecodedNotification {
        Self::new(NotificationKind::MemberJoined, instance_key).build()
    }

    /// A `member-left` notification at `secs`.
    #[must_use]
    pub fn left(instance_key: &str, secs: i64) -> DecodedNotification {
        Self::new(NotificationKind::MemberLeft, instance_key)
            .at(secs)
            .build()
    }

    /// A `session-opened` notification at `secs`.
    #[must_use]
    pub fn session_opened(
        instance_key: &str,
        service_id: u64,
        session_id: u64,
        secs: i64,
    ) -> DecodedNotification {
        Self::new(NotificationKind::SessionOpened, instance_key)
            .service(service_id)
            .session(session_id)
            .at(secs)
            .build()
    }

    /// A `session-closed` notification at `secs`.
    #[must_use]
    pub fn session_closed(
        instance_key: &str,
        service_id: u64,
        session_id: u64,
        secs: i64,
    ) -> DecodedNotification {
        Self::new(NotificationKind::SessionClosed, instance_key)
            .service(service_id)
            .session(session_id)
            .at(secs)
            .build()
    }

    /// Sets the service id.
    #[must_use]
    pub fn service(mut self, service_id: u64) -> Self {
        self.notification.service_id = Some(ServiceId::new(service_id));
        self
    }

    /// Sets the session id.
    #[must_use]
    pub fn session(mut self, session_id: u64) -> Self {
        self.notification.session_id = Some(SessionId::new(session_id));
        self
    }

    /// Sets the timestamp to `secs` after the epoch.
    #[must_use]
    pub fn at(mut self, secs: i64) -> Self {
        self.notification.timestamp = ts(secs);
        self
    }

    /// Sets the payload.
    #[must_use]
    pub fn payload(mut self, payload: Value) -> Self {
        self.notification.payload = payload;
        self
    }

    /// Removes the instance key.
    #[must_use]
    pub fn without_instance_key(mut self) -> Self {
        self.notification.instance_key = None;
        self
    }

    /// Finishes the notification.
    #[must_use]
    pub fn build(self) -> DecodedNotification {
        self.notification
    }
}
