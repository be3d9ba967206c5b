//! Decoded inputs delivered by the transport layer.
//!
//! The transport decodes wire messages into these types; the engine never sees
//! the wire encoding.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ids::{InstanceKey, ServiceId, SessionId};
use crate::metrics::SessionSummary;

/// Notification kinds the engine understands
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum NotificationKind {
    /// A cluster member joined
    MemberJoined,
    /// A cluster member left
    MemberLeft,
    /// A member's management endpoint became known
    ManagementUrl,
    /// Gateway host metrics
    GatewaySummary,
    /// Service running totals
    ServiceSummary,
    /// A session opened
    SessionOpened,
    /// A session closed
    SessionClosed,
    /// Session traffic counters
    SessionSummary,
}

impl NotificationKind {
    /// The wire name of this kind
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MemberJoined => "member-joined",
            Self::MemberLeft => "member-left",
            Self::ManagementUrl => "management-url",
            Self::GatewaySummary => "gateway-summary",
            Self::ServiceSummary => "service-summary",
            Self::SessionOpened => "session-opened",
            Self::SessionClosed => "session-closed",
            Self::SessionSummary => "session-summary",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "member-joined" => Ok(Self::MemberJoined),
            "member-left" => Ok(Self::MemberLeft),
            "management-url" => Ok(Self::ManagementUrl),
            "gateway-summary" => Ok(Self::GatewaySummary),
            "service-summary" => Ok(Self::ServiceSummary),
            "session-opened" => Ok(Self::SessionOpened),
            "session-closed" => Ok(Self::SessionClosed),
            "session-summary" => Ok(Self::SessionSummary),
            other => Err(Error::UnknownKind(other.to_string())),
        }
    }
}

/// A notification as decoded by the transport.
///
/// Which identity fields are required depends on the kind; the router checks
/// them before anything is touched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedNotification {
    /// Wire name of the notification kind
    pub kind: String,

    /// Gateway the notification concerns
    #[serde(default)]
    pub instance_key: Option<InstanceKey>,

    /// Service the notification concerns
    #[serde(default)]
    pub service_id: Option<ServiceId>,

    /// Session the notification concerns
    #[serde(default)]
    pub session_id: Option<SessionId>,

    /// When the event happened on the gateway
    pub timestamp: DateTime<Utc>,

    /// Kind-specific body
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl DecodedNotification {
    /// The instance key, which must be present and assigned
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedNotification`] if the key is absent or empty.
    pub fn require_instance_key(&self) -> Result<&InstanceKey> {
        match &self.instance_key {
            Some(key) if !key.is_unassigned() => Ok(key),
            _ => Err(self.malformed("missing instanceKey")),
        }
    }

    /// The service id, which must be present
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedNotification`] if the id is absent.
    pub fn require_service_id(&self) -> Result<ServiceId> {
        self.service_id
            .ok_or_else(|| self.malformed("missing serviceId"))
    }

    /// The session id, which must be present
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedNotification`] if the id is absent.
    pub fn require_session_id(&self) -> Result<SessionId> {
        self.session_id
            .ok_or_else(|| self.malformed("missing sessionId"))
    }

    /// Decode the payload. A null payload decodes as the type's empty value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedNotification`] if the payload has the wrong shape.
    pub fn payload_as<T>(&self) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        if self.payload.is_null() {
            return Ok(T::default());
        }

        serde_json::from_value(self.payload.clone())
            .map_err(|e| self.malformed(&format!("bad payload: {e}")))
    }

    /// A string field of the payload, which must be present and non-empty
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedNotification`] if the field is absent.
    pub fn require_payload_str(&self, field: &str) -> Result<&str> {
        self.payload
            .get(field)
            .and_then(serde_json::Value::as_str)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| self.malformed(&format!("missing payload field '{field}'")))
    }

    fn malformed(&self, reason: &str) -> Error {
        Error::MalformedNotification {
            kind: self.kind.clone(),
            reason: reason.to_string(),
        }
    }
}

/// Full set of currently alive members, with their management endpoint when known
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStateSnapshot {
    /// Alive members by instance key
    pub members: BTreeMap<InstanceKey, Option<String>>,
}

impl ClusterStateSnapshot {
    /// Build a snapshot from `(key, url)` pairs
    pub fn from_members<K, I>(members: I) -> Self
    where
        K: Into<InstanceKey>,
        I: IntoIterator<Item = (K, Option<String>)>,
    {
        Self {
            members: members
                .into_iter()
                .map(|(key, url)| (key.into(), url))
                .collect(),
        }
    }
}

/// Configuration snapshot fetched from a gateway.
///
/// Kept opaque; the accessors cover what display code reads.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GatewayConfig(serde_json::Value);

impl GatewayConfig {
    /// Wrap a fetched configuration document
    #[must_use]
    pub const fn new(document: serde_json::Value) -> Self {
        Self(document)
    }

    /// The configured gateway name
    #[must_use]
    pub fn gateway_name(&self) -> Option<&str> {
        self.0.get("gatewayName").and_then(serde_json::Value::as_str)
    }

    /// The product version the gateway reported
    #[must_use]
    pub fn product_version(&self) -> Option<&str> {
        self.0
            .get("productVersion")
            .and_then(serde_json::Value::as_str)
    }

    /// The whole document
    #[must_use]
    pub const fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

/// Descriptive details of one service
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServiceInfo {
    /// Configured service name
    pub name: Option<String>,
    /// Service type, e.g. `proxy` or `echo`
    pub service_type: Option<String>,
}

/// Services a gateway reported, by id
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceList {
    /// Reported services
    pub services: BTreeMap<ServiceId, ServiceInfo>,
}

/// One entry of a bulk session listing
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionRecord {
    /// When the session opened, if reported
    pub start_time: Option<DateTime<Utc>>,
    /// Counters at listing time
    pub summary: SessionSummary,
}

/// Sessions currently open on a service, by id
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionList {
    /// Listed sessions
    pub sessions: BTreeMap<SessionId, SessionRecord>,
}
