//! Summary metric snapshots carried by gateways, services and sessions.
//!
//! Every field is optional: an update carries only the fields its source knows
//! about, and merging never clears a field the update leaves out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! impl_merge {
    ($name:ident { $($field:ident),+ $(,)? }) => {
        impl $name {
            /// Overwrite every field the update supplies, keeping the rest.
            ///
            /// Returns whether any field changed.
            pub fn merge(&mut self, update: &Self) -> bool {
                let mut changed = false;
                $(
                    if update.$field.is_some() && update.$field != self.$field {
                        self.$field.clone_from(&update.$field);
                        changed = true;
                    }
                )+
                changed
            }
        }
    };
}

/// Host-level summary of a gateway process
#[allow(missing_docs)]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GatewaySummary {
    pub cpu_percentage: Option<f64>,
    pub total_used_memory: Option<u64>,
    pub total_free_memory: Option<u64>,
    pub uptime_seconds: Option<u64>,
}

impl_merge!(GatewaySummary {
    cpu_percentage,
    total_used_memory,
    total_free_memory,
    uptime_seconds,
});

/// Running totals for one service
#[allow(missing_docs)]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServiceSummary {
    pub current_session_count: Option<u64>,
    pub total_session_count: Option<u64>,
    pub total_bytes_received: Option<u64>,
    pub total_bytes_sent: Option<u64>,
    pub last_session_opened_at: Option<DateTime<Utc>>,
}

impl_merge!(ServiceSummary {
    current_session_count,
    total_session_count,
    total_bytes_received,
    total_bytes_sent,
    last_session_opened_at,
});

/// Traffic counters for one session
#[allow(missing_docs)]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionSummary {
    pub read_bytes: Option<u64>,
    pub read_bytes_throughput: Option<f64>,
    pub written_bytes: Option<u64>,
    pub written_bytes_throughput: Option<f64>,
    pub remote_address: Option<String>,
    pub principal: Option<String>,
}

impl_merge!(SessionSummary {
    read_bytes,
    read_bytes_throughput,
    written_bytes,
    written_bytes_throughput,
    remote_address,
    principal,
});

impl SessionSummary {
    /// Counters for a session that has not moved any data yet
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            read_bytes: Some(0),
            read_bytes_throughput: Some(0.0),
            written_bytes: Some(0),
            written_bytes_throughput: Some(0.0),
            remote_address: None,
            principal: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_keeps_fields_missing_from_update() {
        let mut summary = SessionSummary {
            read_bytes: Some(100),
            remote_address: Some("10.0.0.1:4000".to_string()),
            ..SessionSummary::default()
        };

        let changed = summary.merge(&SessionSummary {
            written_bytes: Some(20),
            ..SessionSummary::default()
        });

        assert!(changed);
        assert_eq!(summary.read_bytes, Some(100));
        assert_eq!(summary.written_bytes, Some(20));
        assert_eq!(summary.remote_address.as_deref(), Some("10.0.0.1:4000"));
    }

    #[test]
    fn test_merge_reports_no_change() {
        let mut summary = ServiceSummary {
            current_session_count: Some(3),
            ..ServiceSummary::default()
        };

        assert!(!summary.merge(&summary.clone()));
        assert!(!summary.merge(&ServiceSummary::default()));
    }

    #[test]
    fn test_deserialize_partial_payload() {
        let summary: GatewaySummary =
            serde_json::from_value(serde_json::json!({ "cpuPercentage": 12.5 })).unwrap();

        assert_eq!(summary.cpu_percentage, Some(12.5));
        assert_eq!(summary.uptime_seconds, None);
    }
}
