//! Configuration for the cluster model

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default bound of the input queue
const DEFAULT_INPUT_QUEUE_CAPACITY: usize = 1024;

/// Default time to wait for the input pump to drain on shutdown
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for a cluster coordinator and its input pump
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClusterConfig {
    /// Capacity of the bounded input queue
    pub input_queue_capacity: usize,

    /// Remove already-closed sessions that a bulk listing no longer contains
    pub prune_closed_sessions: bool,

    /// How long shutdown waits for queued input to drain
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            input_queue_capacity: DEFAULT_INPUT_QUEUE_CAPACITY,
            prune_closed_sessions: true,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: ClusterConfig =
            serde_json::from_str(r#"{ "shutdownTimeout": 250 }"#).unwrap();

        assert_eq!(config.shutdown_timeout, Duration::from_millis(250));
        assert_eq!(config.input_queue_capacity, DEFAULT_INPUT_QUEUE_CAPACITY);
        assert!(config.prune_closed_sessions);
    }

    #[test]
    fn test_config_serializes_millis() {
        let json = serde_json::to_value(ClusterConfig::default()).unwrap();
        assert_eq!(json["shutdownTimeout"], 5000);
    }
}
