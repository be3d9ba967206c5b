//! Error types for cluster model operations

use thiserror::Error;

use crate::gateway::LifecycleState;

/// Result type for cluster model operations
pub type Result<T> = std::result::Result<T, Error>;

/// Cluster model errors
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// No entry is registered under the key
    #[error("no entity registered under key '{key}'")]
    KeyNotFound {
        /// The missing key
        key: String,
    },

    /// Another entity already holds the key
    #[error("key '{key}' is already held by another entity")]
    KeyCollision {
        /// The contested key
        key: String,
    },

    /// The gateway or service a notification refers to is not registered
    #[error("unknown parent {parent} for {kind} notification")]
    UnknownParent {
        /// Kind of the notification that was dropped
        kind: String,
        /// Description of the missing parent
        parent: String,
    },

    /// A required field is absent or unreadable
    #[error("malformed {kind} notification: {reason}")]
    MalformedNotification {
        /// Kind of the notification that was dropped
        kind: String,
        /// What was wrong with it
        reason: String,
    },

    /// The notification kind is not one the engine handles
    #[error("unknown notification kind '{0}'")]
    UnknownKind(String),

    /// The requested lifecycle change is not allowed from the current state
    #[error("gateway {instance_key} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        /// Gateway that rejected the transition
        instance_key: String,
        /// Current state
        from: LifecycleState,
        /// Requested state
        to: LifecycleState,
    },

    /// The entity has stopped and no longer accepts live updates
    #[error("{entity} has stopped")]
    EntityStopped {
        /// Description of the stopped entity
        entity: String,
    },

    /// `start` was called while a self node is still waiting for its key
    #[error("a self node without an instance key already exists")]
    SelfNodeExists,

    /// The input pump is not running
    #[error("input pump is closed")]
    PumpClosed,

    /// The input pump was started twice
    #[error("input pump already started")]
    PumpAlreadyStarted,
}
