//! Identity types for cluster entities

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

static NEXT_ENTITY_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an entity.
///
/// Assigned once at creation and never changed, so it survives a rekey of the
/// lookup key the entity is registered under.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(u64);

impl EntityId {
    pub(crate) fn next() -> Self {
        Self(NEXT_ENTITY_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw value of this id
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Ephemeral, cluster-assigned identity of one running gateway process.
///
/// The empty key is reserved for the gateway we connected to first, before the
/// cluster has told us which instance it is.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceKey(String);

impl InstanceKey {
    /// Create an instance key
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The placeholder key held by the self node until its real key is learned
    #[must_use]
    pub const fn unassigned() -> Self {
        Self(String::new())
    }

    /// Whether this is the placeholder key
    #[must_use]
    pub fn is_unassigned(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the key as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unassigned() {
            f.write_str("<unassigned>")
        } else {
            f.write_str(&self.0)
        }
    }
}

impl From<&str> for InstanceKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for InstanceKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

macro_rules! define_numeric_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(
            Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Create an id from its raw value
            #[must_use]
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            /// Get the raw value of this id
            #[must_use]
            pub const fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }
    };
}

define_numeric_id!(
    ServiceId,
    "Identity of a service, unique within its gateway."
);
define_numeric_id!(
    SessionId,
    "Identity of a session, unique within its service."
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_ids_are_unique() {
        let a = EntityId::next();
        let b = EntityId::next();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
    }

    #[test]
    fn test_unassigned_key() {
        let key = InstanceKey::unassigned();
        assert!(key.is_unassigned());
        assert_eq!(key, InstanceKey::from(""));
        assert_eq!(key.to_string(), "<unassigned>");
        assert!(!InstanceKey::from("abc").is_unassigned());
    }

    #[test]
    fn test_numeric_ids_deserialize_from_json_numbers() {
        let id: SessionId = serde_json::from_str("42").unwrap();
        assert_eq!(id, SessionId::new(42));
        assert_eq!(ServiceId::from(7).to_string(), "7");
    }
}
