//! Keyed entity collection with in-place rekeying

use std::fmt::{self, Display};
use std::hash::Hash;

use indexmap::IndexMap;

use crate::error::{Error, Result};

/// Keyed collection of owned entities.
///
/// At most one entry exists per key. Iteration follows insertion order, which
/// stays stable across replacement and rekeying so display lists don't jump
/// around.
#[derive(Clone)]
pub struct EntityRegistry<K, V> {
    entries: IndexMap<K, V>,
}

impl<K, V> Default for EntityRegistry<K, V> {
    fn default() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }
}

impl<K, V> EntityRegistry<K, V>
where
    K: Clone + Display + Eq + Hash,
{
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entity, replacing (and returning) any entity under the same key.
    /// A replaced entry keeps its position.
    pub fn put(&mut self, key: K, value: V) -> Option<V> {
        self.entries.insert(key, value)
    }

    /// Look up an entity
    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Look up an entity for mutation
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.entries.get_mut(key)
    }

    /// Whether an entity is registered under the key
    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Remove an entity
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.shift_remove(key)
    }

    /// Snapshot of the keys.
    ///
    /// Walk this list and call [`Self::get_mut`] to mutate the registry while
    /// iterating it.
    pub fn keys(&self) -> Vec<K> {
        self.entries.keys().cloned().collect()
    }

    /// The entities in display order
    pub fn values(&self) -> Vec<&V> {
        self.entries.values().collect()
    }

    /// Mutable iterator over the entities in display order
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.entries.values_mut()
    }

    /// Iterator over key/entity pairs in display order
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter()
    }

    /// Number of registered entities
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove and return every entry, leaving the registry empty
    pub fn drain(&mut self) -> Vec<(K, V)> {
        self.entries.drain(..).collect()
    }

    /// Make the entity registered at `old_key` reachable only at `new_key`.
    ///
    /// The entity itself is moved, not copied, and keeps its display position.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyNotFound`] if nothing is registered at `old_key`, or
    /// [`Error::KeyCollision`] if a different entity already holds `new_key`.
    pub fn rekey(&mut self, old_key: &K, new_key: K) -> Result<()> {
        if !self.entries.contains_key(old_key) {
            return Err(Error::KeyNotFound {
                key: old_key.to_string(),
            });
        }

        if *old_key == new_key {
            return Ok(());
        }

        if self.entries.contains_key(&new_key) {
            return Err(Error::KeyCollision {
                key: new_key.to_string(),
            });
        }

        let Some((index, _, value)) = self.entries.shift_remove_full(old_key) else {
            return Err(Error::KeyNotFound {
                key: old_key.to_string(),
            });
        };

        let (new_index, _) = self.entries.insert_full(new_key, value);
        self.entries.move_index(new_index, index);

        Ok(())
    }
}

impl<K, V> fmt::Debug for EntityRegistry<K, V>
where
    K: fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn registry(keys: &[&str]) -> EntityRegistry<String, usize> {
        let mut registry = EntityRegistry::new();
        for (value, key) in keys.iter().enumerate() {
            registry.put((*key).to_string(), value);
        }
        registry
    }

    #[test]
    fn test_put_replaces_in_place() {
        let mut registry = registry(&["a", "b", "c"]);

        assert_eq!(registry.put("b".to_string(), 10), Some(1));
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.values(), vec![&0, &10, &2]);
    }

    #[test]
    fn test_remove_and_lookup() {
        let mut registry = registry(&["a", "b"]);

        assert_eq!(registry.remove(&"a".to_string()), Some(0));
        assert_eq!(registry.remove(&"a".to_string()), None);
        assert!(registry.get(&"a".to_string()).is_none());
        assert_eq!(registry.get(&"b".to_string()), Some(&1));
    }

    #[test]
    fn test_rekey_moves_entry_and_keeps_position() {
        let mut registry = registry(&["a", "", "c"]);

        registry.rekey(&String::new(), "b".to_string()).unwrap();

        assert!(!registry.contains_key(&String::new()));
        assert_eq!(registry.get(&"b".to_string()), Some(&1));
        assert_eq!(registry.keys(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_rekey_to_same_key_is_noop() {
        let mut registry = registry(&["a"]);

        registry.rekey(&"a".to_string(), "a".to_string()).unwrap();
        assert_eq!(registry.get(&"a".to_string()), Some(&0));
    }

    #[test]
    fn test_rekey_missing_key() {
        let mut registry = registry(&["a"]);

        assert_matches!(
            registry.rekey(&"x".to_string(), "y".to_string()),
            Err(Error::KeyNotFound { key }) if key == "x"
        );
    }

    #[test]
    fn test_rekey_collision_leaves_both_entries() {
        let mut registry = registry(&["a", "b"]);

        assert_matches!(
            registry.rekey(&"a".to_string(), "b".to_string()),
            Err(Error::KeyCollision { key }) if key == "b"
        );
        assert_eq!(registry.get(&"a".to_string()), Some(&0));
        assert_eq!(registry.get(&"b".to_string()), Some(&1));
    }

    #[test]
    fn test_keys_snapshot_allows_mutation() {
        let mut registry = registry(&["a", "b", "c"]);

        for key in registry.keys() {
            if key != "b" {
                registry.remove(&key);
            }
        }

        assert_eq!(registry.keys(), vec!["b"]);
    }

    #[test]
    fn test_drain_empties_registry() {
        let mut registry = registry(&["a", "b"]);

        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert!(registry.is_empty());
    }
}
