//! Dense registries with swap-back removal
//!
//! Storage never has holes: removing an entry moves the last entry into the
//! freed slot. Callers owning parallel arrays replay the returned
//! [`Relocation`] so every array stays in lockstep.

use std::collections::HashMap;

use tracing::debug;

use mira_core::AvatarKey;

/// Smallest capacity a registry grows to
pub const MIN_CAPACITY: usize = 4;

/// Entry moved by a swap-back removal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    pub from: usize,
    pub to: usize,
}

/// Next capacity when `current` is full: double, at least [`MIN_CAPACITY`]
pub fn grown_capacity(current: usize) -> usize {
    (current * 2).max(MIN_CAPACITY)
}

/// Reserve so that `vec` holds exactly `capacity` slots (never shrinks)
pub fn reserve_to<T>(vec: &mut Vec<T>, capacity: usize) {
    if capacity > vec.capacity() {
        vec.reserve_exact(capacity - vec.len());
    }
}

/// Densely packed values addressed by index
#[derive(Debug, Clone)]
pub struct DenseArena<T> {
    items: Vec<T>,
}

impl<T> Default for DenseArena<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T> DenseArena<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
        }
    }

    /// Append a value and return its index.
    ///
    /// A full arena doubles its capacity first (minimum [`MIN_CAPACITY`]).
    pub fn insert(&mut self, value: T) -> usize {
        if self.items.len() == self.items.capacity() {
            let capacity = grown_capacity(self.items.capacity());
            reserve_to(&mut self.items, capacity);
            debug!(capacity, len = self.items.len(), "dense arena grown");
        }
        self.items.push(value);
        self.items.len() - 1
    }

    /// Swap-back removal; returns the value and the relocation it caused
    pub fn remove(&mut self, index: usize) -> Option<(T, Option<Relocation>)> {
        if index >= self.items.len() {
            return None;
        }
        let last = self.items.len() - 1;
        let value = self.items.swap_remove(index);
        let moved = (index != last).then_some(Relocation {
            from: last,
            to: index,
        });
        Some((value, moved))
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.items.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.items.capacity()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.items
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

/// Key ↔ dense index mapping
#[derive(Debug, Clone, Default)]
pub struct KeyedRegistry {
    index: HashMap<AvatarKey, usize>,
    keys: DenseArena<AvatarKey>,
}

impl KeyedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            index: HashMap::with_capacity(capacity),
            keys: DenseArena::with_capacity(capacity),
        }
    }

    /// Register `key` at the next dense index.
    ///
    /// Keys must be unique; a duplicate overwrites the mapping of the first
    /// registration and leaves a stale slot behind.
    pub fn insert(&mut self, key: AvatarKey) -> usize {
        debug_assert!(!self.index.contains_key(&key), "duplicate key {key}");
        let slot = self.keys.insert(key);
        self.index.insert(key, slot);
        slot
    }

    /// Remove `key`, fixing up the mapping of the entry moved into its slot.
    ///
    /// Returns the freed index and the relocation to replay on parallel arrays.
    pub fn remove(&mut self, key: AvatarKey) -> Option<(usize, Option<Relocation>)> {
        let slot = self.index.remove(&key)?;
        let (_, moved) = self.keys.remove(slot)?;
        if let Some(relocation) = moved {
            if let Some(moved_key) = self.keys.get(relocation.to) {
                self.index.insert(*moved_key, relocation.to);
            }
        }
        Some((slot, moved))
    }

    pub fn index_of(&self, key: AvatarKey) -> Option<usize> {
        self.index.get(&key).copied()
    }

    pub fn key_at(&self, index: usize) -> Option<AvatarKey> {
        self.keys.get(index).copied()
    }

    pub fn contains(&self, key: AvatarKey) -> bool {
        self.index.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.keys.capacity()
    }

    /// Keys in dense index order
    pub fn keys(&self) -> &[AvatarKey] {
        self.keys.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_capacity_doubles_from_four() {
        let mut arena = DenseArena::new();
        assert_eq!(arena.capacity(), 0);
        arena.insert(1);
        assert_eq!(arena.capacity(), 4);
        for i in 2..=5 {
            arena.insert(i);
        }
        assert_eq!(arena.capacity(), 8);
        assert_eq!(arena.as_slice(), &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_swap_back_relocates_last() {
        let mut arena = DenseArena::new();
        for value in ["a", "b", "c", "d"] {
            arena.insert(value);
        }
        let (removed, moved) = arena.remove(1).unwrap();
        assert_eq!(removed, "b");
        assert_eq!(moved, Some(Relocation { from: 3, to: 1 }));
        assert_eq!(arena.as_slice(), &["a", "d", "c"]);

        // Removing the last entry moves nothing
        let (removed, moved) = arena.remove(2).unwrap();
        assert_eq!(removed, "c");
        assert_eq!(moved, None);
        assert!(arena.remove(5).is_none());
    }

    #[test]
    fn test_keyed_remove_updates_one_mapping() {
        let mut registry = KeyedRegistry::new();
        for raw in 10..14 {
            registry.insert(AvatarKey::new(raw));
        }
        let before: Vec<_> = registry
            .keys()
            .iter()
            .map(|k| (*k, registry.index_of(*k)))
            .collect();

        let (slot, moved) = registry.remove(AvatarKey::new(11)).unwrap();
        assert_eq!(slot, 1);
        assert_eq!(moved, Some(Relocation { from: 3, to: 1 }));
        assert_eq!(registry.index_of(AvatarKey::new(13)), Some(1));
        assert!(!registry.contains(AvatarKey::new(11)));

        // Exactly one surviving key changed index
        let changed = before
            .iter()
            .filter(|(k, _)| registry.contains(*k))
            .filter(|(k, i)| registry.index_of(*k) != *i)
            .count();
        assert_eq!(changed, 1);
        assert!(registry.remove(AvatarKey::new(11)).is_none());
    }

    proptest! {
        #[test]
        fn prop_mapping_stays_dense(ops in proptest::collection::vec((any::<bool>(), 0u64..16), 0..64)) {
            let mut registry = KeyedRegistry::new();
            for (insert, raw) in ops {
                let key = AvatarKey::new(raw);
                if insert && !registry.contains(key) {
                    registry.insert(key);
                } else if !insert {
                    registry.remove(key);
                }
                for (i, key) in registry.keys().iter().enumerate() {
                    prop_assert_eq!(registry.index_of(*key), Some(i));
                }
            }
        }
    }
}
