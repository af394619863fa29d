#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use mira_core::AvatarKey;
use mira_remote::{DenseArena, KeyedRegistry};

#[derive(Debug, Arbitrary)]
enum Op {
    Insert(u8),
    Remove(u8),
}

fuzz_target!(|ops: Vec<Op>| {
    let mut registry = KeyedRegistry::new();
    // Parallel array kept in lockstep through the returned relocations
    let mut values: DenseArena<u64> = DenseArena::new();

    for op in ops {
        match op {
            Op::Insert(raw) => {
                let key = AvatarKey::new(raw as u64);
                if registry.contains(key) {
                    continue;
                }
                let slot = registry.insert(key);
                assert_eq!(values.insert(key.raw()), slot);
            }
            Op::Remove(raw) => {
                let key = AvatarKey::new(raw as u64);
                let removed = registry.remove(key);
                assert_eq!(removed.is_some(), registry.len() < values.len());
                if let Some((slot, moved)) = removed {
                    let (value, relocation) = values.remove(slot).unwrap();
                    assert_eq!(value, key.raw());
                    assert_eq!(relocation, moved);
                }
            }
        }

        assert_eq!(registry.len(), values.len());
        for (index, key) in registry.keys().iter().enumerate() {
            assert_eq!(registry.index_of(*key), Some(index));
            assert_eq!(values.get(index).copied(), Some(key.raw()));
        }
    }
});
