#![cfg(test)]

// Property tests for Shard and ShardedMap kept inside the crate so they can
// check slot-level invariants (PSL, no tombstones, counts) after every step.

use crate::hasher::KeyHasher;
use crate::shard::{Position, Shard};
use crate::sharded_map::ShardedMap;
use proptest::prelude::*;
use std::cell::Cell;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::rc::Rc;

// Key newtype with Borrow<str> to exercise borrowed lookup.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
struct Key(String);
impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
impl std::borrow::Borrow<str> for Key {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// Hashes a `Key` and its borrowed `str` identically with a plain function,
// so tests can force collisions while still looking keys up by `&str`.
struct StrFn(fn(&str) -> u64);
impl KeyHasher<str> for StrFn {
    fn hash_key(&self, key: &str) -> u64 {
        (self.0)(key)
    }
}
impl KeyHasher<Key> for StrFn {
    fn hash_key(&self, key: &Key) -> u64 {
        (self.0)(&key.0)
    }
}

// Pool-indexed operations to improve shrinking: indices shrink to earlier keys,
// pool length shrinks, and op lists shrink in length.
#[derive(Clone, Debug)]
enum OpI {
    Insert(usize, i32),
    InsertWith(usize, i32),
    Upsert(usize, i32),
    Erase(usize),
    Find(usize),
    Contains(String),
    Mutate(usize, i32),
    Iterate,
    Clear,
}

fn key_from(pool: &[String], i: usize) -> Key {
    Key(pool[i].clone())
}

fn arb_scenario() -> impl Strategy<Value = (Vec<String>, Vec<OpI>)> {
    proptest::collection::vec("[a-z]{0,5}", 1..=24).prop_flat_map(|pool| {
        let idxs: Vec<usize> = (0..pool.len()).collect();
        let idx = proptest::sample::select(idxs);
        let contains_pool = proptest::sample::select(pool.clone());
        let op = prop_oneof![
            4 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::Insert(i, v)),
            2 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::InsertWith(i, v)),
            2 => (idx.clone(), any::<i32>()).prop_map(|(i, d)| OpI::Upsert(i, d)),
            3 => idx.clone().prop_map(OpI::Erase),
            2 => idx.clone().prop_map(OpI::Find),
            1 => prop_oneof![
                contains_pool,
                "[a-z]{0,5}"
            ]
            .prop_map(OpI::Contains),
            2 => (idx.clone(), any::<i32>()).prop_map(|(i, d)| OpI::Mutate(i, d)),
            1 => Just(OpI::Iterate),
            1 => Just(OpI::Clear),
        ];
        proptest::collection::vec(op, 1..120).prop_map(move |ops| (pool.clone(), ops))
    })
}

/// Drives one operation sequence against a `Shard` and a std model.
fn run_shard<S>(mut sut: Shard<Key, i32, S>, pool: &[String], ops: Vec<OpI>) -> Result<(), TestCaseError>
where
    S: KeyHasher<Key> + KeyHasher<str>,
{
    let mut model: HashMap<Key, i32> = HashMap::new();
    let mut positions: Vec<(Key, Position)> = Vec::new();
    let default_calls = Rc::new(Cell::new(0));

    for op in ops {
        let mut structural = false;
        match op {
            OpI::Insert(i, v) => {
                let k = key_from(pool, i);
                let already = model.contains_key(&k);
                let inserted = sut.insert(k.clone(), v);
                prop_assert_eq!(inserted, !already, "insert succeeds iff absent");
                if inserted {
                    model.insert(k, v);
                    structural = true;
                }
            }
            OpI::InsertWith(i, v) => {
                let k = key_from(pool, i);
                let already = model.contains_key(&k);
                let counter = default_calls.clone();
                let before = counter.get();
                let inserted = sut.insert_with(k.clone(), move || {
                    counter.set(counter.get() + 1);
                    v
                });
                prop_assert_eq!(inserted, !already);
                if inserted {
                    prop_assert_eq!(default_calls.get(), before + 1, "default must run exactly once on success");
                    model.insert(k, v);
                    structural = true;
                } else {
                    prop_assert_eq!(default_calls.get(), before, "default must not run on duplicate");
                }
            }
            OpI::Upsert(i, d) => {
                let k = key_from(pool, i);
                structural = !model.contains_key(&k);
                let v = sut.get_or_insert_default(k.clone());
                *v = v.wrapping_add(d);
                let mv = model.entry(k).or_default();
                *mv = mv.wrapping_add(d);
            }
            OpI::Erase(i) => {
                let k = key_from(pool, i);
                let removed = sut.remove_entry(&k);
                match model.remove(&k) {
                    Some(mv) => {
                        let (kk, vv) = removed.expect("present key must be removed");
                        prop_assert_eq!(kk, k);
                        prop_assert_eq!(vv, mv);
                        structural = true;
                    }
                    None => prop_assert!(removed.is_none()),
                }
            }
            OpI::Find(i) => {
                let k = key_from(pool, i);
                let found = sut.find(&k);
                prop_assert_eq!(found.is_some(), model.contains_key(&k));
                if let Some(pos) = found {
                    prop_assert_eq!(sut.get_at(pos), Some((&k, &model[&k])));
                    positions.push((k, pos));
                }
            }
            OpI::Contains(s) => {
                let has = sut.contains_key(s.as_str());
                let has_model = model.keys().any(|k| k.0 == s);
                prop_assert_eq!(has, has_model);
            }
            OpI::Mutate(i, d) => {
                let k = key_from(pool, i);
                if let Some(v) = sut.get_mut(&k) {
                    *v = v.saturating_add(d);
                    let mv = model.get_mut(&k).expect("model agrees on presence");
                    *mv = mv.saturating_add(d);
                } else {
                    prop_assert!(!model.contains_key(&k));
                }
            }
            OpI::Iterate => {
                let s_keys: Vec<_> = sut.iter().map(|(k, _)| k.clone()).collect();
                let unique: BTreeSet<_> = s_keys.iter().cloned().collect();
                prop_assert_eq!(s_keys.len(), unique.len(), "iteration yields no duplicates");
                let m_keys: BTreeSet<_> = model.keys().cloned().collect();
                prop_assert_eq!(unique, m_keys);
            }
            OpI::Clear => {
                sut.clear();
                model.clear();
                prop_assert_eq!(sut.capacity(), sut.config().min_capacity);
                structural = true;
            }
        }

        if structural {
            // Every previously handed-out position is now stale.
            for (_, pos) in positions.drain(..) {
                prop_assert!(sut.get_at(pos).is_none());
            }
        } else {
            for (k, pos) in &positions {
                prop_assert_eq!(sut.get_at(*pos).map(|(kk, _)| kk), Some(k));
            }
        }

        sut.assert_invariants();
        prop_assert_eq!(sut.len(), model.len());
        prop_assert_eq!(sut.is_empty(), model.is_empty());
    }
    Ok(())
}

// Property: state-machine equivalence against std::collections::HashMap.
// Invariants exercised across random operation sequences:
// - Insert succeeds iff the key is absent; duplicates keep the first value.
// - Lazy constructors run exactly when an entry is created.
// - Erase returns the owned pair and restores a tombstone-free layout.
// - Every occupied slot's PSL equals its distance from home.
// - Positions resolve until the next structural mutation and never after.
// - `iter` yields each live entry exactly once.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_shard_state_machine((pool, ops) in arb_scenario()) {
        run_shard(Shard::new(), &pool, ops)?;
    }
}

// Same invariants under worst-case collisions: a constant hash puts every
// key on one probe chain, stressing swaps and backward shifts.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_shard_state_machine_with_collisions((pool, ops) in arb_scenario()) {
        let sut = Shard::with_hasher(StrFn(|_| 0));
        run_shard(sut, &pool, ops)?;
    }
}

// Few distinct home slots: chains overlap and wrap around the array end.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_shard_state_machine_with_clustered_homes((pool, ops) in arb_scenario()) {
        let sut = Shard::with_hasher(StrFn(|s| (s.len() as u64).wrapping_mul(5).wrapping_add(3)));
        run_shard(sut, &pool, ops)?;
    }
}

// Property: the router agrees with a model, keeps the aggregate count equal
// to the sum of its shards, and every key sits in the shard it routes to.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_sharded_map_matches_model(ops in proptest::collection::vec((0u16..256, any::<i16>(), 0u8..4), 1..400)) {
        let mut sut: ShardedMap<u16, i16> = ShardedMap::new();
        let mut model: HashMap<u16, i16> = HashMap::new();
        for (k, v, kind) in ops {
            match kind {
                0 | 1 => {
                    let inserted = sut.insert(k, v);
                    prop_assert_eq!(inserted, !model.contains_key(&k));
                    model.entry(k).or_insert(v);
                }
                2 => {
                    prop_assert_eq!(sut.erase(&k), model.remove(&k).is_some());
                }
                _ => {
                    *sut.get_or_insert_default(k) ^= v;
                    *model.entry(k).or_default() ^= v;
                }
            }
            prop_assert_eq!(sut.len(), model.len());
        }

        let total: usize = sut.shards().iter().map(Shard::len).sum();
        prop_assert_eq!(total, sut.len());
        for (i, shard) in sut.shards().iter().enumerate() {
            shard.assert_invariants();
            for (k, _) in shard.iter() {
                prop_assert_eq!(sut.shard_for(k), i);
            }
        }
        let seen: HashMap<u16, i16> = sut.iter().map(|(k, v)| (*k, *v)).collect();
        prop_assert_eq!(seen.len(), sut.iter().len());
        prop_assert_eq!(seen, model);
    }
}

// Property: inserting unique keys then erasing all of them in any order
// empties the map, and each key can be inserted fresh afterwards.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_insert_erase_round_trip(keys in proptest::collection::hash_set(any::<u32>(), 0..300).prop_flat_map(|set| {
        let keys: Vec<u32> = set.into_iter().collect();
        Just(keys).prop_shuffle()
    }), seed in any::<u64>()) {
        let mut m: ShardedMap<u32, u64> = ShardedMap::new();
        for &k in &keys {
            prop_assert!(m.insert(k, seed ^ k as u64));
        }
        let mut order = keys.clone();
        order.reverse();
        let shift = (seed as usize) % order.len().max(1);
        order.rotate_left(shift);
        for k in &order {
            prop_assert!(m.erase(k));
        }
        prop_assert_eq!(m.len(), 0);
        prop_assert!(m.is_empty());
        prop_assert!(m.iter().next().is_none());
        for &k in &keys {
            prop_assert!(m.insert(k, 0));
        }
        prop_assert_eq!(m.len(), keys.len());
    }
}
