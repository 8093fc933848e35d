//! Shard: a standalone Robin Hood open-addressing table.
//!
//! Slots live in one contiguous power-of-two array. Each occupied slot
//! records its probe sequence length (PSL), the distance from the entry's
//! home slot `hash & (capacity - 1)`. Insertion swaps the incoming entry
//! into any slot whose resident is closer to home than the incoming entry
//! currently is; deletion shifts the following chain back one slot, so no
//! tombstones ever exist. Capacity doubles once `capacity * load_factor`
//! live entries are reached and never shrinks until `clear`.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::hasher::{DefaultHashBuilder, KeyHasher};
use crate::reentrancy::DebugReentrancy;
use core::borrow::Borrow;
use core::fmt;
use core::iter::FusedIterator;
use core::mem;
use core::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

#[derive(Clone, Debug)]
struct Bucket<K, V> {
    key: K,
    value: V,
    hash: u64,
    psl: usize,
}

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

/// Identity of one shard instance. Every construction and every clone
/// draws a fresh id, so positions never resolve against a copy.
#[derive(Debug)]
struct Owner(u64);

impl Owner {
    fn new() -> Self {
        Owner(NEXT_OWNER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Clone for Owner {
    fn clone(&self) -> Self {
        Owner::new()
    }
}

/// Snapshot of where an entry sat when it was looked up.
///
/// A position stays resolvable only until the owning shard is structurally
/// mutated (insert, erase, rehash or clear); after that every accessor
/// taking it returns `None`. It also resolves to `None` against any shard
/// or map other than the one that produced it, clones included.
/// Positions are never revalidated.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Position {
    pub(crate) owner: u64,
    pub(crate) shard: usize,
    pub(crate) slot: usize,
    pub(crate) epoch: u64,
}

impl Position {
    /// Shard index the entry was routed to (always 0 for a bare `Shard`).
    pub fn shard(&self) -> usize {
        self.shard
    }

    /// Slot index inside the shard's array.
    pub fn slot(&self) -> usize {
        self.slot
    }
}

fn empty_slots<K, V>(capacity: usize) -> Vec<Option<Bucket<K, V>>> {
    let mut slots = Vec::with_capacity(capacity);
    slots.resize_with(capacity, || None);
    slots
}

/// Slot array plus bookkeeping. Never calls user code except `Eq` in
/// `locate`; callers hold the reentrancy guard around it.
#[derive(Clone)]
struct Table<K, V> {
    slots: Vec<Option<Bucket<K, V>>>,
    len: usize,
    grow_at: usize,
    epoch: u64,
}

impl<K, V> Table<K, V> {
    fn new(config: &Config) -> Self {
        Self {
            slots: empty_slots(config.min_capacity),
            len: 0,
            grow_at: config.grow_at(config.min_capacity),
            epoch: 0,
        }
    }

    #[inline]
    fn mask(&self) -> usize {
        self.slots.len() - 1
    }

    #[inline]
    fn bump(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
    }

    fn locate<Q>(&self, hash: u64, q: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        let mask = self.mask();
        let mut pos = hash as usize & mask;
        let mut step = 0;
        loop {
            let bucket = self.slots[pos].as_ref()?;
            // Richer entries never sit behind poorer ones on a chain.
            if bucket.psl < step {
                return None;
            }
            if bucket.hash == hash && bucket.key.borrow() == q {
                return Some(pos);
            }
            step += 1;
            pos = (pos + 1) & mask;
        }
    }

    /// Robin Hood placement of `bucket` starting at its home slot.
    ///
    /// `tracked` follows one entry through the displacement chain:
    /// `carrying` says whether `bucket` is that entry, and on return
    /// `tracked` holds the followed entry's slot (if it moved here).
    fn place(&mut self, mut bucket: Bucket<K, V>, tracked: &mut Option<usize>, mut carrying: bool) {
        let mask = self.mask();
        let mut pos = bucket.hash as usize & mask;
        bucket.psl = 0;
        loop {
            let slot = &mut self.slots[pos];
            if let Some(resident) = slot.as_mut() {
                if resident.psl < bucket.psl {
                    mem::swap(resident, &mut bucket);
                    let displaced = *tracked == Some(pos);
                    if carrying {
                        *tracked = Some(pos);
                    } else if displaced {
                        *tracked = None;
                    }
                    carrying = displaced;
                }
            } else {
                *slot = Some(bucket);
                if carrying {
                    *tracked = Some(pos);
                }
                return;
            }
            bucket.psl += 1;
            pos = (pos + 1) & mask;
        }
    }

    /// Double the slot array and re-place every entry in old array order.
    fn grow(&mut self, config: &Config, tracked: &mut Option<usize>) {
        let old_capacity = self.slots.len();
        let capacity = old_capacity * 2;
        let old = mem::replace(&mut self.slots, empty_slots(capacity));
        self.grow_at = config.grow_at(capacity);
        let follow = tracked.take();
        for (i, slot) in old.into_iter().enumerate() {
            if let Some(bucket) = slot {
                self.place(bucket, tracked, follow == Some(i));
            }
        }
        self.bump();
        debug!(target: "robin_shard_map::shard", old_capacity, capacity, len = self.len, "shard rehashed");
    }

    /// Insert a key known to be absent; returns its final slot.
    fn insert_absent(&mut self, config: &Config, hash: u64, key: K, value: V) -> usize {
        let mut at = None;
        self.place(
            Bucket {
                key,
                value,
                hash,
                psl: 0,
            },
            &mut at,
            true,
        );
        self.len += 1;
        self.bump();
        while self.len >= self.grow_at {
            self.grow(config, &mut at);
        }
        at.expect("inserted entry is tracked through placement and growth")
    }

    /// Remove the entry at `idx` and close the gap by backward shifting.
    fn take(&mut self, idx: usize) -> Bucket<K, V> {
        let removed = self.slots[idx]
            .take()
            .expect("located slot is occupied");
        self.len -= 1;
        self.bump();

        let mask = self.mask();
        let mut hole = idx;
        let mut next = (idx + 1) & mask;
        while let Some(bucket) = self.slots[next].as_mut() {
            if bucket.psl == 0 {
                break;
            }
            bucket.psl -= 1;
            self.slots.swap(hole, next);
            hole = next;
            next = (next + 1) & mask;
        }
        removed
    }

    fn reset(&mut self, config: &Config) {
        self.slots = empty_slots(config.min_capacity);
        self.len = 0;
        self.grow_at = config.grow_at(config.min_capacity);
        self.bump();
    }

    fn bucket(&self, idx: usize) -> &Bucket<K, V> {
        self.slots[idx]
            .as_ref()
            .expect("located slot is occupied")
    }

    fn bucket_mut(&mut self, idx: usize) -> &mut Bucket<K, V> {
        self.slots[idx]
            .as_mut()
            .expect("located slot is occupied")
    }
}

/// One Robin Hood hash table. Usable on its own, and the unit of growth
/// inside a [`ShardedMap`](crate::ShardedMap).
#[derive(Clone)]
pub struct Shard<K, V, S = DefaultHashBuilder> {
    hasher: S,
    config: Config,
    table: Table<K, V>,
    owner: Owner,
    reentrancy: DebugReentrancy,
}

impl<K, V> Shard<K, V> {
    pub fn new() -> Self {
        Self::with_hasher(Default::default())
    }

    /// Panics if `config` does not validate.
    pub fn with_config(config: Config) -> Self {
        Self::with_config_and_hasher(config, Default::default())
    }
}

impl<K, V, S: Default> Default for Shard<K, V, S> {
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K, V, S> Shard<K, V, S> {
    pub fn with_hasher(hasher: S) -> Self {
        Self::from_parts(Config::default(), hasher)
    }

    /// Panics if `config` does not validate.
    pub fn with_config_and_hasher(config: Config, hasher: S) -> Self {
        match Self::try_with_config_and_hasher(config, hasher) {
            Ok(shard) => shard,
            Err(e) => panic!("{e}"),
        }
    }

    pub fn try_with_config_and_hasher(config: Config, hasher: S) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_parts(config, hasher))
    }

    /// Caller guarantees `config` is valid.
    pub(crate) fn from_parts(config: Config, hasher: S) -> Self {
        Self {
            table: Table::new(&config),
            hasher,
            config,
            owner: Owner::new(),
            reentrancy: DebugReentrancy::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.table.len
    }

    pub fn is_empty(&self) -> bool {
        self.table.len == 0
    }

    /// Number of slots currently allocated.
    pub fn capacity(&self) -> usize {
        self.table.slots.len()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn hash_function(&self) -> &S {
        &self.hasher
    }

    /// Snapshot of `slot` as a position routed to shard `shard`.
    pub(crate) fn position(&self, shard: usize, slot: usize) -> Position {
        Position {
            owner: self.owner.0,
            shard,
            slot,
            epoch: self.table.epoch,
        }
    }

    fn resolves(&self, pos: &Position) -> bool {
        pos.owner == self.owner.0 && pos.epoch == self.table.epoch
    }

    /// Drop every entry and return to the minimum capacity.
    pub fn clear(&mut self) {
        let old = mem::replace(&mut self.table.slots, Vec::new());
        self.table.reset(&self.config);
        debug!(target: "robin_shard_map::shard", capacity = self.capacity(), "shard cleared");
        // Entries drop only once the shard is consistent again.
        drop(old);
    }

    pub fn get_at(&self, pos: Position) -> Option<(&K, &V)> {
        if !self.resolves(&pos) {
            return None;
        }
        self.table
            .slots
            .get(pos.slot)?
            .as_ref()
            .map(|b| (&b.key, &b.value))
    }

    pub fn get_at_mut(&mut self, pos: Position) -> Option<(&K, &mut V)> {
        if !self.resolves(&pos) {
            return None;
        }
        self.table
            .slots
            .get_mut(pos.slot)?
            .as_mut()
            .map(|b| (&b.key, &mut b.value))
    }

    /// Entries in slot-array order. The order changes arbitrarily on rehash.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            slots: self.table.slots.iter(),
            remaining: self.table.len,
        }
    }

    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        IterMut {
            slots: self.table.slots.iter_mut(),
            remaining: self.table.len,
        }
    }

    // Hash-supplied entry points. The router hashes once and routes with
    // the same value it hands down here.

    pub(crate) fn find_hashed<Q>(&self, hash: u64, q: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        let _g = self.reentrancy.enter();
        self.table.locate(hash, q)
    }

    pub(crate) fn get_key_value_hashed<Q>(&self, hash: u64, q: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        let _g = self.reentrancy.enter();
        let idx = self.table.locate(hash, q)?;
        let b = self.table.bucket(idx);
        Some((&b.key, &b.value))
    }

    pub(crate) fn get_mut_hashed<Q>(&mut self, hash: u64, q: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        let _g = self.reentrancy.enter();
        let idx = self.table.locate(hash, q)?;
        Some(&mut self.table.bucket_mut(idx).value)
    }

    pub(crate) fn insert_with_hashed<F>(&mut self, hash: u64, key: K, make: F) -> bool
    where
        K: Eq,
        F: FnOnce() -> V,
    {
        let _g = self.reentrancy.enter();
        if self.table.locate(hash, &key).is_some() {
            return false;
        }
        let value = make();
        self.table.insert_absent(&self.config, hash, key, value);
        true
    }

    /// Returns the stored value and whether it was inserted by this call.
    pub(crate) fn get_or_insert_with_hashed<F>(
        &mut self,
        hash: u64,
        key: K,
        make: F,
    ) -> (&mut V, bool)
    where
        K: Eq,
        F: FnOnce() -> V,
    {
        let _g = self.reentrancy.enter();
        let (idx, inserted) = match self.table.locate(hash, &key) {
            Some(idx) => (idx, false),
            None => {
                let value = make();
                (self.table.insert_absent(&self.config, hash, key, value), true)
            }
        };
        (&mut self.table.bucket_mut(idx).value, inserted)
    }

    pub(crate) fn remove_hashed<Q>(&mut self, hash: u64, q: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
    {
        let bucket = {
            let _g = self.reentrancy.enter();
            let idx = self.table.locate(hash, q)?;
            self.table.take(idx)
        };
        // Key and value drop outside the guarded section.
        Some((bucket.key, bucket.value))
    }

    /// Check slot-level invariants: PSL matches actual displacement, the
    /// live count matches occupancy and the growth threshold holds.
    #[cfg(test)]
    pub(crate) fn assert_invariants(&self) {
        let cap = self.capacity();
        assert!(cap.is_power_of_two());
        assert!(cap >= self.config.min_capacity);
        let mask = cap - 1;
        let mut occupied = 0;
        for (pos, slot) in self.table.slots.iter().enumerate() {
            if let Some(b) = slot {
                occupied += 1;
                let home = b.hash as usize & mask;
                assert_eq!(
                    b.psl,
                    pos.wrapping_sub(home) & mask,
                    "PSL mismatch at slot {pos}"
                );
                // Robin Hood ordering: a predecessor on the chain is never poorer
                // by more than one step.
                let prev = (pos + cap - 1) & mask;
                if b.psl > 0 {
                    let p = self.table.slots[prev]
                        .as_ref()
                        .expect("displaced entry has an occupied predecessor");
                    assert!(p.psl + 1 >= b.psl, "Robin Hood order broken at slot {pos}");
                }
            }
        }
        assert_eq!(occupied, self.table.len);
        assert!(self.table.len < self.table.grow_at);
    }

    #[cfg(test)]
    pub(crate) fn psl_at(&self, slot: usize) -> Option<usize> {
        self.table.slots[slot].as_ref().map(|b| b.psl)
    }
}

impl<K, V, S> Shard<K, V, S>
where
    K: Eq,
{
    /// Insert if absent. Returns `false` and leaves the stored value alone
    /// when the key is already present.
    pub fn insert(&mut self, key: K, value: V) -> bool
    where
        S: KeyHasher<K>,
    {
        let hash = self.hasher.hash_key(&key);
        self.insert_with_hashed(hash, key, || value)
    }

    /// Like `insert`, but `make` runs only when the key is absent.
    pub fn insert_with<F>(&mut self, key: K, make: F) -> bool
    where
        S: KeyHasher<K>,
        F: FnOnce() -> V,
    {
        let hash = self.hasher.hash_key(&key);
        self.insert_with_hashed(hash, key, make)
    }

    /// Mutable access to the value for `key`, inserting `V::default()` first
    /// when absent.
    pub fn get_or_insert_default(&mut self, key: K) -> &mut V
    where
        S: KeyHasher<K>,
        V: Default,
    {
        self.get_or_insert_with(key, V::default)
    }

    pub fn get_or_insert_with<F>(&mut self, key: K, make: F) -> &mut V
    where
        S: KeyHasher<K>,
        F: FnOnce() -> V,
    {
        let hash = self.hasher.hash_key(&key);
        self.get_or_insert_with_hashed(hash, key, make).0
    }

    pub fn erase<Q>(&mut self, q: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
        S: KeyHasher<Q>,
    {
        self.remove_entry(q).is_some()
    }

    pub fn remove<Q>(&mut self, q: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
        S: KeyHasher<Q>,
    {
        self.remove_entry(q).map(|(_, v)| v)
    }

    pub fn remove_entry<Q>(&mut self, q: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
        S: KeyHasher<Q>,
    {
        let hash = self.hasher.hash_key(q);
        self.remove_hashed(hash, q)
    }

    pub fn find<Q>(&self, q: &Q) -> Option<Position>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
        S: KeyHasher<Q>,
    {
        let hash = self.hasher.hash_key(q);
        self.find_hashed(hash, q).map(|slot| self.position(0, slot))
    }

    pub fn contains_key<Q>(&self, q: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
        S: KeyHasher<Q>,
    {
        let hash = self.hasher.hash_key(q);
        self.find_hashed(hash, q).is_some()
    }

    pub fn get<Q>(&self, q: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
        S: KeyHasher<Q>,
    {
        self.get_key_value(q).map(|(_, v)| v)
    }

    pub fn get_key_value<Q>(&self, q: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
        S: KeyHasher<Q>,
    {
        let hash = self.hasher.hash_key(q);
        self.get_key_value_hashed(hash, q)
    }

    pub fn get_mut<Q>(&mut self, q: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
        S: KeyHasher<Q>,
    {
        let hash = self.hasher.hash_key(q);
        self.get_mut_hashed(hash, q)
    }

    /// Read-only access that fails with [`Error::KeyNotFound`] when absent.
    pub fn at<Q>(&self, q: &Q) -> Result<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
        S: KeyHasher<Q>,
    {
        self.get(q).ok_or(Error::KeyNotFound)
    }
}

impl<K, V, S> fmt::Debug for Shard<K, V, S>
where
    K: fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V, S> PartialEq for Shard<K, V, S>
where
    K: Eq,
    V: PartialEq,
    S: KeyHasher<K>,
{
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl<K, V, S> Eq for Shard<K, V, S>
where
    K: Eq,
    V: Eq,
    S: KeyHasher<K>,
{
}

impl<K, V, S> Extend<(K, V)> for Shard<K, V, S>
where
    K: Eq,
    S: KeyHasher<K>,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

impl<K, V, S> FromIterator<(K, V)> for Shard<K, V, S>
where
    K: Eq,
    S: KeyHasher<K> + Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut shard = Self::with_hasher(S::default());
        shard.extend(iter);
        shard
    }
}

impl<K, V, S, const N: usize> From<[(K, V); N]> for Shard<K, V, S>
where
    K: Eq,
    S: KeyHasher<K> + Default,
{
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

/// Iterator over a shard's entries in slot order.
pub struct Iter<'a, K, V> {
    slots: core::slice::Iter<'a, Option<Bucket<K, V>>>,
    remaining: usize,
}

impl<K, V> Clone for Iter<'_, K, V> {
    fn clone(&self) -> Self {
        Iter {
            slots: self.slots.clone(),
            remaining: self.remaining,
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let b = self.slots.find_map(Option::as_ref)?;
        self.remaining -= 1;
        Some((&b.key, &b.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}
impl<K, V> FusedIterator for Iter<'_, K, V> {}

/// Mutable iterator over a shard's entries in slot order.
pub struct IterMut<'a, K, V> {
    slots: core::slice::IterMut<'a, Option<Bucket<K, V>>>,
    remaining: usize,
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = (&'a K, &'a mut V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let b = self.slots.find_map(Option::as_mut)?;
        self.remaining -= 1;
        Some((&b.key, &mut b.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for IterMut<'_, K, V> {}
impl<K, V> FusedIterator for IterMut<'_, K, V> {}

/// Owning iterator over a shard's entries.
pub struct IntoIter<K, V> {
    slots: std::vec::IntoIter<Option<Bucket<K, V>>>,
    remaining: usize,
}

impl<K, V> Iterator for IntoIter<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        let b = self.slots.by_ref().flatten().next()?;
        self.remaining -= 1;
        Some((b.key, b.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for IntoIter<K, V> {}
impl<K, V> FusedIterator for IntoIter<K, V> {}

impl<K, V, S> IntoIterator for Shard<K, V, S> {
    type Item = (K, V);
    type IntoIter = IntoIter<K, V>;

    fn into_iter(self) -> IntoIter<K, V> {
        IntoIter {
            remaining: self.table.len,
            slots: self.table.slots.into_iter(),
        }
    }
}

impl<'a, K, V, S> IntoIterator for &'a Shard<K, V, S> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Iter<'a, K, V> {
        self.iter()
    }
}

impl<'a, K, V, S> IntoIterator for &'a mut Shard<K, V, S> {
    type Item = (&'a K, &'a mut V);
    type IntoIter = IterMut<'a, K, V>;

    fn into_iter(self) -> IterMut<'a, K, V> {
        self.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::FnHasher;
    use core::hash::{BuildHasher, Hash, Hasher};
    use std::collections::BTreeSet;

    type IdShard = Shard<u64, u64, FnHasher<fn(&u64) -> u64>>;

    fn identity(k: &u64) -> u64 {
        *k
    }

    fn id_shard() -> IdShard {
        Shard::with_hasher(FnHasher::new(identity as fn(&u64) -> u64))
    }

    fn slot_key(s: &IdShard, slot: usize) -> Option<u64> {
        s.table.slots[slot].as_ref().map(|b| b.key)
    }

    /// Invariant: an incoming entry that is further from home takes the slot
    /// of a resident closer to home; the resident continues one slot on.
    #[test]
    fn robin_hood_swap_displaces_richer_resident() {
        let mut s = id_shard();
        assert!(s.insert(2, 20)); // home 2
        assert!(s.insert(1, 10)); // home 1
        assert!(s.insert(9, 90)); // home 1, probes past 1, steals slot 2

        assert_eq!(s.capacity(), 8);
        assert_eq!((slot_key(&s, 1), s.psl_at(1)), (Some(1), Some(0)));
        assert_eq!((slot_key(&s, 2), s.psl_at(2)), (Some(9), Some(1)));
        assert_eq!((slot_key(&s, 3), s.psl_at(3)), (Some(2), Some(1)));
        s.assert_invariants();
        assert_eq!(s.get(&2), Some(&20));
    }

    /// Scenario: erasing the head of a chain with two displaced followers
    /// shifts both back one slot and decrements each PSL.
    #[test]
    fn erase_mid_chain_shifts_followers_back() {
        let mut s = id_shard();
        for k in [1, 9, 17] {
            assert!(s.insert(k, k * 10));
        }
        assert_eq!(s.psl_at(2), Some(1));
        assert_eq!(s.psl_at(3), Some(2));

        assert!(s.erase(&1));

        assert_eq!((slot_key(&s, 1), s.psl_at(1)), (Some(9), Some(0)));
        assert_eq!((slot_key(&s, 2), s.psl_at(2)), (Some(17), Some(1)));
        assert_eq!(slot_key(&s, 3), None);
        assert_eq!(s.len(), 2);
        s.assert_invariants();
    }

    /// Invariant: the backward shift stops at an entry already at home.
    #[test]
    fn backward_shift_stops_at_home_entry() {
        let mut s = id_shard();
        for k in [1, 9, 3] {
            s.insert(k, 0);
        }
        assert!(s.erase(&1));
        assert_eq!((slot_key(&s, 1), s.psl_at(1)), (Some(9), Some(0)));
        assert_eq!(slot_key(&s, 2), None);
        assert_eq!((slot_key(&s, 3), s.psl_at(3)), (Some(3), Some(0)));
        s.assert_invariants();
    }

    /// Invariant: probing and backward shifting wrap around the array end.
    #[test]
    fn chains_wrap_around_array_end() {
        let mut s = id_shard();
        s.insert(7, 70);
        s.insert(15, 150); // home 7, lands in slot 0
        assert_eq!((slot_key(&s, 0), s.psl_at(0)), (Some(15), Some(1)));
        assert!(s.erase(&7));
        assert_eq!((slot_key(&s, 7), s.psl_at(7)), (Some(15), Some(0)));
        assert_eq!(slot_key(&s, 0), None);
        assert_eq!(s.get(&15), Some(&150));
    }

    /// Invariant: a failed lookup or erase mutates nothing and keeps positions valid.
    #[test]
    fn missing_key_erase_is_a_noop() {
        let mut s = id_shard();
        s.insert(1, 1);
        s.insert(9, 9);
        let pos = s.find(&9).unwrap();
        assert!(!s.erase(&17)); // same home, ends the chain early
        assert!(!s.erase(&4));
        assert_eq!(s.len(), 2);
        assert_eq!(s.get_at(pos), Some((&9, &9)));
    }

    /// Invariant: with the default 8-slot start and load factor 0.5 a shard
    /// doubles each time an insert brings `len` up to half the capacity.
    #[test]
    fn growth_doubles_at_half_occupancy() {
        let expected = [
            (1usize, 0u32),
            (3, 0),
            (4, 1),
            (5, 1),
            (7, 1),
            (8, 2),
            (9, 2),
            (16, 3),
            (1000, 8),
        ];
        for (n, doublings) in expected {
            let mut s: Shard<u64, ()> = Shard::new();
            let mut seen = 0;
            let mut cap = s.capacity();
            for k in 0..n as u64 {
                s.insert(k, ());
                if s.capacity() != cap {
                    assert_eq!(s.capacity(), cap * 2);
                    cap = s.capacity();
                    seen += 1;
                }
            }
            assert_eq!(seen, doublings, "doublings after {n} inserts");
            assert_eq!(s.capacity(), 8 << doublings);
            for k in 0..n as u64 {
                assert!(s.contains_key(&k));
            }
            s.assert_invariants();
        }
    }

    /// Scenario: 1000 sequential keys are all findable and iterate exactly once.
    #[test]
    fn thousand_keys_iterate_once_each() {
        let mut s: Shard<i32, i32> = Shard::new();
        for k in 0..1000 {
            assert!(s.insert(k, k * 2));
        }
        assert_eq!(s.len(), 1000);
        for k in 0..1000 {
            assert_eq!(s.get(&k), Some(&(k * 2)));
        }
        let keys: Vec<i32> = s.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys.len(), 1000);
        let distinct: BTreeSet<i32> = keys.into_iter().collect();
        assert_eq!(distinct, (0..1000).collect::<BTreeSet<i32>>());
        assert_eq!(s.iter().len(), 1000);
        s.assert_invariants();
    }

    /// Invariant: duplicate insert keeps the first value and the size.
    #[test]
    fn duplicate_insert_keeps_first_value() {
        let mut s: Shard<i32, i32> = Shard::new();
        assert!(s.insert(3, 4));
        assert!(!s.insert(3, 5));
        assert_eq!(s.get(&3), Some(&4));
        assert_eq!(s.len(), 1);
        assert!(!s.insert_with(3, || panic!("must not run on duplicate")));
    }

    /// Invariant: the reference handed out by the upsert accessor points at
    /// the inserted entry even when that insert triggered a rehash.
    #[test]
    fn upsert_reference_survives_growth() {
        let mut s = id_shard();
        for k in [0, 8, 16] {
            s.insert(k, k);
        }
        assert_eq!(s.capacity(), 8);
        *s.get_or_insert_default(24) += 7; // fourth entry, doubles to 16
        assert_eq!(s.capacity(), 16);
        assert_eq!(s.get(&24), Some(&7));
        for k in [0, 8, 16] {
            assert_eq!(s.get(&k), Some(&k));
        }
        s.assert_invariants();
    }

    /// Invariant: the upsert accessor tracks its entry through long
    /// displacement chains under total hash collision.
    #[test]
    fn upsert_under_full_collision() {
        let mut s = Shard::with_hasher(FnHasher::new(|_: &u64| 0u64));
        for k in 0..200u64 {
            let v = s.get_or_insert_with(k, || k * 10);
            assert_eq!(*v, k * 10);
            *v += 1;
        }
        for k in 0..200u64 {
            assert_eq!(*s.get_or_insert_default(k), k * 10 + 1);
        }
        assert_eq!(s.len(), 200);
        s.assert_invariants();
    }

    /// Invariant: any structural mutation invalidates earlier positions;
    /// value-only mutation does not.
    #[test]
    fn positions_go_stale_after_structural_mutation() {
        let mut s: Shard<&'static str, i32> = Shard::new();
        s.insert("a", 1);
        let pos = s.find("a").unwrap();
        assert_eq!(pos.shard(), 0);
        *s.get_mut("a").unwrap() = 2;
        assert_eq!(s.get_at(pos), Some((&"a", &2)));
        if let Some((_, v)) = s.get_at_mut(pos) {
            *v = 3;
        }
        assert_eq!(s.get(&"a"), Some(&3));

        s.insert("b", 1);
        assert!(s.get_at(pos).is_none());
        let pos = s.find("a").unwrap();
        s.erase("b");
        assert!(s.get_at_mut(pos).is_none());
        let pos = s.find("a").unwrap();
        s.clear();
        assert!(s.get_at(pos).is_none());
    }

    /// Invariant: clear empties the shard and restores the minimum capacity.
    #[test]
    fn clear_resets_to_min_capacity() {
        let mut s: Shard<u32, u32> = Shard::new();
        for k in 0..100 {
            s.insert(k, k);
        }
        assert!(s.capacity() > 8);
        s.clear();
        assert_eq!(s.capacity(), 8);
        assert!(s.is_empty());
        assert_eq!(s.iter().count(), 0);
        assert!(s.insert(5, 5));
        assert_eq!(s.get(&5), Some(&5));
    }

    /// Invariant: a cloned shard owns its own slot array.
    #[test]
    fn clone_is_independent() {
        let mut a: Shard<String, i32> = Shard::new();
        a.insert("x".to_string(), 1);
        let mut b = a.clone();
        b.insert("y".to_string(), 2);
        *b.get_mut("x").unwrap() = 10;
        assert_eq!(a.len(), 1);
        assert_eq!(a.get("x"), Some(&1));
        assert!(!a.contains_key("y"));
        assert_eq!(b.get("x"), Some(&10));
        assert_ne!(a, b);
    }

    /// Invariant: a position only resolves in the shard that produced it,
    /// even when a clone has reached the same structural epoch.
    #[test]
    fn positions_do_not_resolve_in_a_clone() {
        let mut a = id_shard();
        a.insert(0, 0);
        let mut b = a.clone();
        a.insert(8, 80);
        b.insert(16, 160);
        let pos = a.find(&8).unwrap();
        assert_eq!(a.get_at(pos), Some((&8, &80)));
        assert!(b.get_at(pos).is_none());
        assert!(b.get_at_mut(pos).is_none());

        let other = id_shard();
        let pos0 = a.find(&0).unwrap();
        assert!(other.get_at(pos0).is_none());
    }

    /// Invariant: keys are hashed before the guarded section opens, so a
    /// hasher may look up the shard it serves without tripping the guard.
    #[test]
    fn hasher_runs_outside_the_guarded_section() {
        use core::cell::Cell;

        struct PeekHasher {
            shard: Cell<*const ()>,
            peeked: Cell<bool>,
        }
        type PeekShard = Shard<u64, u64, PeekHasher>;
        impl KeyHasher<u64> for PeekHasher {
            fn hash_key(&self, key: &u64) -> u64 {
                let s = self.shard.get() as *const PeekShard;
                if !s.is_null() && !self.peeked.replace(true) {
                    // Full lookup on the same shard from inside hashing.
                    let _ = unsafe { (*s).contains_key(key) };
                }
                *key
            }
        }

        let mut s: PeekShard = Shard::with_hasher(PeekHasher {
            shard: Cell::new(core::ptr::null()),
            peeked: Cell::new(false),
        });
        s.insert(1, 10);
        s.hash_function()
            .shard
            .set(&s as *const PeekShard as *const ());
        assert!(s.contains_key(&1));
        assert!(s.hash_function().peeked.get());
    }

    /// Invariant: owned iteration yields each entry once and `iter_mut` edits in place.
    #[test]
    fn iter_mut_and_into_iter() {
        let mut s: Shard<u8, u32> = (0..20u8).map(|k| (k, k as u32)).collect();
        for (_, v) in s.iter_mut() {
            *v *= 3;
        }
        for (k, v) in &s {
            assert_eq!(*v, *k as u32 * 3);
        }
        let mut owned: Vec<(u8, u32)> = s.into_iter().collect();
        owned.sort();
        assert_eq!(owned, (0..20u8).map(|k| (k, k as u32 * 3)).collect::<Vec<_>>());
    }

    #[test]
    fn at_reports_key_not_found() {
        let s: Shard<i32, i32> = Shard::from([(2, 3), (-7, -13), (0, 8)]);
        assert_eq!(s.at(&-7), Ok(&-13));
        assert_eq!(s.at(&8), Err(Error::KeyNotFound));
    }

    #[test]
    fn custom_config_grows_at_its_threshold() {
        let cfg = Config::default()
            .with_min_capacity(4)
            .with_load_factor(0.75);
        let mut s: Shard<u32, ()> = Shard::with_config(cfg);
        assert_eq!(s.capacity(), 4);
        s.insert(0, ());
        s.insert(1, ());
        assert_eq!(s.capacity(), 4);
        s.insert(2, ()); // 4 * 0.75 <= 3
        assert_eq!(s.capacity(), 8);
        s.clear();
        assert_eq!(s.capacity(), 4);
        assert!(Shard::<u32, ()>::try_with_config_and_hasher(
            cfg.with_min_capacity(3),
            DefaultHashBuilder::default()
        )
        .is_err());
    }

    /// Invariant (debug-only): re-entering a shard from within `K: Eq` during
    /// a probe panics due to the reentrancy guard.
    #[cfg(debug_assertions)]
    #[test]
    fn reentrancy_panics_from_eq_during_find() {
        #[derive(Clone, Default)]
        struct ConstBuildHasher;
        struct ConstHasher;
        impl BuildHasher for ConstBuildHasher {
            type Hasher = ConstHasher;
            fn build_hasher(&self) -> Self::Hasher {
                ConstHasher
            }
        }
        impl Hasher for ConstHasher {
            fn write(&mut self, _bytes: &[u8]) {}
            fn finish(&self) -> u64 {
                0
            }
        }

        struct ReentryKey {
            id: &'static str,
            shard: *const Shard<ReentryKey, i32, ConstBuildHasher>,
            trigger: bool,
        }
        impl PartialEq for ReentryKey {
            fn eq(&self, other: &Self) -> bool {
                if self.id == other.id {
                    return true;
                }
                if other.trigger {
                    // Attempt to re-enter the same shard during probing.
                    unsafe {
                        let s = &*other.shard;
                        let _ = s.contains_key(self.id);
                    }
                }
                false
            }
        }
        impl Eq for ReentryKey {}
        impl Hash for ReentryKey {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.id.hash(state);
            }
        }
        impl core::borrow::Borrow<str> for ReentryKey {
            fn borrow(&self) -> &str {
                self.id
            }
        }

        let mut s: Shard<ReentryKey, i32, ConstBuildHasher> =
            Shard::with_hasher(ConstBuildHasher);
        let ptr = &s as *const _;
        s.insert(
            ReentryKey {
                id: "a",
                shard: ptr,
                trigger: false,
            },
            1,
        );

        let query = ReentryKey {
            id: "b",
            shard: &s as *const _,
            trigger: true,
        };
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = s.find(&query);
        }));
        assert!(res.is_err(), "expected reentrancy to panic in debug builds");
    }
}
