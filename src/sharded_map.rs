//! ShardedMap: routes each key to one of a fixed set of shards.
//!
//! The key is hashed once; the low bits of that hash (`hash & (N - 1)`)
//! pick the shard and the same hash drives placement inside it. Every
//! operation touches exactly one shard, so growth cost is bounded by the
//! largest shard rather than the whole map.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::hasher::{DefaultHashBuilder, KeyHasher};
use crate::shard::{self, Position, Shard};
use core::borrow::Borrow;
use core::fmt;
use core::iter::FusedIterator;
use core::ops::Index;
use tracing::{debug, trace};

pub struct ShardedMap<K, V, S = DefaultHashBuilder> {
    hasher: S,
    shards: Box<[Shard<K, V, S>]>,
    len: usize,
}

impl<K, V> ShardedMap<K, V> {
    pub fn new() -> Self {
        Self::with_hasher(Default::default())
    }

    /// Panics if `config` does not validate.
    pub fn with_config(config: Config) -> Self {
        Self::with_config_and_hasher(config, Default::default())
    }
}

impl<K, V, S: Clone + Default> Default for ShardedMap<K, V, S> {
    fn default() -> Self {
        Self::with_hasher(S::default())
    }
}

impl<K, V, S: Clone> ShardedMap<K, V, S> {
    pub fn with_hasher(hasher: S) -> Self {
        Self::from_parts(Config::default(), hasher)
    }

    /// Panics if `config` does not validate.
    pub fn with_config_and_hasher(config: Config, hasher: S) -> Self {
        match Self::try_with_config_and_hasher(config, hasher) {
            Ok(map) => map,
            Err(e) => panic!("{e}"),
        }
    }

    pub fn try_with_config_and_hasher(config: Config, hasher: S) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_parts(config, hasher))
    }

    fn from_parts(config: Config, hasher: S) -> Self {
        let shards = (0..config.shard_count)
            .map(|_| Shard::from_parts(config, hasher.clone()))
            .collect();
        Self {
            hasher,
            shards,
            len: 0,
        }
    }
}

impl<K, V, S> ShardedMap<K, V, S> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn hash_function(&self) -> &S {
        &self.hasher
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Read-only view of every shard, in routing order.
    pub fn shards(&self) -> &[Shard<K, V, S>] {
        &self.shards
    }

    /// Total slots allocated across all shards.
    pub fn capacity(&self) -> usize {
        self.shards.iter().map(Shard::capacity).sum()
    }

    #[inline]
    fn route(&self, hash: u64) -> usize {
        let shard = hash as usize & (self.shards.len() - 1);
        trace!(target: "robin_shard_map", shard, hash, "routed key");
        shard
    }

    /// Empty every shard, returning each to its minimum capacity.
    pub fn clear(&mut self) {
        for shard in self.shards.iter_mut() {
            shard.clear();
        }
        self.len = 0;
        debug!(target: "robin_shard_map", shards = self.shards.len(), "sharded map cleared");
    }

    pub fn get_at(&self, pos: Position) -> Option<(&K, &V)> {
        self.shards.get(pos.shard)?.get_at(pos)
    }

    pub fn get_at_mut(&mut self, pos: Position) -> Option<(&K, &mut V)> {
        self.shards.get_mut(pos.shard)?.get_at_mut(pos)
    }

    /// Shard 0's entries, then shard 1's, and so on. Order within a shard
    /// changes whenever that shard rehashes.
    pub fn iter(&self) -> Iter<'_, K, V, S> {
        Iter {
            shards: self.shards.iter(),
            current: None,
            remaining: self.len,
        }
    }

    pub fn iter_mut(&mut self) -> IterMut<'_, K, V, S> {
        IterMut {
            shards: self.shards.iter_mut(),
            current: None,
            remaining: self.len,
        }
    }

    pub fn keys(&self) -> Keys<'_, K, V, S> {
        Keys { inner: self.iter() }
    }

    pub fn values(&self) -> Values<'_, K, V, S> {
        Values { inner: self.iter() }
    }

    pub fn values_mut(&mut self) -> ValuesMut<'_, K, V, S> {
        ValuesMut {
            inner: self.iter_mut(),
        }
    }
}

impl<K, V, S> ShardedMap<K, V, S>
where
    K: Eq,
{
    /// Insert if absent. Returns `false` and leaves the stored value alone
    /// when the key is already present.
    pub fn insert(&mut self, key: K, value: V) -> bool
    where
        S: KeyHasher<K>,
    {
        self.insert_with(key, || value)
    }

    /// Like `insert`, but `make` runs only when the key is absent.
    pub fn insert_with<F>(&mut self, key: K, make: F) -> bool
    where
        S: KeyHasher<K>,
        F: FnOnce() -> V,
    {
        let hash = self.hasher.hash_key(&key);
        let idx = self.route(hash);
        let inserted = self.shards[idx].insert_with_hashed(hash, key, make);
        if inserted {
            self.len += 1;
        }
        inserted
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
        let idx = self.route(hash);
        let (value, inserted) = self.shards[idx].get_or_insert_with_hashed(hash, key, make);
        if inserted {
            self.len += 1;
        }
        value
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
        let idx = self.route(hash);
        let removed = self.shards[idx].remove_hashed(hash, q)?;
        self.len -= 1;
        Some(removed)
    }

    pub fn find<Q>(&self, q: &Q) -> Option<Position>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
        S: KeyHasher<Q>,
    {
        let hash = self.hasher.hash_key(q);
        let idx = self.route(hash);
        let shard = &self.shards[idx];
        shard.find_hashed(hash, q).map(|slot| shard.position(idx, slot))
    }

    /// Index of the shard `q` routes to, whether or not it is present.
    pub fn shard_for<Q>(&self, q: &Q) -> usize
    where
        Q: ?Sized,
        S: KeyHasher<Q>,
    {
        self.route(self.hasher.hash_key(q))
    }

    pub fn contains_key<Q>(&self, q: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
        S: KeyHasher<Q>,
    {
        self.find(q).is_some()
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
        let idx = self.route(hash);
        self.shards[idx].get_key_value_hashed(hash, q)
    }

    pub fn get_mut<Q>(&mut self, q: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Eq,
        S: KeyHasher<Q>,
    {
        let hash = self.hasher.hash_key(q);
        let idx = self.route(hash);
        self.shards[idx].get_mut_hashed(hash, q)
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

    /// Build from pairs with an explicit hasher; the first occurrence of a
    /// duplicated key wins.
    pub fn from_iter_with_hasher<I>(iter: I, hasher: S) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        S: KeyHasher<K> + Clone,
    {
        let mut map = Self::with_hasher(hasher);
        map.extend(iter);
        map
    }
}

impl Position {
    pub fn key<'a, K, V, S>(&self, map: &'a ShardedMap<K, V, S>) -> Option<&'a K> {
        map.get_at(*self).map(|(k, _)| k)
    }

    pub fn value<'a, K, V, S>(&self, map: &'a ShardedMap<K, V, S>) -> Option<&'a V> {
        map.get_at(*self).map(|(_, v)| v)
    }

    pub fn value_mut<'a, K, V, S>(&self, map: &'a mut ShardedMap<K, V, S>) -> Option<&'a mut V> {
        map.get_at_mut(*self).map(|(_, v)| v)
    }
}

// Deep copy: every shard duplicates its own slot array.
impl<K: Clone, V: Clone, S: Clone> Clone for ShardedMap<K, V, S> {
    fn clone(&self) -> Self {
        Self {
            hasher: self.hasher.clone(),
            shards: self.shards.clone(),
            len: self.len,
        }
    }
}

impl<K, V, S> fmt::Debug for ShardedMap<K, V, S>
where
    K: fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K, V, S> PartialEq for ShardedMap<K, V, S>
where
    K: Eq,
    V: PartialEq,
    S: KeyHasher<K>,
{
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl<K, V, S> Eq for ShardedMap<K, V, S>
where
    K: Eq,
    V: Eq,
    S: KeyHasher<K>,
{
}

impl<K, Q, V, S> Index<&Q> for ShardedMap<K, V, S>
where
    K: Eq + Borrow<Q>,
    Q: ?Sized + Eq,
    S: KeyHasher<Q>,
{
    type Output = V;

    /// Panics when the key is absent; see [`ShardedMap::at`].
    fn index(&self, key: &Q) -> &V {
        match self.at(key) {
            Ok(v) => v,
            Err(e) => panic!("{e}"),
        }
    }
}

impl<K, V, S> Extend<(K, V)> for ShardedMap<K, V, S>
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

impl<K, V, S> FromIterator<(K, V)> for ShardedMap<K, V, S>
where
    K: Eq,
    S: KeyHasher<K> + Clone + Default,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_iter_with_hasher(iter, S::default())
    }
}

impl<K, V, S, const N: usize> From<[(K, V); N]> for ShardedMap<K, V, S>
where
    K: Eq,
    S: KeyHasher<K> + Clone + Default,
{
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

/// Iterator over all entries, shard by shard.
pub struct Iter<'a, K, V, S> {
    shards: core::slice::Iter<'a, Shard<K, V, S>>,
    current: Option<shard::Iter<'a, K, V>>,
    remaining: usize,
}

impl<K, V, S> Clone for Iter<'_, K, V, S> {
    fn clone(&self) -> Self {
        Iter {
            shards: self.shards.clone(),
            current: self.current.clone(),
            remaining: self.remaining,
        }
    }
}

impl<'a, K, V, S> Iterator for Iter<'a, K, V, S> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.current.as_mut().and_then(Iterator::next) {
                self.remaining -= 1;
                return Some(item);
            }
            // Past the last shard is the end of the whole map.
            let shard = self.shards.by_ref().find(|s| !s.is_empty())?;
            self.current = Some(shard.iter());
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V, S> ExactSizeIterator for Iter<'_, K, V, S> {}
impl<K, V, S> FusedIterator for Iter<'_, K, V, S> {}

/// Mutable iterator over all entries, shard by shard.
pub struct IterMut<'a, K, V, S> {
    shards: core::slice::IterMut<'a, Shard<K, V, S>>,
    current: Option<shard::IterMut<'a, K, V>>,
    remaining: usize,
}

impl<'a, K, V, S> Iterator for IterMut<'a, K, V, S> {
    type Item = (&'a K, &'a mut V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.current.as_mut().and_then(Iterator::next) {
                self.remaining -= 1;
                return Some(item);
            }
            let shard = self.shards.by_ref().find(|s| !s.is_empty())?;
            self.current = Some(shard.iter_mut());
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V, S> ExactSizeIterator for IterMut<'_, K, V, S> {}
impl<K, V, S> FusedIterator for IterMut<'_, K, V, S> {}

/// Owning iterator over all entries, shard by shard.
pub struct IntoIter<K, V, S> {
    shards: std::vec::IntoIter<Shard<K, V, S>>,
    current: Option<shard::IntoIter<K, V>>,
    remaining: usize,
}

impl<K, V, S> Iterator for IntoIter<K, V, S> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.current.as_mut().and_then(Iterator::next) {
                self.remaining -= 1;
                return Some(item);
            }
            let shard = self.shards.by_ref().find(|s| !s.is_empty())?;
            self.current = Some(shard.into_iter());
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V, S> ExactSizeIterator for IntoIter<K, V, S> {}
impl<K, V, S> FusedIterator for IntoIter<K, V, S> {}

impl<K, V, S> IntoIterator for ShardedMap<K, V, S> {
    type Item = (K, V);
    type IntoIter = IntoIter<K, V, S>;

    fn into_iter(self) -> IntoIter<K, V, S> {
        IntoIter {
            remaining: self.len,
            shards: self.shards.into_vec().into_iter(),
            current: None,
        }
    }
}

impl<'a, K, V, S> IntoIterator for &'a ShardedMap<K, V, S> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V, S>;

    fn into_iter(self) -> Iter<'a, K, V, S> {
        self.iter()
    }
}

impl<'a, K, V, S> IntoIterator for &'a mut ShardedMap<K, V, S> {
    type Item = (&'a K, &'a mut V);
    type IntoIter = IterMut<'a, K, V, S>;

    fn into_iter(self) -> IterMut<'a, K, V, S> {
        self.iter_mut()
    }
}

pub struct Keys<'a, K, V, S> {
    inner: Iter<'a, K, V, S>,
}

impl<'a, K, V, S> Iterator for Keys<'a, K, V, S> {
    type Item = &'a K;

    #[inline]
    fn next(&mut self) -> Option<&'a K> {
        self.inner.next().map(|(k, _)| k)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V, S> ExactSizeIterator for Keys<'_, K, V, S> {}
impl<K, V, S> FusedIterator for Keys<'_, K, V, S> {}

pub struct Values<'a, K, V, S> {
    inner: Iter<'a, K, V, S>,
}

impl<'a, K, V, S> Iterator for Values<'a, K, V, S> {
    type Item = &'a V;

    #[inline]
    fn next(&mut self) -> Option<&'a V> {
        self.inner.next().map(|(_, v)| v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V, S> ExactSizeIterator for Values<'_, K, V, S> {}
impl<K, V, S> FusedIterator for Values<'_, K, V, S> {}

pub struct ValuesMut<'a, K, V, S> {
    inner: IterMut<'a, K, V, S>,
}

impl<'a, K, V, S> Iterator for ValuesMut<'a, K, V, S> {
    type Item = &'a mut V;

    #[inline]
    fn next(&mut self) -> Option<&'a mut V> {
        self.inner.next().map(|(_, v)| v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V, S> ExactSizeIterator for ValuesMut<'_, K, V, S> {}
impl<K, V, S> FusedIterator for ValuesMut<'_, K, V, S> {}
