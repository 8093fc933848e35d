//! Hash capability consumed by shards and the router.
//!
//! A hasher is any value that maps a key to a `u64` deterministically for
//! as long as the key is stored. Every `BuildHasher` qualifies; plain
//! functions and closures are adapted through [`FnHasher`].

use core::hash::{BuildHasher, Hash};

/// Default hash builder used when none is supplied.
pub type DefaultHashBuilder = hashbrown::hash_map::DefaultHashBuilder;

pub trait KeyHasher<Q: ?Sized> {
    fn hash_key(&self, key: &Q) -> u64;
}

impl<Q, S> KeyHasher<Q> for S
where
    Q: ?Sized + Hash,
    S: BuildHasher,
{
    #[inline]
    fn hash_key(&self, key: &Q) -> u64 {
        self.hash_one(key)
    }
}

/// Wraps a function `Fn(&Q) -> u64` so it can serve as the map's hasher.
///
/// ```
/// use robin_shard_map::{FnHasher, ShardedMap};
///
/// let mut m: ShardedMap<u64, &str, _> = ShardedMap::with_hasher(FnHasher::new(|k: &u64| *k % 17239));
/// m.insert(0, "a");
/// m.insert(17239, "b");
/// assert_eq!(m.hash_function().call(&17239), 0);
/// assert_eq!(m.len(), 2);
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct FnHasher<F>(F);

impl<F> FnHasher<F> {
    pub fn new(f: F) -> Self {
        FnHasher(f)
    }

    /// Invoke the wrapped function directly.
    #[inline]
    pub fn call<Q: ?Sized>(&self, key: &Q) -> u64
    where
        F: Fn(&Q) -> u64,
    {
        (self.0)(key)
    }

    pub fn into_inner(self) -> F {
        self.0
    }
}

impl<Q, F> KeyHasher<Q> for FnHasher<F>
where
    Q: ?Sized,
    F: Fn(&Q) -> u64,
{
    #[inline]
    fn hash_key(&self, key: &Q) -> u64 {
        (self.0)(key)
    }
}
