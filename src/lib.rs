//! robin-shard-map: a single-threaded map built from independently
//! growing Robin Hood hash tables.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: keep probe lengths short and predictable (Robin Hood) while
//!   bounding the cost of any one resize (sharding).
//! - Layers:
//!   - Shard<K, V, S>: one open-addressing table over a power-of-two slot
//!     array. Robin Hood insertion, backward-shift deletion, doubling
//!     rehash at a load-factor threshold. Includes a debug-only
//!     reentrancy guard around every section that runs user code.
//!   - ShardedMap<K, V, S>: a fixed array of shards. Hashes each key
//!     once, routes on `hash & (shards - 1)` and hands the same hash to
//!     the shard, keeps the aggregate length, and chains shard iteration.
//!
//! Constraints
//! - Single-threaded: `!Sync`; `Send` when keys, values and hasher are.
//! - One contiguous slot array per shard; no per-entry heap allocation.
//! - Unique keys; a duplicate insert is a no-op that reports `false`.
//! - No tombstones: after every erase each slot is either empty or live.
//! - Capacity only grows, except that `clear` returns every shard to its
//!   minimum capacity.
//!
//! Hasher and rehashing invariants
//! - Each slot stores the `u64` hash of its key. Rehash and backward
//!   shifting use the stored hash; the hasher runs once per public call.
//! - The hasher must be a pure function of the key for as long as the
//!   key is stored. Any `BuildHasher` works, and [`FnHasher`] adapts
//!   plain functions and closures.
//!
//! Positions and iteration
//! - Borrowing iterators cannot outlive a mutation (the borrow checker
//!   forbids it). Detached [`Position`] snapshots returned by `find`
//!   resolve to `None` once their shard has been structurally mutated,
//!   and never resolve in another map, a clone included.
//! - Iteration order is shard order, then slot order within a shard, and
//!   is not stable across inserts or erases.
//!
//! Reentrancy policy
//! - Shard methods enter a debug-only guard before probing; `K: Eq` and
//!   default-value closures must not call back into the same shard.
//!   Hashing happens before the guard is entered, once per public call.
//!   Removed keys and values are dropped after the guard is released, so
//!   their `Drop` may freely use the map again.

pub mod config;
mod error;
pub mod hasher;
mod reentrancy;
pub mod shard;
mod shard_proptest;
pub mod sharded_map;

// Public surface
pub use config::Config;
pub use error::{Error, Result};
pub use hasher::{DefaultHashBuilder, FnHasher, KeyHasher};
pub use shard::{Position, Shard};
pub use sharded_map::ShardedMap;
