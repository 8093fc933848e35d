//! Construction-time sizing knobs for shards and the router.

use crate::error::{Error, Result};

/// Number of shards in the reference layout.
pub const DEFAULT_SHARD_COUNT: usize = 8;
/// Smallest slot array a shard ever allocates.
pub const DEFAULT_MIN_CAPACITY: usize = 8;
/// Occupancy ratio at which a shard doubles.
pub const DEFAULT_LOAD_FACTOR: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    /// Number of independent shards a `ShardedMap` routes keys into.
    /// Must be a non-zero power of two; the router masks the low bits of
    /// the key hash with `shard_count - 1`.
    /// Default: 8.
    pub shard_count: usize,

    /// Capacity every shard starts at, and returns to on `clear`.
    /// Must be a non-zero power of two.
    /// Default: 8.
    pub min_capacity: usize,

    /// A shard doubles once `capacity * load_factor <= len` after an insert.
    /// Must lie strictly between 0 and 1.
    /// Default: 0.5.
    pub load_factor: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shard_count: DEFAULT_SHARD_COUNT,
            min_capacity: DEFAULT_MIN_CAPACITY,
            load_factor: DEFAULT_LOAD_FACTOR,
        }
    }
}

impl Config {
    pub fn with_shard_count(mut self, shard_count: usize) -> Self {
        self.shard_count = shard_count;
        self
    }

    pub fn with_min_capacity(mut self, min_capacity: usize) -> Self {
        self.min_capacity = min_capacity;
        self
    }

    pub fn with_load_factor(mut self, load_factor: f64) -> Self {
        self.load_factor = load_factor;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.shard_count.is_power_of_two() {
            return Err(Error::InvalidConfig(format!(
                "shard_count must be a non-zero power of two, got {}",
                self.shard_count
            )));
        }
        if !self.min_capacity.is_power_of_two() {
            return Err(Error::InvalidConfig(format!(
                "min_capacity must be a non-zero power of two, got {}",
                self.min_capacity
            )));
        }
        if !self.load_factor.is_finite() || self.load_factor <= 0.0 || self.load_factor >= 1.0 {
            return Err(Error::InvalidConfig(format!(
                "load_factor must lie in (0, 1), got {}",
                self.load_factor
            )));
        }
        Ok(())
    }

    /// Live-entry count at which a shard of `capacity` slots must grow.
    pub(crate) fn grow_at(&self, capacity: usize) -> usize {
        let threshold = (capacity as f64 * self.load_factor).ceil() as usize;
        threshold.max(1)
    }
}
