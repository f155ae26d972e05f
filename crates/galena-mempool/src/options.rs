use crate::types::{AncestorLimits, FeeRate};
use std::time::Duration;

/// Dependency-chain limits applied during acceptance.
#[derive(Clone, Debug)]
pub struct MemPoolLimits {
    /// Maximum number of in-pool ancestors for a transaction.
    pub max_ancestor_count: u64,

    /// Maximum virtual size of a transaction plus all its ancestors.
    pub max_ancestor_size_vb: i64,

    /// Maximum number of in-pool descendants for a transaction.
    pub max_descendant_count: u64,

    /// Maximum virtual size of a transaction plus all its descendants.
    pub max_descendant_size_vb: i64,
}

impl Default for MemPoolLimits {
    fn default() -> Self {
        Self {
            max_ancestor_count: 25,
            max_ancestor_size_vb: 101_000,
            max_descendant_count: 25,
            max_descendant_size_vb: 101_000,
        }
    }
}

impl MemPoolLimits {
    pub(crate) fn as_ancestor_limits(&self) -> AncestorLimits {
        AncestorLimits {
            ancestor_count: self.max_ancestor_count,
            ancestor_size_vb: self.max_ancestor_size_vb,
            descendant_count: self.max_descendant_count,
            descendant_size_vb: self.max_descendant_size_vb,
        }
    }
}

/// Configuration options for the transaction memory pool.
#[derive(Clone, Debug)]
pub struct MemPoolOptions {
    /// Maximum dynamic memory usage of the pool in MB.
    pub max_size_mb: usize,

    /// Number of hours to keep transactions in the pool.
    pub expiry_hours: u32,

    /// Minimum fee rate for a transaction to be accepted.
    pub min_relay_feerate: FeeRate,

    /// Fee rate increment used by replacement and by the rolling fee floor.
    pub incremental_relay_feerate: FeeRate,

    /// Whether conflicting transactions may be replaced (BIP125).
    pub enable_rbf: bool,

    /// Maximum number of transactions a replacement may displace.
    pub max_replacement_candidates: usize,

    /// A value of n runs the full consistency audit n times in 2^32 calls.
    pub check_frequency: u32,

    /// Dependency-chain limits.
    pub limits: MemPoolLimits,
}

impl Default for MemPoolOptions {
    fn default() -> Self {
        Self {
            max_size_mb: 300,
            expiry_hours: 336, // 2 weeks
            min_relay_feerate: FeeRate::from_sat_per_kvb(1000),
            incremental_relay_feerate: FeeRate::from_sat_per_kvb(1000),
            enable_rbf: true,
            max_replacement_candidates: 100,
            check_frequency: 0,
            limits: MemPoolLimits::default(),
        }
    }
}

impl MemPoolOptions {
    /// Create new mempool options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for configuring mempool options.
    pub fn builder() -> MemPoolOptionsBuilder {
        MemPoolOptionsBuilder::default()
    }

    /// Maximum dynamic memory usage in bytes.
    pub fn max_size_bytes(&self) -> usize {
        self.max_size_mb * 1_000_000
    }

    /// Expiry age as a duration.
    pub fn expiry_duration(&self) -> Duration {
        Duration::from_secs(self.expiry_hours as u64 * 3600)
    }
}

/// Builder pattern for [`MemPoolOptions`].
#[derive(Default)]
pub struct MemPoolOptionsBuilder {
    options: MemPoolOptions,
}

impl MemPoolOptionsBuilder {
    /// Set maximum dynamic usage of the pool in MB.
    pub fn max_size_mb(mut self, size: usize) -> Self {
        self.options.max_size_mb = size;
        self
    }

    /// Set minimum relay fee rate in sat/kvB.
    pub fn min_relay_feerate(mut self, sat_kvb: u64) -> Self {
        self.options.min_relay_feerate = FeeRate::from_sat_per_kvb(sat_kvb);
        self
    }

    /// Set the incremental relay fee rate in sat/kvB.
    pub fn incremental_relay_feerate(mut self, sat_kvb: u64) -> Self {
        self.options.incremental_relay_feerate = FeeRate::from_sat_per_kvb(sat_kvb);
        self
    }

    /// Set expiry time in hours.
    pub fn expiry_hours(mut self, hours: u32) -> Self {
        self.options.expiry_hours = hours;
        self
    }

    /// Set maximum number of ancestors.
    pub fn max_ancestor_count(mut self, count: u64) -> Self {
        self.options.limits.max_ancestor_count = count;
        self
    }

    /// Set maximum ancestor size in virtual bytes.
    pub fn max_ancestor_size_vb(mut self, size: i64) -> Self {
        self.options.limits.max_ancestor_size_vb = size;
        self
    }

    /// Set maximum number of descendants.
    pub fn max_descendant_count(mut self, count: u64) -> Self {
        self.options.limits.max_descendant_count = count;
        self
    }

    /// Set maximum descendant size in virtual bytes.
    pub fn max_descendant_size_vb(mut self, size: i64) -> Self {
        self.options.limits.max_descendant_size_vb = size;
        self
    }

    /// Enable or disable replacement.
    pub fn enable_rbf(mut self, enable: bool) -> Self {
        self.options.enable_rbf = enable;
        self
    }

    /// Set the sanity-check frequency; `frequency` is the probability scaled
    /// to the full u32 range.
    pub fn check_frequency(mut self, frequency: u32) -> Self {
        self.options.check_frequency = frequency;
        self
    }

    /// Build the final [`MemPoolOptions`].
    pub fn build(self) -> MemPoolOptions {
        self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides() {
        let options = MemPoolOptions::builder()
            .max_size_mb(500)
            .min_relay_feerate(2000)
            .expiry_hours(168)
            .max_ancestor_count(50)
            .build();

        assert_eq!(options.max_size_mb, 500);
        assert_eq!(options.min_relay_feerate.to_sat_per_kvb(), 2000);
        assert_eq!(options.expiry_hours, 168);
        assert_eq!(options.limits.max_ancestor_count, 50);
    }

    #[test]
    fn defaults() {
        let options = MemPoolOptions::default();

        assert_eq!(options.max_size_mb, 300);
        assert_eq!(options.min_relay_feerate.to_sat_per_kvb(), 1000);
        assert_eq!(options.expiry_hours, 336);
        assert_eq!(options.limits.max_ancestor_count, 25);
        assert_eq!(options.limits.max_descendant_size_vb, 101_000);
    }
}
