//! Core type definitions for the mempool.

use bitcoin::{BlockHash, Transaction};
use slotmap::DefaultKey;
use std::collections::HashSet;
use std::sync::Arc;

/// Handle to an entry in the mempool arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(pub(crate) DefaultKey);

/// Fee rate in satoshis per virtual kilobyte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct FeeRate(u64);

impl FeeRate {
    pub const ZERO: FeeRate = FeeRate(0);

    /// Create fee rate from satoshis per virtual byte.
    pub fn from_sat_per_vb(sat_vb: u64) -> Self {
        Self(sat_vb.checked_mul(1000).expect("Fee rate overflow"))
    }

    /// Create fee rate from satoshis per kilovirtual byte.
    pub fn from_sat_per_kvb(sat_kvb: u64) -> Self {
        Self(sat_kvb)
    }

    /// Calculate fee rate from a fee in satoshis and a virtual size.
    ///
    /// Negative fees clamp to zero; a non-positive vsize is a caller bug.
    pub fn from_fee_and_size(fee_sat: i64, vsize: i64) -> Self {
        assert!(vsize > 0, "fee rate requires a positive vsize");
        if fee_sat <= 0 {
            return Self(0);
        }
        let numerator = (fee_sat as u64)
            .checked_mul(1000)
            .expect("Fee rate calculation overflow");
        Self(numerator / vsize as u64)
    }

    /// Fee in satoshis this rate charges for `vsize` virtual bytes.
    pub fn fee_for(&self, vsize: i64) -> i64 {
        assert!(vsize >= 0, "fee lookup requires a non-negative vsize");
        let fee = self
            .0
            .checked_mul(vsize as u64)
            .expect("Fee calculation overflow")
            / 1000;
        fee as i64
    }

    /// The fee rate in satoshis per kilovirtual byte.
    pub fn to_sat_per_kvb(&self) -> u64 {
        self.0
    }

    /// Saturating sum of two rates.
    pub fn saturating_add(&self, other: FeeRate) -> FeeRate {
        FeeRate(self.0.saturating_add(other.0))
    }
}

impl std::fmt::Display for FeeRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} sat/kvB", self.0)
    }
}

/// Cached result of sequence-lock evaluation (BIP68), tagged with the block
/// whose view produced it.
#[derive(Debug, Clone, Default)]
pub struct LockPoints {
    /// Height at which the transaction becomes valid (-1 if unconstrained).
    pub height: i32,
    /// Median time past at which the transaction becomes valid (0 if
    /// unconstrained).
    pub time: i64,
    /// Highest active-chain block containing an input of this transaction.
    /// The lock points stay valid while this block stays on the active
    /// chain.
    pub max_input_block: Option<BlockHash>,
}

/// Reason for removing transactions from the mempool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Expired from the pool.
    Expiry,
    /// Evicted when the pool exceeded its size limit.
    SizeLimit,
    /// Removed during a chain reorganization.
    Reorg,
    /// Included in a block.
    Block,
    /// Conflicted with a transaction in a block.
    Conflict,
    /// Replaced by a higher-fee transaction.
    Replaced,
    /// Manually removed or unspecified.
    Unknown,
}

impl RemovalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expiry => "expiry",
            Self::SizeLimit => "sizelimit",
            Self::Reorg => "reorg",
            Self::Block => "block",
            Self::Conflict => "conflict",
            Self::Replaced => "replaced",
            Self::Unknown => "unknown",
        }
    }
}

/// Bounds applied by the ancestor walk.
#[derive(Debug, Clone, Copy)]
pub struct AncestorLimits {
    /// Maximum number of in-pool ancestors, the entry itself included.
    pub ancestor_count: u64,
    /// Maximum total virtual size of the entry plus its ancestors.
    pub ancestor_size_vb: i64,
    /// Maximum descendant count any ancestor may end up with.
    pub descendant_count: u64,
    /// Maximum descendant virtual size any ancestor may end up with.
    pub descendant_size_vb: i64,
}

impl AncestorLimits {
    /// No bounds; used by internal walks over entries already in the pool.
    pub fn unbounded() -> Self {
        Self {
            ancestor_count: u64::MAX,
            ancestor_size_vb: i64::MAX,
            descendant_count: u64::MAX,
            descendant_size_vb: i64::MAX,
        }
    }
}

/// The set of transactions displaced by a replacement.
#[derive(Debug, Clone)]
pub struct ConflictSet {
    /// Entries spending the same outpoints as the incoming transaction.
    pub direct_conflicts: HashSet<EntryId>,
    /// Direct conflicts plus all their in-pool descendants.
    pub all_conflicts: HashSet<EntryId>,
    /// Total modified fees of everything being displaced.
    pub replaced_fees: i64,
    /// Total virtual size of everything being displaced.
    pub replaced_size: i64,
}

/// Snapshot of a single pool entry, as returned by `info`/`info_all`.
#[derive(Debug, Clone)]
pub struct TxMempoolInfo {
    /// The transaction.
    pub tx: Arc<Transaction>,
    /// Acceptance time, seconds since epoch.
    pub time: i64,
    /// Base fee rate.
    pub fee_rate: FeeRate,
    /// Operator-applied fee delta.
    pub fee_delta: i64,
}

/// Synchronous pool event sink.
///
/// Callbacks run while the pool lock is held; implementations (fee
/// estimators, relay trackers) must not call back into the pool.
pub trait MemPoolObserver: Send + Sync {
    /// A transaction entered the pool. `valid_fee_estimate` is false for
    /// entries restored from disk, whose fees must not skew estimators.
    fn entry_added(&self, tx: &Arc<Transaction>, valid_fee_estimate: bool) {
        let _ = (tx, valid_fee_estimate);
    }

    /// A transaction left the pool.
    fn entry_removed(&self, tx: &Arc<Transaction>, reason: RemovalReason) {
        let _ = (tx, reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fee_rate_from_fee_and_size() {
        // 1000 sat fee, 250 vbytes = 4000 sat/kvB
        assert_eq!(FeeRate::from_fee_and_size(1000, 250).to_sat_per_kvb(), 4000);

        // 500 sat fee, 200 vbytes = 2500 sat/kvB
        assert_eq!(FeeRate::from_fee_and_size(500, 200).to_sat_per_kvb(), 2500);

        // Negative fees clamp to zero.
        assert_eq!(FeeRate::from_fee_and_size(-5, 100).to_sat_per_kvb(), 0);
    }

    #[test]
    fn fee_rate_round_trip() {
        let rate = FeeRate::from_sat_per_vb(2);
        assert_eq!(rate.to_sat_per_kvb(), 2000);
        assert_eq!(rate.fee_for(150), 300);
    }
}
