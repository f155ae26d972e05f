//! Transaction pool abstraction for network integration.

use bitcoin::{Transaction, Txid};
use std::sync::Arc;

/// Result of transaction validation.
#[derive(Debug, Clone)]
pub enum TxValidationResult {
    /// Transaction accepted into the pool.
    Accepted {
        txid: Txid,
        /// Fee rate in sat/kvB for relay decisions.
        fee_rate: u64,
    },
    /// Transaction rejected.
    Rejected {
        txid: Txid,
        reason: RejectionReason,
    },
}

/// Classification of rejection reasons for peer penalty policy.
#[derive(Debug, Clone)]
pub enum RejectionReason {
    /// Soft rejection - don't penalize peer.
    Soft(SoftRejection),
    /// Hard rejection - penalize peer for protocol violation.
    Hard(HardRejection),
}

impl RejectionReason {
    /// Returns true if the peer should be penalized for this rejection.
    pub fn should_penalize_peer(&self) -> bool {
        matches!(self, Self::Hard(_))
    }
}

/// Soft rejections - legitimate reasons that don't indicate misbehavior.
#[derive(Debug, Clone)]
pub enum SoftRejection {
    /// Transaction already in the pool.
    AlreadyInMempool,
    /// Missing parent transactions (might arrive later).
    MissingInputs { parents: Vec<Txid> },
    /// Fee rate too low for relay.
    FeeTooLow { min_kvb: u64, actual_kvb: u64 },
    /// Pool is at capacity and the transaction did not make the cut.
    MempoolFull,
    /// Too long a chain of unconfirmed ancestors.
    TooManyAncestors(u64),
    /// Too large an unconfirmed package.
    TooManyDescendants(u64),
    /// Transaction conflicts with the pool.
    TxConflict(String),
    /// RBF-related refusals.
    NoConflictToReplace,
    TxNotReplaceable,
    TooManyReplacements(usize),
    NewUnconfirmedInput,
    InsufficientFee(String),
}

/// Hard rejections - indicate protocol violations or malformed transactions.
#[derive(Debug, Clone)]
pub enum HardRejection {
    /// Coinbase transaction not allowed in the pool.
    Coinbase,
    /// Transaction is non-final.
    NonFinal,
    NonBip68Final,
    /// Spends an immature coinbase output.
    PrematureCoinbaseSpend,
    /// Too many signature operations.
    TooManySigops(i64),
    /// Fee calculation errors.
    NegativeFee,
    FeeOverflow,
    /// Package bounds measured in virtual bytes.
    AncestorSizeTooLarge(i64),
    DescendantSizeTooLarge(i64),
    /// Script validation failed.
    ScriptVerification(String),
    /// Failed the context-free sanity checks.
    Sanity(String),
}

/// Pool statistics.
#[derive(Debug, Clone)]
pub struct TxPoolInfo {
    /// Number of transactions in the pool.
    pub size: usize,
    /// Total virtual size of all transactions.
    pub bytes: u64,
    /// Estimated dynamic memory usage.
    pub usage: usize,
    /// Current effective minimum fee rate in sat/kvB.
    pub min_fee_rate: u64,
}

/// Transaction pool trait for network integration.
///
/// All methods are synchronous - the caller decides whether to run them on
/// a blocking executor or inline.
pub trait TxPool: Send + Sync + 'static {
    /// Validate and potentially accept a transaction into the pool.
    fn validate_transaction(&self, tx: Transaction) -> TxValidationResult;

    /// Check if transaction is already in the pool.
    fn contains(&self, txid: &Txid) -> bool;

    /// Get transaction from the pool if present.
    fn get(&self, txid: &Txid) -> Option<Arc<Transaction>>;

    /// Get transactions that haven't been broadcast yet as (txid, fee rate)
    /// pairs.
    fn get_unbroadcast(&self) -> Vec<(Txid, u64)>;

    /// Mark transactions as broadcast to peers.
    fn mark_broadcast(&self, txids: &[Txid]);

    /// Iterate over all transaction IDs with their fee rates, sorted by
    /// mining priority.
    fn iter_txids(&self) -> Box<dyn Iterator<Item = (Txid, u64)> + Send>;

    /// Get pool statistics.
    fn info(&self) -> TxPoolInfo;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_reason_penalty() {
        let soft = RejectionReason::Soft(SoftRejection::AlreadyInMempool);
        assert!(!soft.should_penalize_peer());

        let hard = RejectionReason::Hard(HardRejection::Coinbase);
        assert!(hard.should_penalize_peer());
    }
}
