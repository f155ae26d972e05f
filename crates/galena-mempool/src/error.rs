use bitcoin::Txid;

/// Errors surfaced to the caller of the acceptance entry points.
///
/// Internal inconsistencies (an aggregate unfold going negative, a missing
/// edge during removal) are bugs, not policy outcomes; those abort the
/// process instead of appearing here.
#[derive(Debug, thiserror::Error)]
pub enum MempoolError {
    #[error("Transaction already in mempool")]
    AlreadyInMempool,

    #[error("Coinbase transaction not allowed")]
    Coinbase,

    #[error("Missing inputs: {parents:?}")]
    MissingInputs { parents: Vec<Txid> },

    #[error("Fee rate {actual_kvb} sat/kvB below minimum relay fee rate {min_kvb} sat/kvB")]
    FeeTooLow { min_kvb: u64, actual_kvb: u64 },

    #[error("Fee rate {actual_kvb} sat/kvB below rolling mempool minimum {floor_kvb} sat/kvB")]
    FeeBelowMinimum { floor_kvb: u64, actual_kvb: u64 },

    #[error("too many unconfirmed ancestors [limit: {0}]")]
    TooManyUnconfirmedAncestors(u64),

    #[error("exceeds ancestor size limit [limit: {0}]")]
    AncestorSizeTooLarge(i64),

    #[error("too many descendants for mempool transaction {0} [limit: {1}]")]
    TooManyDescendants(Txid, u64),

    #[error("exceeds descendant size limit for mempool transaction {0} [limit: {1}]")]
    DescendantSizeTooLarge(Txid, i64),

    #[error("Non-final transaction")]
    NonFinal,

    #[error("Non-BIP68-final transaction")]
    NonBip68Final,

    #[error("Spends immature coinbase output")]
    PrematureCoinbaseSpend,

    #[error("Too many sigops: {0}")]
    TooManySigops(i64),

    #[error("Negative fee")]
    NegativeFee,

    #[error("Overflow in fee calculation")]
    FeeOverflow,

    #[error("Mempool is full")]
    MempoolFull,

    #[error("Transaction conflicts with mempool: {0}")]
    TxConflict(String),

    #[error("No conflicting transaction to replace")]
    NoConflictToReplace,

    #[error("Conflicting transaction does not signal replaceability")]
    TxNotReplaceable,

    #[error("Too many transactions to replace: {0} (max {1})")]
    TooManyReplacements(usize, usize),

    #[error("Replacement introduces new unconfirmed inputs")]
    NewUnconfirmedInput,

    #[error("Replacement spends an output of a conflicting transaction")]
    SpendsConflictingOutput,

    #[error("Insufficient replacement fee: {0}")]
    InsufficientFee(String),

    #[error("Script verification failed: {0}")]
    ScriptVerification(String),

    #[error("Bad dump format: {0}")]
    BadDumpFormat(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Sanity(#[from] galena_primitives::consensus::TxError),
}
