//! Primitives shared between the galena memory pool and the node layers
//! that drive it.
//!
//! The memory pool never talks to the chain database or the script engine
//! directly. Everything it needs from the outside world is expressed as a
//! trait in this crate: [`ChainTip`] for the active tip, [`CoinView`] for
//! UTXO lookups, [`ScriptVerifier`] for input script validation and
//! [`ContractOracle`] for the contract-transaction predicate used by the
//! gas-price mining order.

pub mod consensus;
pub mod tx_pool;

use bitcoin::{BlockHash, OutPoint, Transaction, TxOut, Weight};

/// The maximum allowed weight for a block, see BIP 141.
pub const MAX_BLOCK_WEIGHT: Weight = Weight::MAX_BLOCK;

/// Fake height used to mark coins created by in-pool transactions.
///
/// Chosen so that any real confirmation height sorts below it.
pub const MEMPOOL_HEIGHT: u32 = 0x7FFF_FFFF;

/// A spendable output together with the metadata the pool needs for
/// maturity and sequence-lock evaluation.
#[derive(Debug, Clone)]
pub struct PoolCoin {
    /// The output itself.
    pub output: TxOut,
    /// Height of the block that created the output ([`MEMPOOL_HEIGHT`] for
    /// unconfirmed coins).
    pub height: u32,
    /// Whether the output was created by a coinbase transaction.
    pub is_coinbase: bool,
    /// Median time past of the creating block, used by BIP68.
    pub median_time_past: i64,
}

impl PoolCoin {
    /// Whether the coin was created by an in-pool transaction.
    pub fn is_mempool_coin(&self) -> bool {
        self.height == MEMPOOL_HEIGHT
    }
}

/// Read access to the active chain tip.
pub trait ChainTip: Send + Sync {
    /// Height of the best block.
    fn height(&self) -> u32;

    /// Hash of the best block.
    fn tip_hash(&self) -> BlockHash;

    /// Median time past of the best block.
    fn median_time_past(&self) -> i64;

    /// Whether the given block is part of the active chain.
    fn is_on_active_chain(&self, hash: BlockHash) -> bool;

    /// Hash of the active-chain block at `height`, if within range.
    fn block_hash_at(&self, height: u32) -> Option<BlockHash>;
}

/// Read access to the confirmed UTXO set.
pub trait CoinView: Send + Sync {
    /// Returns the coin for `outpoint` if it is unspent in this view.
    fn get_coin(&self, outpoint: &OutPoint) -> Option<PoolCoin>;
}

/// Which rule set to verify an input script against.
///
/// Standard checks are a superset of the mandatory consensus checks; both
/// passes run during acceptance so that a policy failure can be told apart
/// from a consensus failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptCheckLevel {
    /// Relay policy flags.
    Standard,
    /// Mandatory consensus flags.
    Mandatory,
}

/// Script validation, injected by the node.
///
/// The pool calls this once per input after all cheaper checks have passed.
pub trait ScriptVerifier: Send + Sync {
    /// Verify the script of `tx.input[input_index]` against the output it
    /// spends. Returns a human-readable reason on failure.
    fn verify_input(
        &self,
        tx: &Transaction,
        input_index: usize,
        spent_output: &TxOut,
        level: ScriptCheckLevel,
    ) -> Result<(), String>;
}

/// A [`ScriptVerifier`] that accepts every script.
///
/// Used by tests and by setups where scripts were already validated
/// upstream.
#[derive(Debug, Default, Clone)]
pub struct NoScriptChecks;

impl ScriptVerifier for NoScriptChecks {
    fn verify_input(
        &self,
        _tx: &Transaction,
        _input_index: usize,
        _spent_output: &TxOut,
        _level: ScriptCheckLevel,
    ) -> Result<(), String> {
        Ok(())
    }
}

/// Contract-layer integration point.
///
/// Contract-creation and contract-call transactions are ranked by their
/// declared gas price in one of the mining orders. The pool does not parse
/// contract payloads itself; the node supplies the predicate and the
/// already-reconciled price (comparable to sat/kvB).
pub trait ContractOracle: Send + Sync {
    /// Returns the declared gas price when `tx` is a contract transaction,
    /// `None` otherwise.
    fn gas_price(&self, tx: &Transaction) -> Option<u64>;
}

/// An oracle for chains without a contract layer.
#[derive(Debug, Default, Clone)]
pub struct NoContracts;

impl ContractOracle for NoContracts {
    fn gas_price(&self, _tx: &Transaction) -> Option<u64> {
        None
    }
}
