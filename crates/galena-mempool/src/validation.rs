//! Acceptance pipeline for single transactions.
//!
//! Staged like the classic accept-to-memory-pool flow:
//! 1. `pre_checks` - sanity, duplicates, input availability, fees, lock
//!    points
//! 2. replacement policy (when conflicts exist)
//! 3. chain-limit enforcement via the bounded ancestor walk
//! 4. script verification through the injected verifier
//! 5. `finalize_tx` - displace conflicts and commit the entry

use crate::arena::TxMemPoolEntry;
use crate::coins_view::CoinsViewCache;
use crate::error::MempoolError;
use crate::inner::MemPoolInner;
use crate::options::MemPoolOptions;
use crate::types::{ConflictSet, EntryId, FeeRate, LockPoints};
use bitcoin::absolute::{LOCK_TIME_THRESHOLD, LockTime};
use bitcoin::{Amount, OutPoint, Transaction, TxOut, Txid};
use galena_primitives::consensus::check_transaction_sanity;
use galena_primitives::{ChainTip, ScriptCheckLevel, ScriptVerifier};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Maximum sigop cost accepted for a single transaction.
const MAX_TX_SIGOPS_COST: i64 = 80_000;

/// Depth a coinbase output must reach before it may be spent.
pub const COINBASE_MATURITY: u32 = 100;

// BIP68 sequence field encoding.
const SEQUENCE_LOCKTIME_DISABLE_FLAG: u32 = 1 << 31;
const SEQUENCE_LOCKTIME_TYPE_FLAG: u32 = 1 << 22;
const SEQUENCE_LOCKTIME_MASK: u32 = 0x0000_ffff;
const SEQUENCE_LOCKTIME_GRANULARITY: i64 = 512;

/// Workspace carrying intermediate state through the acceptance stages.
pub struct ValidationWorkspace {
    /// Transaction being validated.
    pub tx: Arc<Transaction>,

    /// Base fee in satoshis.
    pub base_fee: i64,

    /// Fee used for ordering, base fee plus any recorded priority delta.
    pub modified_fee: i64,

    /// Virtual size in bytes.
    pub vsize: i64,

    /// Signature operation cost.
    pub sigop_cost: i64,

    /// Cached BIP68 evaluation.
    pub lock_points: LockPoints,

    /// Whether any input spends a coinbase output.
    pub spends_coinbase: bool,

    /// Outputs spent by this transaction, collected during `pre_checks`.
    pub spent_outputs: HashMap<OutPoint, TxOut>,

    /// Resident transactions spending the same outpoints.
    pub conflicts: HashSet<Txid>,

    /// Populated by the replacement policy when the conflicts may be
    /// displaced.
    pub conflict_set: Option<ConflictSet>,
}

impl ValidationWorkspace {
    pub fn new(tx: Arc<Transaction>) -> Self {
        let vsize = tx.weight().to_vbytes_ceil() as i64;
        Self {
            tx,
            base_fee: 0,
            modified_fee: 0,
            vsize,
            sigop_cost: 0,
            lock_points: LockPoints::default(),
            spends_coinbase: false,
            spent_outputs: HashMap::new(),
            conflicts: HashSet::new(),
            conflict_set: None,
        }
    }
}

/// Stage 1: everything cheap enough to run before scripts.
#[allow(clippy::too_many_arguments)]
pub fn pre_checks(
    ws: &mut ValidationWorkspace,
    inner: &mut MemPoolInner,
    coins: &mut CoinsViewCache,
    options: &MemPoolOptions,
    chain: &dyn ChainTip,
    now: i64,
) -> Result<(), MempoolError> {
    let tx = ws.tx.clone();

    check_transaction_sanity(&tx)?;

    // A coinbase is only valid inside a block.
    if tx.is_coinbase() {
        return Err(MempoolError::Coinbase);
    }

    let txid = tx.compute_txid();
    if inner.contains_wtxid(&tx.compute_wtxid()) || inner.contains_txid(&txid) {
        return Err(MempoolError::AlreadyInMempool);
    }

    // Conflict discovery; whether the conflicts may be displaced is the
    // replacement policy's call, made by the caller.
    for input in &tx.input {
        if let Some(conflicting) = inner.get_conflict_tx(&input.previous_output) {
            ws.conflicts.insert(conflicting);
        }
    }

    let outpoints: Vec<OutPoint> = tx.input.iter().map(|txin| txin.previous_output).collect();
    coins.ensure_coins(&outpoints);

    let mut missing = Vec::new();
    for outpoint in &outpoints {
        if !coins.have_coin(outpoint) {
            missing.push(outpoint.txid);
        }
    }
    if !missing.is_empty() {
        missing.sort();
        missing.dedup();
        return Err(MempoolError::MissingInputs { parents: missing });
    }

    let tip_height = chain.height();
    let mut input_value = Amount::ZERO;
    let mut spends_coinbase = false;

    for outpoint in &outpoints {
        let coin = coins
            .get_coin(outpoint)
            .ok_or_else(|| MempoolError::MissingInputs {
                parents: vec![outpoint.txid],
            })?;

        input_value = input_value
            .checked_add(coin.output.value)
            .ok_or(MempoolError::FeeOverflow)?;

        if coin.is_coinbase {
            spends_coinbase = true;
            if tip_height.saturating_sub(coin.height) < COINBASE_MATURITY {
                return Err(MempoolError::PrematureCoinbaseSpend);
            }
        }

        ws.spent_outputs.insert(*outpoint, coin.output);
    }

    let output_value: Amount = tx.output.iter().map(|txout| txout.value).sum();
    if input_value < output_value {
        return Err(MempoolError::NegativeFee);
    }
    let base_fee = (input_value - output_value).to_sat() as i64;
    let modified_fee = base_fee + inner.apply_delta(&txid);

    // Static relay floor first, then the rolling floor driven by recent
    // evictions.
    let min_fee = options.min_relay_feerate.fee_for(ws.vsize);
    if modified_fee < min_fee {
        return Err(MempoolError::FeeTooLow {
            min_kvb: options.min_relay_feerate.to_sat_per_kvb(),
            actual_kvb: FeeRate::from_fee_and_size(modified_fee, ws.vsize).to_sat_per_kvb(),
        });
    }

    let floor = inner.get_min_fee(
        options.max_size_bytes(),
        now,
        options.incremental_relay_feerate,
    );
    if modified_fee < floor.fee_for(ws.vsize) {
        return Err(MempoolError::FeeBelowMinimum {
            floor_kvb: floor.to_sat_per_kvb(),
            actual_kvb: FeeRate::from_fee_and_size(modified_fee, ws.vsize).to_sat_per_kvb(),
        });
    }

    // nLockTime finality against the next block.
    if !is_final_tx(&tx, tip_height + 1, chain.median_time_past()) {
        return Err(MempoolError::NonFinal);
    }

    let sigop_cost = tx.total_sigop_cost(|outpoint| ws.spent_outputs.get(outpoint).cloned()) as i64;
    if sigop_cost > MAX_TX_SIGOPS_COST {
        return Err(MempoolError::TooManySigops(sigop_cost));
    }

    // BIP68 sequence locks, cached for reorg-time re-evaluation.
    let lock_points = calculate_lock_points(&tx, coins, chain)?;
    if !evaluate_lock_points(&lock_points, tip_height, chain.median_time_past()) {
        return Err(MempoolError::NonBip68Final);
    }

    ws.base_fee = base_fee;
    ws.modified_fee = modified_fee;
    ws.spends_coinbase = spends_coinbase;
    ws.sigop_cost = sigop_cost;
    ws.lock_points = lock_points;

    Ok(())
}

/// Stage 4: per-input script verification at the given level.
pub fn check_inputs(
    ws: &ValidationWorkspace,
    verifier: &dyn ScriptVerifier,
    level: ScriptCheckLevel,
) -> Result<(), MempoolError> {
    for (input_index, txin) in ws.tx.input.iter().enumerate() {
        let spent_output = ws
            .spent_outputs
            .get(&txin.previous_output)
            .ok_or_else(|| MempoolError::MissingInputs {
                parents: vec![txin.previous_output.txid],
            })?;

        verifier
            .verify_input(&ws.tx, input_index, spent_output, level)
            .map_err(|reason| {
                MempoolError::ScriptVerification(format!("input {input_index}: {reason}"))
            })?;
    }

    Ok(())
}

/// Stage 5: displace any replacement conflicts and commit the entry.
///
/// Returns the transactions removed by the replacement so the caller can
/// retract their overlay coins; their removal events fire before the add
/// event.
#[allow(clippy::too_many_arguments)]
pub fn finalize_tx(
    ws: ValidationWorkspace,
    inner: &mut MemPoolInner,
    coins: &mut CoinsViewCache,
    ancestors: HashSet<EntryId>,
    entry_height: u32,
    entry_time: i64,
    entry_sequence: u64,
    gas_price: Option<u64>,
    valid_fee_estimate: bool,
) -> (EntryId, Vec<Arc<Transaction>>) {
    let mut displaced = Vec::new();
    if let Some(conflict_set) = &ws.conflict_set {
        displaced = inner.remove_staged(
            &conflict_set.all_conflicts,
            false,
            crate::types::RemovalReason::Replaced,
        );
        for removed in &displaced {
            coins.remove_mempool_tx(removed);
        }
    }

    let entry = TxMemPoolEntry::new(
        ws.tx.clone(),
        ws.base_fee,
        entry_time,
        entry_height,
        entry_sequence,
        ws.spends_coinbase,
        ws.sigop_cost,
        ws.lock_points,
        gas_price,
    );

    let id = inner.add_unchecked_with_ancestors(entry, ancestors, valid_fee_estimate);
    coins.add_mempool_coins(&ws.tx);

    (id, displaced)
}

/// Whether the transaction is final at the given height and time.
pub fn is_final_tx(tx: &Transaction, height: u32, block_time: i64) -> bool {
    if tx.lock_time == LockTime::ZERO {
        return true;
    }

    let lock_time = tx.lock_time.to_consensus_u32() as i64;
    let limit = if (lock_time as u32) < LOCK_TIME_THRESHOLD {
        height as i64
    } else {
        block_time
    };

    if lock_time < limit {
        return true;
    }

    tx.input.iter().all(|txin| txin.sequence.is_final())
}

/// Compute BIP68 lock points for `tx` against the current view.
///
/// Inputs funded by in-pool transactions count as confirming in the next
/// block. Fails when a coinbase input does not carry the disable flag, as
/// BIP68 requires.
pub fn calculate_lock_points(
    tx: &Transaction,
    coins: &mut CoinsViewCache,
    chain: &dyn ChainTip,
) -> Result<LockPoints, MempoolError> {
    let tip_height = chain.height();
    let tip_mtp = chain.median_time_past();

    let mut lock_height: i32 = -1;
    let mut lock_time: i64 = 0;
    let mut max_input_height: u32 = 0;

    for input in &tx.input {
        let coin = coins
            .get_coin(&input.previous_output)
            .ok_or_else(|| MempoolError::MissingInputs {
                parents: vec![input.previous_output.txid],
            })?;

        let sequence = input.sequence.0;

        if coin.is_coinbase && (sequence & SEQUENCE_LOCKTIME_DISABLE_FLAG) == 0 {
            return Err(MempoolError::NonBip68Final);
        }

        if (sequence & SEQUENCE_LOCKTIME_DISABLE_FLAG) != 0 {
            continue;
        }

        // Unconfirmed inputs confirm no earlier than the next block.
        let (coin_height, coin_mtp) = if coin.is_mempool_coin() {
            (tip_height + 1, tip_mtp)
        } else {
            (coin.height, coin.median_time_past)
        };

        if !coin.is_mempool_coin() && coin_height > max_input_height {
            max_input_height = coin_height;
        }

        let masked = sequence & SEQUENCE_LOCKTIME_MASK;

        if (sequence & SEQUENCE_LOCKTIME_TYPE_FLAG) == 0 {
            let coin_lock_height = coin_height
                .checked_add(masked)
                .and_then(|h| h.checked_add(1))
                .ok_or(MempoolError::NonBip68Final)?;
            lock_height = lock_height.max(coin_lock_height as i32);
        } else {
            let offset = (masked as i64)
                .checked_mul(SEQUENCE_LOCKTIME_GRANULARITY)
                .ok_or(MempoolError::NonBip68Final)?;
            let coin_lock_time = coin_mtp
                .checked_add(offset)
                .ok_or(MempoolError::NonBip68Final)?;
            lock_time = lock_time.max(coin_lock_time);
        }
    }

    Ok(LockPoints {
        height: lock_height,
        time: lock_time,
        max_input_block: chain.block_hash_at(max_input_height),
    })
}

/// Whether the cached lock points still describe the transaction's inputs:
/// they do as long as the tagged block stays on the active chain.
pub fn lock_points_valid(lock_points: &LockPoints, chain: &dyn ChainTip) -> bool {
    match lock_points.max_input_block {
        Some(hash) => chain.is_on_active_chain(hash),
        None => true,
    }
}

/// Whether the locks encoded in `lock_points` have passed at the tip.
pub fn evaluate_lock_points(lock_points: &LockPoints, tip_height: u32, tip_mtp: i64) -> bool {
    if lock_points.height > 0 && (tip_height as i32) < lock_points.height {
        return false;
    }
    if lock_points.time > 0 && tip_mtp < lock_points.time {
        return false;
    }
    true
}

/// Re-evaluate a transaction's sequence locks at the current tip, reusing
/// the cached lock points while they remain valid.
pub fn check_sequence_locks(
    tx: &Transaction,
    cached: &LockPoints,
    coins: &mut CoinsViewCache,
    chain: &dyn ChainTip,
) -> Result<LockPoints, MempoolError> {
    let lock_points = if lock_points_valid(cached, chain) {
        cached.clone()
    } else {
        calculate_lock_points(tx, coins, chain)?
    };

    if evaluate_lock_points(&lock_points, chain.height(), chain.median_time_past()) {
        Ok(lock_points)
    } else {
        Err(MempoolError::NonBip68Final)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use bitcoin::{BlockHash, ScriptBuf, Sequence, TxIn, Witness, absolute, transaction};
    use galena_primitives::{CoinView, PoolCoin};
    use std::collections::HashMap;
    use std::sync::RwLock;

    struct MapView(RwLock<HashMap<OutPoint, PoolCoin>>);

    impl CoinView for MapView {
        fn get_coin(&self, outpoint: &OutPoint) -> Option<PoolCoin> {
            self.0.read().unwrap().get(outpoint).cloned()
        }
    }

    struct FixedTip {
        height: u32,
        mtp: i64,
    }

    impl ChainTip for FixedTip {
        fn height(&self) -> u32 {
            self.height
        }
        fn tip_hash(&self) -> BlockHash {
            BlockHash::all_zeros()
        }
        fn median_time_past(&self) -> i64 {
            self.mtp
        }
        fn is_on_active_chain(&self, _hash: BlockHash) -> bool {
            true
        }
        fn block_hash_at(&self, height: u32) -> Option<BlockHash> {
            (height <= self.height).then(|| BlockHash::from_byte_array([height as u8; 32]))
        }
    }

    fn coin(height: u32, mtp: i64, is_coinbase: bool) -> PoolCoin {
        PoolCoin {
            output: TxOut {
                value: Amount::from_sat(100_000),
                script_pubkey: ScriptBuf::new(),
            },
            height,
            is_coinbase,
            median_time_past: mtp,
        }
    }

    fn tx_with_sequence(sequence: u32) -> Transaction {
        Transaction {
            version: transaction::Version::TWO,
            lock_time: absolute::LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint {
                    txid: Txid::from_byte_array([3u8; 32]),
                    vout: 0,
                },
                script_sig: ScriptBuf::new(),
                sequence: Sequence(sequence),
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(50_000),
                script_pubkey: ScriptBuf::new(),
            }],
        }
    }

    fn view_with_coin(c: PoolCoin) -> CoinsViewCache {
        let outpoint = OutPoint {
            txid: Txid::from_byte_array([3u8; 32]),
            vout: 0,
        };
        let view = Arc::new(MapView(RwLock::new(HashMap::from([(outpoint, c)]))));
        CoinsViewCache::new(view, 16)
    }

    #[test]
    fn height_based_relative_lock() {
        let chain = FixedTip {
            height: 100,
            mtp: 1_000_000,
        };
        let mut coins = view_with_coin(coin(50, 500_000, false));
        let tx = tx_with_sequence(10);

        let lp = calculate_lock_points(&tx, &mut coins, &chain).unwrap();
        // 50 + 10 + 1
        assert_eq!(lp.height, 61);
        assert_eq!(lp.time, 0);
        assert!(evaluate_lock_points(&lp, 100, 1_000_000));
        assert!(!evaluate_lock_points(&lp, 60, 1_000_000));
    }

    #[test]
    fn time_based_relative_lock() {
        let chain = FixedTip {
            height: 100,
            mtp: 1_000_000,
        };
        let mut coins = view_with_coin(coin(50, 500_000, false));
        let tx = tx_with_sequence(10 | SEQUENCE_LOCKTIME_TYPE_FLAG);

        let lp = calculate_lock_points(&tx, &mut coins, &chain).unwrap();
        assert_eq!(lp.height, -1);
        // 500_000 + 10 * 512
        assert_eq!(lp.time, 505_120);
        assert!(evaluate_lock_points(&lp, 100, 505_120));
        assert!(!evaluate_lock_points(&lp, 100, 505_119));
    }

    #[test]
    fn disabled_sequence_contributes_no_locks() {
        let chain = FixedTip {
            height: 100,
            mtp: 1_000_000,
        };
        let mut coins = view_with_coin(coin(50, 500_000, false));
        let tx = tx_with_sequence(10 | SEQUENCE_LOCKTIME_DISABLE_FLAG);

        let lp = calculate_lock_points(&tx, &mut coins, &chain).unwrap();
        assert_eq!(lp.height, -1);
        assert_eq!(lp.time, 0);
    }

    #[test]
    fn coinbase_input_requires_disable_flag() {
        let chain = FixedTip {
            height: 200,
            mtp: 1_000_000,
        };
        let mut coins = view_with_coin(coin(50, 500_000, true));

        let result = calculate_lock_points(&tx_with_sequence(10), &mut coins, &chain);
        assert!(matches!(result, Err(MempoolError::NonBip68Final)));

        let mut coins = view_with_coin(coin(50, 500_000, true));
        let result = calculate_lock_points(
            &tx_with_sequence(SEQUENCE_LOCKTIME_DISABLE_FLAG),
            &mut coins,
            &chain,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn final_tx_rules() {
        let mut tx = tx_with_sequence(Sequence::MAX.0);
        assert!(is_final_tx(&tx, 100, 0));

        // Height lock below the evaluation height passes.
        tx.lock_time = absolute::LockTime::from_consensus(99);
        assert!(is_final_tx(&tx, 100, 0));

        // Height lock at the evaluation height fails unless every input is
        // final.
        tx.lock_time = absolute::LockTime::from_consensus(100);
        assert!(is_final_tx(&tx, 100, 0));
        tx.input[0].sequence = Sequence(5);
        assert!(!is_final_tx(&tx, 100, 0));
    }
}
