//! # Transaction memory pool
//!
//! An in-memory staging area for validated, unconfirmed transactions.
//!
//! 1. Package bookkeeping.
//!     - Every entry carries exact roll-ups over its in-pool ancestor and
//!       descendant sets (count, virtual size, fees, sigops).
//!     - The roll-ups stay exact across insertion, recursive removal,
//!       block confirmation and reorg re-entry.
//! 2. Ordering.
//!     - Five sort orders are kept live at all times: descendant score,
//!       entry time, mining score, ancestor score, and ancestor score with
//!       gas-price override for contract transactions.
//! 3. Resource control.
//!     - Dependency chains are bounded at acceptance; eviction works on
//!       whole descendant packages and feeds a decaying minimum-fee floor.

mod arena;
mod coins_view;
mod dump;
mod error;
mod inner;
mod options;
mod policy;
#[cfg(test)]
mod tests;
mod types;
mod validation;

pub use self::arena::{MemPoolArena, TxMemPoolEntry};
pub use self::coins_view::CoinsViewCache;
pub use self::dump::{LoadStats, MEMPOOL_DUMP_VERSION};
pub use self::error::MempoolError;
pub use self::inner::{MemPoolInner, ROLLING_FEE_HALFLIFE};
pub use self::options::{MemPoolLimits, MemPoolOptions, MemPoolOptionsBuilder};
pub use self::policy::{Bip125Policy, ReplacementPolicy};
pub use self::types::{
    ConflictSet, EntryId, FeeRate, LockPoints, MemPoolObserver, RemovalReason, TxMempoolInfo,
};
pub use self::validation::COINBASE_MATURITY;

use self::inner::AncestorSeed;
use self::validation::ValidationWorkspace;
use bitcoin::{OutPoint, Transaction, Txid, Wtxid};
use galena_primitives::tx_pool::{
    HardRejection, RejectionReason, SoftRejection, TxPool, TxPoolInfo, TxValidationResult,
};
use galena_primitives::{
    ChainTip, CoinView, ContractOracle, NoContracts, NoScriptChecks, ScriptCheckLevel,
    ScriptVerifier,
};
use rand::Rng;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("Time went backwards")
        .as_secs() as i64
}

/// Thread-safe transaction memory pool.
///
/// A single coarse lock guards the bookkeeping state for the full duration
/// of every operation; a second lock covers the UTXO cache. Always acquire
/// `inner` before `coins_cache`.
pub struct MemPool<T> {
    /// Configuration, immutable after creation.
    options: MemPoolOptions,

    /// Bookkeeping state.
    inner: RwLock<MemPoolInner>,

    /// UTXO cache layered over the injected chain view.
    coins_cache: RwLock<CoinsViewCache>,

    /// Bumped on every add/remove; block assembly polls it.
    transactions_updated: AtomicU32,

    /// Monotone acceptance sequence.
    sequence_number: AtomicU64,

    /// Active chain tip access.
    chain: Arc<T>,

    /// Injected script validation.
    script_verifier: Arc<dyn ScriptVerifier>,

    /// Injected replacement policy.
    replacement_policy: Arc<dyn ReplacementPolicy>,

    /// Injected contract-transaction predicate.
    contract_oracle: Arc<dyn ContractOracle>,
}

impl<T: ChainTip> MemPool<T> {
    /// Create a pool with default options, no script checks and the stock
    /// BIP125 replacement policy.
    pub fn new(chain: Arc<T>, coin_view: Arc<dyn CoinView>) -> Self {
        Self::with_options(chain, coin_view, MemPoolOptions::default())
    }

    /// Create a pool with custom options.
    pub fn with_options(chain: Arc<T>, coin_view: Arc<dyn CoinView>, options: MemPoolOptions) -> Self {
        let coins_cache = CoinsViewCache::new(coin_view, 10_000);

        Self {
            options,
            inner: RwLock::new(MemPoolInner::new()),
            coins_cache: RwLock::new(coins_cache),
            transactions_updated: AtomicU32::new(0),
            sequence_number: AtomicU64::new(1),
            chain,
            script_verifier: Arc::new(NoScriptChecks),
            replacement_policy: Arc::new(Bip125Policy),
            contract_oracle: Arc::new(NoContracts),
        }
    }

    /// Replace the injected script verifier.
    pub fn with_script_verifier(mut self, verifier: Arc<dyn ScriptVerifier>) -> Self {
        self.script_verifier = verifier;
        self
    }

    /// Replace the injected replacement policy.
    pub fn with_replacement_policy(mut self, policy: Arc<dyn ReplacementPolicy>) -> Self {
        self.replacement_policy = policy;
        self
    }

    /// Replace the injected contract oracle.
    pub fn with_contract_oracle(mut self, oracle: Arc<dyn ContractOracle>) -> Self {
        self.contract_oracle = oracle;
        self
    }

    /// Register a synchronous event sink (fee estimator, relay tracker).
    pub fn register_observer(&self, observer: Arc<dyn MemPoolObserver>) {
        self.inner
            .write()
            .expect("MemPool lock poisoned")
            .register_observer(observer);
    }

    /// Pool options.
    pub fn options(&self) -> &MemPoolOptions {
        &self.options
    }

    // --- acceptance ---

    /// Validate and accept a single transaction.
    pub fn accept_transaction(&self, tx: Transaction) -> Result<(), MempoolError> {
        self.accept_transaction_with_time(tx, unix_now(), true)
    }

    /// Validate and accept with an explicit acceptance timestamp.
    ///
    /// Dump import passes `valid_fee_estimate = false` so historical fees
    /// do not skew estimators.
    pub fn accept_transaction_with_time(
        &self,
        tx: Transaction,
        accept_time: i64,
        valid_fee_estimate: bool,
    ) -> Result<(), MempoolError> {
        // Held for the entire flow to rule out validate/commit races.
        let mut inner = self.inner.write().expect("MemPool lock poisoned");
        let mut coins = self.coins_cache.write().expect("CoinsCache lock poisoned");

        let now = unix_now();
        let tx = Arc::new(tx);
        let txid = tx.compute_txid();

        let mut ws = ValidationWorkspace::new(tx);
        validation::pre_checks(
            &mut ws,
            &mut inner,
            &mut coins,
            &self.options,
            &*self.chain,
            now,
        )?;

        if !ws.conflicts.is_empty() {
            if !self.options.enable_rbf {
                return Err(MempoolError::TxConflict(
                    "conflicts with in-pool transaction and replacement is disabled".to_string(),
                ));
            }
            let conflict_set = self.replacement_policy.may_replace(
                &ws.tx,
                ws.modified_fee,
                ws.vsize,
                &ws.conflicts,
                &inner,
                &self.options,
            )?;
            ws.conflict_set = Some(conflict_set);
        }

        let ancestors = inner.calculate_mempool_ancestors(
            AncestorSeed::Tx(&ws.tx),
            &self.options.limits.as_ancestor_limits(),
        )?;

        validation::check_inputs(&ws, &*self.script_verifier, ScriptCheckLevel::Standard)?;
        validation::check_inputs(&ws, &*self.script_verifier, ScriptCheckLevel::Mandatory)?;

        let sequence = self.sequence_number.fetch_add(1, Ordering::SeqCst);
        let gas_price = self.contract_oracle.gas_price(&ws.tx);

        let (_entry_id, _displaced) = validation::finalize_tx(
            ws,
            &mut inner,
            &mut coins,
            ancestors,
            self.chain.height(),
            accept_time,
            sequence,
            gas_price,
            valid_fee_estimate,
        );

        inner.unbroadcast.insert(txid);
        self.transactions_updated.fetch_add(1, Ordering::SeqCst);

        // Enforce the age and size caps; the new entry itself may lose.
        let (removed, no_spends) = inner.limit_mempool_size(
            self.options.max_size_bytes(),
            self.options.expiry_duration().as_secs() as i64,
            now,
            self.options.incremental_relay_feerate,
        );
        for removed_tx in &removed {
            coins.remove_mempool_tx(removed_tx);
        }
        for outpoint in &no_spends {
            coins.uncache(outpoint);
        }
        if !inner.contains_txid(&txid) {
            return Err(MempoolError::MempoolFull);
        }

        self.maybe_check(&inner, &mut coins);

        Ok(())
    }

    // --- removal ---

    /// Remove the transactions of a connected block.
    ///
    /// Confirmed entries leave without their descendants, whose ancestor
    /// roll-ups are repaired; conflicting residents leave recursively.
    pub fn remove_for_block(&self, block_txs: &[Transaction]) {
        let mut inner = self.inner.write().expect("MemPool lock poisoned");
        let mut coins = self.coins_cache.write().expect("CoinsCache lock poisoned");

        let removed = inner.remove_for_block(block_txs, unix_now());
        for tx in &removed {
            coins.remove_mempool_tx(tx);
        }
        coins.on_block_connected();

        self.transactions_updated
            .fetch_add(removed.len() as u32, Ordering::SeqCst);

        self.maybe_check(&inner, &mut coins);
    }

    /// Remove a transaction and all its in-pool descendants.
    pub fn remove_recursive(&self, tx: &Transaction, reason: RemovalReason) {
        let mut inner = self.inner.write().expect("MemPool lock poisoned");
        let mut coins = self.coins_cache.write().expect("CoinsCache lock poisoned");

        let removed = inner.remove_recursive(tx, reason);
        for removed_tx in &removed {
            coins.remove_mempool_tx(removed_tx);
        }
        self.transactions_updated
            .fetch_add(removed.len() as u32, Ordering::SeqCst);
    }

    /// Re-validate every entry against the post-reorg tip and evict what
    /// no longer holds: failed sequence locks, failed finality, and
    /// now-immature coinbase spends, each together with its descendants.
    pub fn remove_for_reorg(&self) -> usize {
        let mut inner = self.inner.write().expect("MemPool lock poisoned");
        let mut coins = self.coins_cache.write().expect("CoinsCache lock poisoned");

        let tip_height = self.chain.height();
        let tip_mtp = self.chain.median_time_past();

        let mut to_evict: Vec<Arc<Transaction>> = Vec::new();
        for (_id, entry) in inner.arena.iter() {
            let mut invalid = !validation::is_final_tx(&entry.tx, tip_height + 1, tip_mtp);

            if !invalid
                && validation::check_sequence_locks(
                    &entry.tx,
                    &entry.lock_points,
                    &mut coins,
                    &*self.chain,
                )
                .is_err()
            {
                invalid = true;
            }

            if !invalid && entry.spends_coinbase {
                for input in &entry.tx.input {
                    if inner.contains_txid(&input.previous_output.txid) {
                        continue;
                    }
                    match coins.get_coin(&input.previous_output) {
                        Some(coin) => {
                            if coin.is_coinbase
                                && tip_height.saturating_sub(coin.height) < COINBASE_MATURITY
                            {
                                invalid = true;
                                break;
                            }
                        }
                        // The funding coin vanished in the reorg.
                        None => {
                            invalid = true;
                            break;
                        }
                    }
                }
            }

            if invalid {
                to_evict.push(entry.tx.clone());
            }
        }

        let mut removed_count = 0;
        for tx in to_evict {
            let removed = inner.remove_recursive(&tx, RemovalReason::Reorg);
            for removed_tx in &removed {
                coins.remove_mempool_tx(removed_tx);
            }
            removed_count += removed.len();
        }
        coins.on_block_connected();

        self.transactions_updated
            .fetch_add(removed_count as u32, Ordering::SeqCst);

        if removed_count > 0 {
            tracing::info!(removed = removed_count, "Evicted stale entries after reorg");
        }

        removed_count
    }

    /// Repair descendant bookkeeping after bulk re-accepting the
    /// transactions of a disconnected block.
    ///
    /// `txids` must list the re-accepted transactions in topological order.
    /// Between the bulk re-accept and this call the pool is inconsistent;
    /// no traversal may run in that window, which the pool lock enforces as
    /// long as both steps happen under one caller.
    pub fn update_transactions_from_block(&self, txids: &[Txid]) {
        let mut inner = self.inner.write().expect("MemPool lock poisoned");
        inner.update_transactions_from_block(txids);
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut inner = self.inner.write().expect("MemPool lock poisoned");
        let mut coins = self.coins_cache.write().expect("CoinsCache lock poisoned");
        inner.clear(unix_now());
        coins.clear_overlay();
        self.transactions_updated.fetch_add(1, Ordering::SeqCst);
    }

    // --- resource control ---

    /// Evict worst-scored packages until dynamic usage fits `sizelimit`.
    pub fn trim_to_size(&self, sizelimit: usize) {
        let mut inner = self.inner.write().expect("MemPool lock poisoned");
        let mut coins = self.coins_cache.write().expect("CoinsCache lock poisoned");

        let mut no_spends = Vec::new();
        let removed = inner.trim_to_size(
            sizelimit,
            Some(&mut no_spends),
            self.options.incremental_relay_feerate,
        );
        for tx in &removed {
            coins.remove_mempool_tx(tx);
        }
        for outpoint in &no_spends {
            coins.uncache(outpoint);
        }
        self.transactions_updated
            .fetch_add(removed.len() as u32, Ordering::SeqCst);
    }

    /// Remove every entry older than `cutoff_time`, with descendants.
    /// Returns the number of entries removed.
    pub fn expire(&self, cutoff_time: i64) -> usize {
        let mut inner = self.inner.write().expect("MemPool lock poisoned");
        let mut coins = self.coins_cache.write().expect("CoinsCache lock poisoned");

        let (count, removed) = inner.expire(cutoff_time);
        for tx in &removed {
            coins.remove_mempool_tx(tx);
        }
        self.transactions_updated
            .fetch_add(count as u32, Ordering::SeqCst);
        count
    }

    /// Expire then trim using the configured caps.
    pub fn limit_mempool_size(&self) {
        let mut inner = self.inner.write().expect("MemPool lock poisoned");
        let mut coins = self.coins_cache.write().expect("CoinsCache lock poisoned");

        let (removed, no_spends) = inner.limit_mempool_size(
            self.options.max_size_bytes(),
            self.options.expiry_duration().as_secs() as i64,
            unix_now(),
            self.options.incremental_relay_feerate,
        );
        for tx in &removed {
            coins.remove_mempool_tx(tx);
        }
        for outpoint in &no_spends {
            coins.uncache(outpoint);
        }
        self.transactions_updated
            .fetch_add(removed.len() as u32, Ordering::SeqCst);
    }

    /// The decaying fee floor a candidate must clear, for the given size
    /// limit.
    pub fn get_min_fee(&self, sizelimit: usize) -> FeeRate {
        self.inner
            .write()
            .expect("MemPool lock poisoned")
            .get_min_fee(
                sizelimit,
                unix_now(),
                self.options.incremental_relay_feerate,
            )
    }

    // --- prioritisation ---

    /// Apply an operator fee delta for ordering; the txid need not be
    /// resident.
    pub fn prioritise_transaction(&self, txid: Txid, fee_delta: i64) {
        self.inner
            .write()
            .expect("MemPool lock poisoned")
            .prioritise_transaction(txid, fee_delta);
        self.transactions_updated.fetch_add(1, Ordering::SeqCst);
    }

    /// The accumulated delta for `txid`.
    pub fn apply_delta(&self, txid: &Txid) -> i64 {
        self.inner
            .read()
            .expect("MemPool lock poisoned")
            .apply_delta(txid)
    }

    /// Forget any delta recorded for `txid`.
    pub fn clear_prioritisation(&self, txid: &Txid) {
        self.inner
            .write()
            .expect("MemPool lock poisoned")
            .clear_prioritisation(txid);
    }

    // --- queries ---

    /// Number of transactions in the pool.
    pub fn size(&self) -> usize {
        self.inner.read().expect("MemPool lock poisoned").size()
    }

    /// Sum of all resident virtual sizes.
    pub fn total_vsize(&self) -> u64 {
        self.inner
            .read()
            .expect("MemPool lock poisoned")
            .total_vsize()
    }

    /// Sum of all resident base fees in satoshis.
    pub fn total_fees(&self) -> i64 {
        self.inner
            .read()
            .expect("MemPool lock poisoned")
            .total_fees()
    }

    /// Conservative estimate of the heap used by the pool.
    pub fn dynamic_memory_usage(&self) -> usize {
        self.inner
            .read()
            .expect("MemPool lock poisoned")
            .dynamic_memory_usage()
    }

    pub fn contains_txid(&self, txid: &Txid) -> bool {
        self.inner
            .read()
            .expect("MemPool lock poisoned")
            .contains_txid(txid)
    }

    pub fn contains_wtxid(&self, wtxid: &Wtxid) -> bool {
        self.inner
            .read()
            .expect("MemPool lock poisoned")
            .contains_wtxid(wtxid)
    }

    /// Get the transaction if resident.
    pub fn get_transaction(&self, txid: &Txid) -> Option<Arc<Transaction>> {
        self.inner
            .read()
            .expect("MemPool lock poisoned")
            .get_entry(txid)
            .map(|entry| entry.tx.clone())
    }

    /// Whether some resident transaction consumes `outpoint`.
    pub fn is_spent(&self, outpoint: &OutPoint) -> bool {
        self.inner
            .read()
            .expect("MemPool lock poisoned")
            .is_spent(outpoint)
    }

    /// Whether none of `tx`'s inputs are resident.
    pub fn has_no_inputs_of(&self, tx: &Transaction) -> bool {
        self.inner
            .read()
            .expect("MemPool lock poisoned")
            .has_no_inputs_of(tx)
    }

    /// Whether `txid`'s dependency chain stays within `chain_limit` in both
    /// directions.
    pub fn transaction_within_chain_limit(&self, txid: &Txid, chain_limit: u64) -> bool {
        self.inner
            .read()
            .expect("MemPool lock poisoned")
            .transaction_within_chain_limit(txid, chain_limit)
    }

    /// Snapshot of one entry.
    pub fn info(&self, txid: &Txid) -> Option<TxMempoolInfo> {
        self.inner.read().expect("MemPool lock poisoned").info(txid)
    }

    /// Snapshot of every entry, shallowest and best-paying first.
    pub fn info_all(&self) -> Vec<TxMempoolInfo> {
        self.inner.read().expect("MemPool lock poisoned").info_all()
    }

    /// All resident txids, shallowest and best-paying first.
    pub fn query_hashes(&self) -> Vec<Txid> {
        self.inner
            .read()
            .expect("MemPool lock poisoned")
            .query_hashes()
    }

    /// Relay ordering predicate over two txids.
    pub fn compare_depth_and_score(&self, a: &Txid, b: &Txid) -> bool {
        self.inner
            .read()
            .expect("MemPool lock poisoned")
            .compare_depth_and_score(a, b)
    }

    /// How many times the pool content changed; block assembly polls this.
    pub fn get_transactions_updated(&self) -> u32 {
        self.transactions_updated.load(Ordering::SeqCst)
    }

    pub fn add_transactions_updated(&self, n: u32) {
        self.transactions_updated.fetch_add(n, Ordering::SeqCst);
    }

    /// Transactions pending broadcast with their fee rates.
    pub fn pending_broadcast_txs(&self) -> Vec<(Txid, u64)> {
        let inner = self.inner.read().expect("MemPool lock poisoned");
        inner
            .unbroadcast
            .iter()
            .filter_map(|txid| {
                inner.get_entry(txid).map(|entry| {
                    let rate = FeeRate::from_fee_and_size(entry.modified_fee, entry.vsize());
                    (*txid, rate.to_sat_per_kvb())
                })
            })
            .collect()
    }

    /// Mark transactions as broadcast.
    pub fn mark_broadcast_txs(&self, txids: &[Txid]) {
        let mut inner = self.inner.write().expect("MemPool lock poisoned");
        for txid in txids {
            inner.unbroadcast.remove(txid);
        }
    }

    /// Resident txids with fee rates in block-template order.
    pub fn iter_txids_by_mining_score(&self) -> Vec<(Txid, u64)> {
        let inner = self.inner.read().expect("MemPool lock poisoned");
        inner
            .arena
            .iter_by_mining_score()
            .map(|(_, entry)| {
                let rate = FeeRate::from_fee_and_size(entry.modified_fee, entry.vsize());
                (entry.txid(), rate.to_sat_per_kvb())
            })
            .collect()
    }

    // --- audit & persistence ---

    /// Run the full consistency audit with the configured probability.
    pub fn check(&self) {
        let inner = self.inner.read().expect("MemPool lock poisoned");
        let mut coins = self.coins_cache.write().expect("CoinsCache lock poisoned");
        self.maybe_check(&inner, &mut coins);
    }

    fn maybe_check(&self, inner: &MemPoolInner, coins: &mut CoinsViewCache) {
        if self.options.check_frequency == 0 {
            return;
        }
        if rand::thread_rng().gen::<u32>() >= self.options.check_frequency {
            return;
        }
        inner.check(coins);
    }

    /// Serialize the pool contents.
    pub fn dump<W: Write>(&self, writer: &mut W) -> Result<(), MempoolError> {
        let inner = self.inner.read().expect("MemPool lock poisoned");
        dump::dump(&inner, writer)
    }

    /// Restore a dump by replaying every record through the acceptance
    /// path with `valid_fee_estimate = false`. Entries past the configured
    /// expiry are skipped.
    pub fn load<R: Read>(&self, reader: &mut R) -> Result<LoadStats, MempoolError> {
        let (entries, deltas) = dump::read_dump(reader)?;

        let now = unix_now();
        let expiry = self.options.expiry_duration().as_secs() as i64;
        let mut stats = LoadStats::default();

        for record in entries {
            if record.fee_delta != 0 {
                self.prioritise_transaction(record.tx.compute_txid(), record.fee_delta);
            }
            if record.time + expiry > now {
                match self.accept_transaction_with_time(record.tx, record.time, false) {
                    Ok(()) => stats.accepted += 1,
                    Err(err) => {
                        tracing::warn!(%err, "Skipping dump entry");
                        stats.failed += 1;
                    }
                }
            } else {
                stats.expired += 1;
            }
        }

        for (txid, amount) in deltas {
            self.prioritise_transaction(txid, amount);
        }

        tracing::info!(
            accepted = stats.accepted,
            failed = stats.failed,
            expired = stats.expired,
            "Imported mempool dump"
        );

        Ok(stats)
    }

    fn to_validation_result(&self, txid: Txid, result: Result<(), MempoolError>) -> TxValidationResult {
        match result {
            Ok(()) => {
                let fee_rate = self
                    .inner
                    .read()
                    .expect("MemPool lock poisoned")
                    .get_entry(&txid)
                    .map(|entry| {
                        FeeRate::from_fee_and_size(entry.fee, entry.vsize()).to_sat_per_kvb()
                    })
                    .unwrap_or(0);
                TxValidationResult::Accepted { txid, fee_rate }
            }
            Err(err) => {
                let reason = match err {
                    // Soft rejections (don't penalize peer)
                    MempoolError::AlreadyInMempool => {
                        RejectionReason::Soft(SoftRejection::AlreadyInMempool)
                    }
                    MempoolError::MissingInputs { parents } => {
                        RejectionReason::Soft(SoftRejection::MissingInputs { parents })
                    }
                    MempoolError::FeeTooLow {
                        min_kvb,
                        actual_kvb,
                    } => RejectionReason::Soft(SoftRejection::FeeTooLow {
                        min_kvb,
                        actual_kvb,
                    }),
                    MempoolError::FeeBelowMinimum {
                        floor_kvb,
                        actual_kvb,
                    } => RejectionReason::Soft(SoftRejection::FeeTooLow {
                        min_kvb: floor_kvb,
                        actual_kvb,
                    }),
                    MempoolError::MempoolFull => RejectionReason::Soft(SoftRejection::MempoolFull),
                    MempoolError::TooManyUnconfirmedAncestors(limit) => {
                        RejectionReason::Soft(SoftRejection::TooManyAncestors(limit))
                    }
                    MempoolError::TooManyDescendants(_, limit) => {
                        RejectionReason::Soft(SoftRejection::TooManyDescendants(limit))
                    }
                    MempoolError::TxConflict(msg) => {
                        RejectionReason::Soft(SoftRejection::TxConflict(msg))
                    }
                    MempoolError::SpendsConflictingOutput => RejectionReason::Soft(
                        SoftRejection::TxConflict("spends conflicting output".to_string()),
                    ),
                    MempoolError::NoConflictToReplace => {
                        RejectionReason::Soft(SoftRejection::NoConflictToReplace)
                    }
                    MempoolError::TxNotReplaceable => {
                        RejectionReason::Soft(SoftRejection::TxNotReplaceable)
                    }
                    MempoolError::TooManyReplacements(count, _) => {
                        RejectionReason::Soft(SoftRejection::TooManyReplacements(count))
                    }
                    MempoolError::NewUnconfirmedInput => {
                        RejectionReason::Soft(SoftRejection::NewUnconfirmedInput)
                    }
                    MempoolError::InsufficientFee(msg) => {
                        RejectionReason::Soft(SoftRejection::InsufficientFee(msg))
                    }

                    // Hard rejections (penalize peer)
                    MempoolError::Coinbase => RejectionReason::Hard(HardRejection::Coinbase),
                    MempoolError::NonFinal => RejectionReason::Hard(HardRejection::NonFinal),
                    MempoolError::NonBip68Final => {
                        RejectionReason::Hard(HardRejection::NonBip68Final)
                    }
                    MempoolError::PrematureCoinbaseSpend => {
                        RejectionReason::Hard(HardRejection::PrematureCoinbaseSpend)
                    }
                    MempoolError::TooManySigops(count) => {
                        RejectionReason::Hard(HardRejection::TooManySigops(count))
                    }
                    MempoolError::NegativeFee => RejectionReason::Hard(HardRejection::NegativeFee),
                    MempoolError::FeeOverflow => RejectionReason::Hard(HardRejection::FeeOverflow),
                    MempoolError::AncestorSizeTooLarge(limit) => {
                        RejectionReason::Hard(HardRejection::AncestorSizeTooLarge(limit))
                    }
                    MempoolError::DescendantSizeTooLarge(_, limit) => {
                        RejectionReason::Hard(HardRejection::DescendantSizeTooLarge(limit))
                    }
                    MempoolError::ScriptVerification(msg) => {
                        RejectionReason::Hard(HardRejection::ScriptVerification(msg))
                    }
                    MempoolError::Sanity(err) => {
                        RejectionReason::Hard(HardRejection::Sanity(err.to_string()))
                    }
                    // Not produced by the acceptance path.
                    MempoolError::BadDumpFormat(msg) => {
                        RejectionReason::Hard(HardRejection::Sanity(msg))
                    }
                    MempoolError::Io(err) => {
                        RejectionReason::Hard(HardRejection::Sanity(err.to_string()))
                    }
                };

                TxValidationResult::Rejected { txid, reason }
            }
        }
    }
}

impl<T: ChainTip + 'static> TxPool for MemPool<T> {
    fn validate_transaction(&self, tx: Transaction) -> TxValidationResult {
        let txid = tx.compute_txid();
        let result = self.accept_transaction(tx);
        self.to_validation_result(txid, result)
    }

    fn contains(&self, txid: &Txid) -> bool {
        self.contains_txid(txid)
    }

    fn get(&self, txid: &Txid) -> Option<Arc<Transaction>> {
        self.get_transaction(txid)
    }

    fn get_unbroadcast(&self) -> Vec<(Txid, u64)> {
        self.pending_broadcast_txs()
    }

    fn mark_broadcast(&self, txids: &[Txid]) {
        self.mark_broadcast_txs(txids)
    }

    fn iter_txids(&self) -> Box<dyn Iterator<Item = (Txid, u64)> + Send> {
        Box::new(self.iter_txids_by_mining_score().into_iter())
    }

    fn info(&self) -> TxPoolInfo {
        let inner = self.inner.read().expect("MemPool lock poisoned");
        TxPoolInfo {
            size: inner.size(),
            bytes: inner.total_vsize(),
            usage: inner.dynamic_memory_usage(),
            min_fee_rate: self.options.min_relay_feerate.to_sat_per_kvb(),
        }
    }
}
