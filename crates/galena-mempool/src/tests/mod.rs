//! Integration tests for pool bookkeeping, eviction, replacement and
//! reorg reconciliation.

use crate::types::{MemPoolObserver, RemovalReason};
use crate::{MemPool, MemPoolOptions};
use bitcoin::hashes::Hash;
use bitcoin::{
    Amount, BlockHash, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
    absolute, transaction,
};
use galena_primitives::{ChainTip, CoinView, ContractOracle, PoolCoin};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

mod pool_tests;

/// Minimal chain tip with adjustable height and a configurable set of
/// detached blocks.
pub struct MockChain {
    height: RwLock<u32>,
    mtp: RwLock<i64>,
    detached: RwLock<HashSet<BlockHash>>,
}

impl MockChain {
    pub fn new(height: u32, mtp: i64) -> Self {
        Self {
            height: RwLock::new(height),
            mtp: RwLock::new(mtp),
            detached: RwLock::new(HashSet::new()),
        }
    }

    pub fn set_height(&self, height: u32) {
        *self.height.write().unwrap() = height;
    }

    pub fn set_mtp(&self, mtp: i64) {
        *self.mtp.write().unwrap() = mtp;
    }

    pub fn detach(&self, hash: BlockHash) {
        self.detached.write().unwrap().insert(hash);
    }
}

impl ChainTip for MockChain {
    fn height(&self) -> u32 {
        *self.height.read().unwrap()
    }

    fn tip_hash(&self) -> BlockHash {
        self.block_hash_at(self.height()).unwrap_or_else(BlockHash::all_zeros)
    }

    fn median_time_past(&self) -> i64 {
        *self.mtp.read().unwrap()
    }

    fn is_on_active_chain(&self, hash: BlockHash) -> bool {
        !self.detached.read().unwrap().contains(&hash)
    }

    fn block_hash_at(&self, height: u32) -> Option<BlockHash> {
        if height > self.height() {
            return None;
        }
        let mut bytes = [0xaau8; 32];
        bytes[0..4].copy_from_slice(&height.to_le_bytes());
        Some(BlockHash::from_byte_array(bytes))
    }
}

/// Deterministic UTXO set for tests.
#[derive(Default)]
pub struct MockCoinView {
    utxos: RwLock<HashMap<OutPoint, PoolCoin>>,
}

impl MockCoinView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_utxo(&self, outpoint: OutPoint, coin: PoolCoin) {
        self.utxos.write().unwrap().insert(outpoint, coin);
    }

    pub fn remove_utxo(&self, outpoint: &OutPoint) {
        self.utxos.write().unwrap().remove(outpoint);
    }
}

impl CoinView for MockCoinView {
    fn get_coin(&self, outpoint: &OutPoint) -> Option<PoolCoin> {
        self.utxos.read().unwrap().get(outpoint).cloned()
    }
}

/// Contract oracle mapping specific txids to declared gas prices.
#[derive(Default)]
pub struct MockOracle {
    prices: RwLock<HashMap<Txid, u64>>,
}

impl MockOracle {
    pub fn set_gas_price(&self, txid: Txid, price: u64) {
        self.prices.write().unwrap().insert(txid, price);
    }
}

impl ContractOracle for MockOracle {
    fn gas_price(&self, tx: &Transaction) -> Option<u64> {
        self.prices.read().unwrap().get(&tx.compute_txid()).copied()
    }
}

/// Event recorder for observer-order assertions.
#[derive(Default)]
pub struct RecordingObserver {
    pub events: Mutex<Vec<(Txid, String)>>,
}

impl MemPoolObserver for RecordingObserver {
    fn entry_added(&self, tx: &Arc<Transaction>, valid_fee_estimate: bool) {
        self.events
            .lock()
            .unwrap()
            .push((tx.compute_txid(), format!("added:{valid_fee_estimate}")));
    }

    fn entry_removed(&self, tx: &Arc<Transaction>, reason: RemovalReason) {
        self.events
            .lock()
            .unwrap()
            .push((tx.compute_txid(), format!("removed:{}", reason.as_str())));
    }
}

/// Fluent transaction builder.
pub struct TxBuilder {
    inputs: Vec<TxIn>,
    outputs: Vec<TxOut>,
}

impl TxBuilder {
    pub fn new() -> Self {
        Self {
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn input(mut self, outpoint: OutPoint, sequence: u32) -> Self {
        self.inputs.push(TxIn {
            previous_output: outpoint,
            script_sig: ScriptBuf::default(),
            sequence: Sequence(sequence),
            witness: Witness::default(),
        });
        self
    }

    pub fn output(mut self, value: u64) -> Self {
        self.outputs.push(TxOut {
            value: Amount::from_sat(value),
            script_pubkey: dummy_script(),
        });
        self
    }

    pub fn build(self) -> Transaction {
        Transaction {
            version: transaction::Version::TWO,
            lock_time: absolute::LockTime::ZERO,
            input: self.inputs,
            output: self.outputs,
        }
    }
}

impl Default for TxBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A fixed pay-to-pubkey-hash script for all test outputs.
pub fn dummy_script() -> ScriptBuf {
    ScriptBuf::from_hex("76a914000000000000000000000000000000000000000088ac").unwrap()
}

pub fn create_coin(value: u64, height: u32, is_coinbase: bool) -> PoolCoin {
    PoolCoin {
        output: TxOut {
            value: Amount::from_sat(value),
            script_pubkey: dummy_script(),
        },
        height,
        is_coinbase,
        median_time_past: 0,
    }
}

/// Register a fresh confirmed UTXO worth `value` and return its outpoint.
pub fn fund(view: &MockCoinView, seed: u8, value: u64) -> OutPoint {
    let outpoint = OutPoint {
        txid: Txid::from_byte_array([seed; 32]),
        vout: 0,
    };
    view.add_utxo(outpoint, create_coin(value, 1, false));
    outpoint
}

pub struct TestPool {
    pub chain: Arc<MockChain>,
    pub view: Arc<MockCoinView>,
    pub pool: MemPool<MockChain>,
}

/// A pool over a 200-block mock chain with a zero relay floor, so tests
/// control fees freely.
pub fn setup() -> TestPool {
    setup_with_options(
        MemPoolOptions::builder()
            .min_relay_feerate(0)
            .build(),
    )
}

pub fn setup_with_options(options: MemPoolOptions) -> TestPool {
    let chain = Arc::new(MockChain::new(200, 2_000_000_000));
    let view = Arc::new(MockCoinView::new());
    let pool = MemPool::with_options(chain.clone(), view.clone(), options);
    TestPool { chain, view, pool }
}

/// Chain a spend of `outpoint`, leaving `fee` satoshis on the table.
pub fn spend(outpoint: OutPoint, input_value: u64, fee: u64) -> Transaction {
    TxBuilder::new()
        .input(outpoint, 0xffff_fffd)
        .output(input_value - fee)
        .build()
}

pub fn assert_in_mempool(pool: &MemPool<MockChain>, txid: &Txid) {
    assert!(
        pool.contains_txid(txid),
        "Expected transaction {txid} to be in mempool"
    );
}

pub fn assert_not_in_mempool(pool: &MemPool<MockChain>, txid: &Txid) {
    assert!(
        !pool.contains_txid(txid),
        "Expected transaction {txid} to NOT be in mempool"
    );
}

pub fn assert_mempool_size(pool: &MemPool<MockChain>, expected: usize) {
    let actual = pool.size();
    assert_eq!(actual, expected, "Expected mempool size {expected}, got {actual}");
}

/// Unconditional full audit; panics on any aggregate or index drift.
pub fn assert_pool_consistent(test_pool: &TestPool) {
    let inner = test_pool.pool.inner.read().unwrap();
    let mut coins = test_pool.pool.coins_cache.write().unwrap();
    inner.check(&mut coins);
}
