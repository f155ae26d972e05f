//! UTXO view layered over the pool.
//!
//! A dual-layer cache in the style of a backed coins view:
//! - base layer: an LRU over the injected [`CoinView`] (cleared when a block
//!   connects)
//! - overlay: outputs created by in-pool transactions, visible to validation
//!   so that chained unconfirmed spends resolve without touching the base
//!   view

use bitcoin::{Amount, OutPoint, Transaction, TxOut};
use galena_primitives::{CoinView, MEMPOOL_HEIGHT, PoolCoin};
use schnellru::{ByLength, LruMap};
use std::collections::HashMap;
use std::sync::Arc;

/// In-memory UTXO cache with an abstract chain backend.
pub struct CoinsViewCache {
    /// Base layer: coins from the chain, invalidated on block import.
    base_cache: LruMap<OutPoint, Option<PoolCoin>, ByLength>,

    /// Overlay: coins created by in-pool transactions.
    mempool_overlay: HashMap<OutPoint, PoolCoin>,

    /// The injected chain view.
    base_view: Arc<dyn CoinView>,
}

impl CoinsViewCache {
    /// Create a new coins view cache over `base_view`, caching at most
    /// `cache_size` base-layer entries.
    pub fn new(base_view: Arc<dyn CoinView>, cache_size: u32) -> Self {
        Self {
            base_cache: LruMap::new(ByLength::new(cache_size)),
            mempool_overlay: HashMap::new(),
            base_view,
        }
    }

    /// Get a coin with overlay priority: in-pool outputs first, then the
    /// cached base layer, then the backend.
    pub fn get_coin(&mut self, outpoint: &OutPoint) -> Option<PoolCoin> {
        if let Some(coin) = self.mempool_overlay.get(outpoint) {
            return Some(coin.clone());
        }

        if let Some(cached) = self.base_cache.peek(outpoint) {
            return cached.clone();
        }

        let coin = self.base_view.get_coin(outpoint);
        self.base_cache.insert(*outpoint, coin.clone());
        coin
    }

    /// Batch-prefetch coins at the start of validation so later lookups hit
    /// the cache.
    pub fn ensure_coins(&mut self, outpoints: &[OutPoint]) {
        for outpoint in outpoints {
            if self.mempool_overlay.contains_key(outpoint)
                || self.base_cache.peek(outpoint).is_some()
            {
                continue;
            }

            let coin = self.base_view.get_coin(outpoint);
            self.base_cache.insert(*outpoint, coin);
        }
    }

    /// Whether a coin is available in this view.
    pub fn have_coin(&mut self, outpoint: &OutPoint) -> bool {
        self.get_coin(outpoint).is_some()
    }

    /// Publish the outputs of an accepted transaction into the overlay.
    pub fn add_mempool_coins(&mut self, tx: &Transaction) {
        let txid = tx.compute_txid();
        for (idx, output) in tx.output.iter().enumerate() {
            let outpoint = OutPoint::new(txid, idx as u32);
            self.mempool_overlay.insert(
                outpoint,
                PoolCoin {
                    output: output.clone(),
                    height: MEMPOOL_HEIGHT,
                    is_coinbase: false,
                    median_time_past: 0,
                },
            );
        }
    }

    /// Retract the outputs of a transaction that left the pool.
    pub fn remove_mempool_tx(&mut self, tx: &Transaction) {
        let txid = tx.compute_txid();
        for idx in 0..tx.output.len() {
            self.mempool_overlay.remove(&OutPoint::new(txid, idx as u32));
        }
    }

    /// Drop a base-layer entry; used when the pool reports outpoints that
    /// no longer have any in-pool spender.
    pub fn uncache(&mut self, outpoint: &OutPoint) {
        self.base_cache.remove(outpoint);
    }

    /// A block connected: the base layer may be stale, the overlay stays
    /// valid until its transactions are removed from the pool.
    pub fn on_block_connected(&mut self) {
        self.base_cache.clear();
    }

    /// Drop the whole overlay; used when the pool is cleared wholesale.
    pub fn clear_overlay(&mut self) {
        self.mempool_overlay.clear();
    }

    /// Total input value of `tx`, if every input resolves in this view.
    pub fn input_value(&mut self, tx: &Transaction) -> Option<Amount> {
        let mut total = Amount::ZERO;
        for input in &tx.input {
            let coin = self.get_coin(&input.previous_output)?;
            total = total.checked_add(coin.output.value)?;
        }
        Some(total)
    }

    /// The spent output for one input, if available.
    pub fn spent_output(&mut self, outpoint: &OutPoint) -> Option<TxOut> {
        self.get_coin(outpoint).map(|coin| coin.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::ScriptBuf;
    use bitcoin::hashes::Hash;
    use bitcoin::{Txid, absolute, transaction};
    use std::collections::HashMap;
    use std::sync::RwLock;

    struct MapView(RwLock<HashMap<OutPoint, PoolCoin>>);

    impl CoinView for MapView {
        fn get_coin(&self, outpoint: &OutPoint) -> Option<PoolCoin> {
            self.0.read().unwrap().get(outpoint).cloned()
        }
    }

    fn coin(value: u64) -> PoolCoin {
        PoolCoin {
            output: TxOut {
                value: Amount::from_sat(value),
                script_pubkey: ScriptBuf::new(),
            },
            height: 10,
            is_coinbase: false,
            median_time_past: 0,
        }
    }

    #[test]
    fn overlay_shadows_base_view() {
        let base = Arc::new(MapView(RwLock::new(HashMap::new())));
        let mut cache = CoinsViewCache::new(base.clone(), 16);

        let tx = Transaction {
            version: transaction::Version::TWO,
            lock_time: absolute::LockTime::ZERO,
            input: vec![],
            output: vec![TxOut {
                value: Amount::from_sat(1234),
                script_pubkey: ScriptBuf::new(),
            }],
        };
        let outpoint = OutPoint::new(tx.compute_txid(), 0);

        assert!(!cache.have_coin(&outpoint));
        cache.add_mempool_coins(&tx);
        let found = cache.get_coin(&outpoint).unwrap();
        assert_eq!(found.output.value, Amount::from_sat(1234));
        assert!(found.is_mempool_coin());

        cache.remove_mempool_tx(&tx);
        assert!(!cache.have_coin(&outpoint));
    }

    #[test]
    fn base_layer_survives_until_block() {
        let outpoint = OutPoint {
            txid: Txid::from_byte_array([9u8; 32]),
            vout: 0,
        };
        let base = Arc::new(MapView(RwLock::new(HashMap::from([(
            outpoint,
            coin(777),
        )]))));
        let mut cache = CoinsViewCache::new(base.clone(), 16);

        assert!(cache.have_coin(&outpoint));

        // The backend forgets the coin; the cache still serves it until a
        // block connects.
        base.0.write().unwrap().clear();
        assert!(cache.have_coin(&outpoint));

        cache.on_block_connected();
        assert!(!cache.have_coin(&outpoint));
    }
}
