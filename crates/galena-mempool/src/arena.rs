//! Arena-based entry storage with multi-index support.
//!
//! Entries live in a slotmap and are addressed through [`EntryId`] handles,
//! avoiding reference cycles between parents and children. Five ordered
//! views coexist over the same storage; all of them stay live at all times.
//! Sort keys are cached inside each entry so that a mutation can remove the
//! stale key from the ordered sets before the entry changes.

use crate::types::{EntryId, LockPoints};
use bitcoin::{Transaction, Txid, Weight, Wtxid};
use slotmap::{DefaultKey, SlotMap};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// Comparable key shared by the four score-ordered indices.
///
/// `neg_score` is the negated scaled feerate, so ascending `BTreeSet` order
/// yields best-paying entries first. Ties break on txid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScoreKey {
    neg_score: i64,
    txid: Txid,
}

/// Scaled feerate used as an index score: satoshis times one million,
/// divided by virtual size. Integer math keeps the keys totally ordered
/// without float comparisons.
fn score(fee_sat: i64, vsize: i64) -> i64 {
    assert!(vsize > 0, "score requires a positive vsize");
    fee_sat.saturating_mul(1_000_000) / vsize
}

/// A pool entry together with its cached ancestor/descendant roll-ups.
///
/// The aggregate fields are projections maintained by the pool on every
/// structural change; the link sets are the authority.
pub struct TxMemPoolEntry {
    /// Transaction data.
    pub tx: Arc<Transaction>,

    /// Base fee in satoshis (input sum minus output sum).
    pub fee: i64,

    /// Fee plus the operator-applied priority delta. Used for every
    /// ordering decision; never reported as the true fee.
    pub modified_fee: i64,

    /// Cached transaction weight.
    pub tx_weight: Weight,

    /// Acceptance timestamp, seconds since epoch.
    pub time: i64,

    /// Chain height at acceptance.
    pub entry_height: u32,

    /// Monotone acceptance sequence number.
    pub entry_sequence: u64,

    /// Whether any input spends a coinbase output.
    pub spends_coinbase: bool,

    /// Signature operation cost for consensus accounting.
    pub sigop_cost: i64,

    /// Cached BIP68 evaluation result.
    pub lock_points: LockPoints,

    /// Declared gas price when this is a contract transaction; drives the
    /// gas-price mining order.
    pub gas_price: Option<u64>,

    // Ancestor roll-ups, self included.
    pub count_with_ancestors: u64,
    pub size_with_ancestors: i64,
    pub fees_with_ancestors: i64,
    pub sigops_with_ancestors: i64,

    // Descendant roll-ups, self included.
    pub count_with_descendants: u64,
    pub size_with_descendants: i64,
    pub fees_with_descendants: i64,

    /// Direct in-pool parents.
    pub parents: HashSet<EntryId>,

    /// Direct in-pool children.
    pub children: HashSet<EntryId>,

    // Cached index keys, refreshed together with the fields they derive
    // from.
    cached_descendant_key: ScoreKey,
    cached_mining_key: ScoreKey,
    cached_ancestor_key: ScoreKey,
    cached_gas_key: ScoreKey,

    /// Position in the relay sampling vector.
    pub(crate) idx_randomized: Option<usize>,

    txid: Txid,
    wtxid: Wtxid,
}

impl TxMemPoolEntry {
    /// Build an entry carrying only its own quantities; the pool folds in
    /// ancestor sums before insertion.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tx: Arc<Transaction>,
        fee: i64,
        time: i64,
        entry_height: u32,
        entry_sequence: u64,
        spends_coinbase: bool,
        sigop_cost: i64,
        lock_points: LockPoints,
        gas_price: Option<u64>,
    ) -> Self {
        let tx_weight = tx.weight();
        let vsize = tx_weight.to_vbytes_ceil() as i64;
        let txid = tx.compute_txid();
        let wtxid = tx.compute_wtxid();
        let zero_key = ScoreKey {
            neg_score: 0,
            txid,
        };

        Self {
            tx,
            fee,
            modified_fee: fee,
            tx_weight,
            time,
            entry_height,
            entry_sequence,
            spends_coinbase,
            sigop_cost,
            lock_points,
            gas_price,
            count_with_ancestors: 1,
            size_with_ancestors: vsize,
            fees_with_ancestors: fee,
            sigops_with_ancestors: sigop_cost,
            count_with_descendants: 1,
            size_with_descendants: vsize,
            fees_with_descendants: fee,
            parents: HashSet::new(),
            children: HashSet::new(),
            cached_descendant_key: zero_key,
            cached_mining_key: zero_key,
            cached_ancestor_key: zero_key,
            cached_gas_key: zero_key,
            idx_randomized: None,
            txid,
            wtxid,
        }
    }

    /// Transaction id, cached at entry construction.
    pub fn txid(&self) -> Txid {
        self.txid
    }

    /// Witness transaction id, cached at entry construction.
    pub fn wtxid(&self) -> Wtxid {
        self.wtxid
    }

    /// Virtual size in bytes.
    pub fn vsize(&self) -> i64 {
        self.tx_weight.to_vbytes_ceil() as i64
    }

    /// Whether any input signals BIP125 replaceability.
    pub fn signals_rbf(&self) -> bool {
        self.tx.input.iter().any(|txin| txin.sequence.is_rbf())
    }

    fn own_score(&self) -> i64 {
        score(self.modified_fee, self.vsize())
    }

    fn ancestor_score(&self) -> i64 {
        self.own_score()
            .min(score(self.fees_with_ancestors, self.size_with_ancestors))
    }

    fn descendant_score(&self) -> i64 {
        self.own_score()
            .max(score(self.fees_with_descendants, self.size_with_descendants))
    }

    fn gas_or_ancestor_score(&self) -> i64 {
        match self.gas_price {
            // Gas prices arrive sat/kvB-comparable; scale to the micro
            // units used by feerate scores.
            Some(gas) => (gas as i64).saturating_mul(1000),
            None => self.ancestor_score(),
        }
    }
}

/// Arena holding all pool entries with multi-index support.
pub struct MemPoolArena {
    /// Primary storage.
    entries: SlotMap<DefaultKey, TxMemPoolEntry>,

    by_txid: HashMap<Txid, EntryId>,
    by_wtxid: HashMap<Wtxid, EntryId>,

    /// max(own feerate, feerate with descendants), best first. The worst
    /// tail of this order is the eviction victim.
    by_descendant_score: BTreeSet<(ScoreKey, EntryId)>,

    /// Ascending acceptance time.
    by_entry_time: BTreeSet<(i64, Txid, EntryId)>,

    /// Modified feerate, the canonical block-template order. Unique since
    /// the key embeds the txid.
    by_mining_score: BTreeSet<(ScoreKey, EntryId)>,

    /// min(own feerate, feerate with ancestors).
    by_ancestor_score: BTreeSet<(ScoreKey, EntryId)>,

    /// As ancestor score, except contract transactions rank by their
    /// declared gas price.
    by_ancestor_or_gas: BTreeSet<(ScoreKey, EntryId)>,
}

impl MemPoolArena {
    pub fn new() -> Self {
        Self {
            entries: SlotMap::new(),
            by_txid: HashMap::new(),
            by_wtxid: HashMap::new(),
            by_descendant_score: BTreeSet::new(),
            by_entry_time: BTreeSet::new(),
            by_mining_score: BTreeSet::new(),
            by_ancestor_score: BTreeSet::new(),
            by_ancestor_or_gas: BTreeSet::new(),
        }
    }

    fn make_keys(entry: &TxMemPoolEntry) -> (ScoreKey, ScoreKey, ScoreKey, ScoreKey) {
        let txid = entry.txid;
        (
            ScoreKey {
                neg_score: -entry.descendant_score(),
                txid,
            },
            ScoreKey {
                neg_score: -entry.own_score(),
                txid,
            },
            ScoreKey {
                neg_score: -entry.ancestor_score(),
                txid,
            },
            ScoreKey {
                neg_score: -entry.gas_or_ancestor_score(),
                txid,
            },
        )
    }

    /// Insert a new entry and index it everywhere.
    pub fn insert(&mut self, mut entry: TxMemPoolEntry) -> EntryId {
        let (desc_key, mining_key, anc_key, gas_key) = Self::make_keys(&entry);
        entry.cached_descendant_key = desc_key;
        entry.cached_mining_key = mining_key;
        entry.cached_ancestor_key = anc_key;
        entry.cached_gas_key = gas_key;

        let txid = entry.txid;
        let wtxid = entry.wtxid;
        let time = entry.time;

        let id = EntryId(self.entries.insert(entry));

        self.by_txid.insert(txid, id);
        self.by_wtxid.insert(wtxid, id);
        self.by_descendant_score.insert((desc_key, id));
        self.by_entry_time.insert((time, txid, id));
        self.by_mining_score.insert((mining_key, id));
        self.by_ancestor_score.insert((anc_key, id));
        self.by_ancestor_or_gas.insert((gas_key, id));

        id
    }

    /// Remove an entry from the arena and every index.
    pub fn remove(&mut self, id: EntryId) -> Option<TxMemPoolEntry> {
        let entry = self.entries.remove(id.0)?;

        self.by_txid.remove(&entry.txid);
        self.by_wtxid.remove(&entry.wtxid);
        self.by_descendant_score
            .remove(&(entry.cached_descendant_key, id));
        self.by_entry_time.remove(&(entry.time, entry.txid, id));
        self.by_mining_score.remove(&(entry.cached_mining_key, id));
        self.by_ancestor_score
            .remove(&(entry.cached_ancestor_key, id));
        self.by_ancestor_or_gas.remove(&(entry.cached_gas_key, id));

        Some(entry)
    }

    /// Apply deltas to an entry's ancestor roll-ups and reindex the orders
    /// that derive from them.
    pub fn update_ancestor_state(
        &mut self,
        id: EntryId,
        size_delta: i64,
        fee_delta: i64,
        count_delta: i64,
        sigops_delta: i64,
    ) {
        let entry = &self.entries[id.0];
        let old_anc_key = entry.cached_ancestor_key;
        let old_gas_key = entry.cached_gas_key;

        self.by_ancestor_score.remove(&(old_anc_key, id));
        self.by_ancestor_or_gas.remove(&(old_gas_key, id));

        let entry = &mut self.entries[id.0];
        entry.size_with_ancestors += size_delta;
        entry.fees_with_ancestors += fee_delta;
        entry.count_with_ancestors = entry
            .count_with_ancestors
            .checked_add_signed(count_delta)
            .expect("ancestor count underflow");
        entry.sigops_with_ancestors += sigops_delta;
        assert!(
            entry.size_with_ancestors > 0 && entry.count_with_ancestors >= 1,
            "ancestor state of {} went negative",
            entry.txid,
        );

        let txid = entry.txid;
        let new_anc_key = ScoreKey {
            neg_score: -entry.ancestor_score(),
            txid,
        };
        let new_gas_key = ScoreKey {
            neg_score: -entry.gas_or_ancestor_score(),
            txid,
        };
        entry.cached_ancestor_key = new_anc_key;
        entry.cached_gas_key = new_gas_key;

        self.by_ancestor_score.insert((new_anc_key, id));
        self.by_ancestor_or_gas.insert((new_gas_key, id));
    }

    /// Apply deltas to an entry's descendant roll-ups and reindex.
    pub fn update_descendant_state(
        &mut self,
        id: EntryId,
        size_delta: i64,
        fee_delta: i64,
        count_delta: i64,
    ) {
        let entry = &self.entries[id.0];
        let old_desc_key = entry.cached_descendant_key;

        self.by_descendant_score.remove(&(old_desc_key, id));

        let entry = &mut self.entries[id.0];
        entry.size_with_descendants += size_delta;
        entry.fees_with_descendants += fee_delta;
        entry.count_with_descendants = entry
            .count_with_descendants
            .checked_add_signed(count_delta)
            .expect("descendant count underflow");
        assert!(
            entry.size_with_descendants > 0 && entry.count_with_descendants >= 1,
            "descendant state of {} went negative",
            entry.txid,
        );

        let txid = entry.txid;
        let new_desc_key = ScoreKey {
            neg_score: -entry.descendant_score(),
            txid,
        };
        entry.cached_descendant_key = new_desc_key;

        self.by_descendant_score.insert((new_desc_key, id));
    }

    /// Replace the modified fee (priority change) and reindex every score
    /// order; the entry's own roll-up fees shift by the same difference.
    pub fn update_fee_delta(&mut self, id: EntryId, new_modified_fee: i64) {
        let entry = &self.entries[id.0];
        let old_desc_key = entry.cached_descendant_key;
        let old_mining_key = entry.cached_mining_key;
        let old_anc_key = entry.cached_ancestor_key;
        let old_gas_key = entry.cached_gas_key;

        self.by_descendant_score.remove(&(old_desc_key, id));
        self.by_mining_score.remove(&(old_mining_key, id));
        self.by_ancestor_score.remove(&(old_anc_key, id));
        self.by_ancestor_or_gas.remove(&(old_gas_key, id));

        let entry = &mut self.entries[id.0];
        let diff = new_modified_fee - entry.modified_fee;
        entry.modified_fee = new_modified_fee;
        entry.fees_with_ancestors += diff;
        entry.fees_with_descendants += diff;

        let (desc_key, mining_key, anc_key, gas_key) = Self::make_keys(entry);
        let entry = &mut self.entries[id.0];
        entry.cached_descendant_key = desc_key;
        entry.cached_mining_key = mining_key;
        entry.cached_ancestor_key = anc_key;
        entry.cached_gas_key = gas_key;

        self.by_descendant_score.insert((desc_key, id));
        self.by_mining_score.insert((mining_key, id));
        self.by_ancestor_score.insert((anc_key, id));
        self.by_ancestor_or_gas.insert((gas_key, id));
    }

    pub fn get(&self, id: EntryId) -> Option<&TxMemPoolEntry> {
        self.entries.get(id.0)
    }

    pub fn get_mut(&mut self, id: EntryId) -> Option<&mut TxMemPoolEntry> {
        self.entries.get_mut(id.0)
    }

    pub fn get_by_txid(&self, txid: &Txid) -> Option<EntryId> {
        self.by_txid.get(txid).copied()
    }

    pub fn get_by_wtxid(&self, wtxid: &Wtxid) -> Option<EntryId> {
        self.by_wtxid.get(wtxid).copied()
    }

    /// Iterate best mining packages first: max(own, descendant) feerate.
    pub fn iter_by_descendant_score(&self) -> impl Iterator<Item = (EntryId, &TxMemPoolEntry)> {
        self.by_descendant_score
            .iter()
            .map(|(_, id)| (*id, &self.entries[id.0]))
    }

    /// The entry with the worst descendant score, the next eviction victim.
    pub fn worst_by_descendant_score(&self) -> Option<(EntryId, &TxMemPoolEntry)> {
        self.by_descendant_score
            .iter()
            .next_back()
            .map(|(_, id)| (*id, &self.entries[id.0]))
    }

    /// Iterate oldest entries first.
    pub fn iter_by_entry_time(&self) -> impl Iterator<Item = (EntryId, &TxMemPoolEntry)> {
        self.by_entry_time
            .iter()
            .map(|(_, _, id)| (*id, &self.entries[id.0]))
    }

    /// Iterate by modified feerate, the block-template order.
    pub fn iter_by_mining_score(&self) -> impl Iterator<Item = (EntryId, &TxMemPoolEntry)> {
        self.by_mining_score
            .iter()
            .map(|(_, id)| (*id, &self.entries[id.0]))
    }

    /// Iterate by min(own, ancestor) feerate.
    pub fn iter_by_ancestor_score(&self) -> impl Iterator<Item = (EntryId, &TxMemPoolEntry)> {
        self.by_ancestor_score
            .iter()
            .map(|(_, id)| (*id, &self.entries[id.0]))
    }

    /// Iterate by ancestor score, contract transactions ranked by gas price.
    pub fn iter_by_ancestor_score_or_gas_price(
        &self,
    ) -> impl Iterator<Item = (EntryId, &TxMemPoolEntry)> {
        self.by_ancestor_or_gas
            .iter()
            .map(|(_, id)| (*id, &self.entries[id.0]))
    }

    /// Iterate all entries in storage order.
    pub fn iter(&self) -> impl Iterator<Item = (EntryId, &TxMemPoolEntry)> {
        self.entries.iter().map(|(key, entry)| (EntryId(key), entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MemPoolArena {
    fn default() -> Self {
        Self::new()
    }
}
