//! Inner pool state and the bookkeeping engine.
//!
//! Everything in here runs under the facade's write lock. The aggregate
//! fields on each entry are projections over the link graph; every
//! structural change folds or unfolds the affected roll-ups before any
//! entry is physically removed, because once entries are gone the graph can
//! no longer be walked consistently.

use crate::arena::{MemPoolArena, TxMemPoolEntry};
use crate::coins_view::CoinsViewCache;
use crate::error::MempoolError;
use crate::types::{
    AncestorLimits, EntryId, FeeRate, MemPoolObserver, RemovalReason, TxMempoolInfo,
};
use bitcoin::{OutPoint, Transaction, Txid, Wtxid};
use rand::Rng;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::mem;
use std::sync::Arc;

/// Halflife of the rolling minimum fee rate decay: 12 hours.
pub const ROLLING_FEE_HALFLIFE: i64 = 60 * 60 * 12;

/// Rough per-entry overhead of the five ordered indices and two hash
/// lookups, counted once per entry.
const PER_ENTRY_INDEX_OVERHEAD: usize = 12 * mem::size_of::<usize>();

/// Conservative estimate of the heap held by one entry, its transaction
/// and its link sets.
fn entry_usage(entry: &TxMemPoolEntry) -> usize {
    mem::size_of::<TxMemPoolEntry>()
        + entry.tx.total_size()
        + (entry.parents.len() + entry.children.len()) * mem::size_of::<EntryId>()
        + PER_ENTRY_INDEX_OVERHEAD
}

/// Seed of an ancestor walk.
pub(crate) enum AncestorSeed<'a> {
    /// A candidate transaction not yet resident; in-pool parents are
    /// discovered by scanning its consumed outpoints.
    Tx(&'a Transaction),
    /// A resident entry; parents come from the link graph.
    Entry(EntryId),
}

/// Inner pool state, protected by the facade's lock.
pub struct MemPoolInner {
    /// Entry storage with the five ordered views.
    pub(crate) arena: MemPoolArena,

    /// Which in-pool transaction claims each consumed outpoint.
    pub(crate) map_next_tx: HashMap<OutPoint, Txid>,

    /// Operator-applied fee deltas, resident or not.
    pub(crate) map_deltas: HashMap<Txid, i64>,

    /// (wtxid, entry) pairs in randomized order, for relay sampling.
    pub(crate) txns_randomized: Vec<(Wtxid, EntryId)>,

    /// Accepted but not yet announced to peers.
    pub(crate) unbroadcast: HashSet<Txid>,

    /// Sum of all resident virtual sizes.
    total_vsize: u64,

    /// Sum of all resident base fees.
    total_fee: i64,

    /// Incrementally maintained estimate of entry heap usage.
    cached_inner_usage: usize,

    /// Fee floor in sat/kvB; decays exponentially between bumps.
    rolling_minimum_fee_rate: f64,

    /// Set when a block connects, cleared by the next eviction bump.
    block_since_last_rolling_fee_bump: bool,

    /// Timestamp of the last floor decay step.
    last_rolling_fee_update: i64,

    /// Synchronous event sinks, notified under the lock.
    observers: Vec<Arc<dyn MemPoolObserver>>,
}

impl MemPoolInner {
    pub fn new() -> Self {
        Self {
            arena: MemPoolArena::new(),
            map_next_tx: HashMap::new(),
            map_deltas: HashMap::new(),
            txns_randomized: Vec::new(),
            unbroadcast: HashSet::new(),
            total_vsize: 0,
            total_fee: 0,
            cached_inner_usage: 0,
            rolling_minimum_fee_rate: 0.0,
            block_since_last_rolling_fee_bump: false,
            last_rolling_fee_update: 0,
            observers: Vec::new(),
        }
    }

    pub fn register_observer(&mut self, observer: Arc<dyn MemPoolObserver>) {
        self.observers.push(observer);
    }

    // --- lookups ---

    pub fn get_entry(&self, txid: &Txid) -> Option<&TxMemPoolEntry> {
        self.arena.get(self.arena.get_by_txid(txid)?)
    }

    pub fn contains_txid(&self, txid: &Txid) -> bool {
        self.arena.get_by_txid(txid).is_some()
    }

    pub fn contains_wtxid(&self, wtxid: &Wtxid) -> bool {
        self.arena.get_by_wtxid(wtxid).is_some()
    }

    /// Transaction claiming `outpoint`, for conflict detection.
    pub fn get_conflict_tx(&self, outpoint: &OutPoint) -> Option<Txid> {
        self.map_next_tx.get(outpoint).copied()
    }

    /// Whether some resident transaction consumes `outpoint`.
    pub fn is_spent(&self, outpoint: &OutPoint) -> bool {
        self.map_next_tx.contains_key(outpoint)
    }

    /// True when none of `tx`'s inputs are resident, i.e. the transaction
    /// could be mined without any of the pool.
    pub fn has_no_inputs_of(&self, tx: &Transaction) -> bool {
        tx.input
            .iter()
            .all(|input| !self.contains_txid(&input.previous_output.txid))
    }

    /// False when the transaction is resident and its chain is longer than
    /// `chain_limit` in either direction.
    pub fn transaction_within_chain_limit(&self, txid: &Txid, chain_limit: u64) -> bool {
        match self.get_entry(txid) {
            Some(entry) => {
                entry.count_with_ancestors <= chain_limit
                    && entry.count_with_descendants <= chain_limit
            }
            None => true,
        }
    }

    pub fn size(&self) -> usize {
        self.arena.len()
    }

    pub fn total_vsize(&self) -> u64 {
        self.total_vsize
    }

    pub fn total_fees(&self) -> i64 {
        self.total_fee
    }

    /// Conservative estimate of the heap used by all owning structures.
    pub fn dynamic_memory_usage(&self) -> usize {
        self.cached_inner_usage
            + self.map_next_tx.len()
                * (mem::size_of::<OutPoint>() + mem::size_of::<Txid>() + 3 * mem::size_of::<usize>())
            + self.map_deltas.len() * (mem::size_of::<Txid>() + mem::size_of::<i64>())
            + self.txns_randomized.capacity() * mem::size_of::<(Wtxid, EntryId)>()
            + self.unbroadcast.len() * mem::size_of::<Txid>()
    }

    pub fn info(&self, txid: &Txid) -> Option<TxMempoolInfo> {
        let entry = self.get_entry(txid)?;
        Some(TxMempoolInfo {
            tx: entry.tx.clone(),
            time: entry.time,
            fee_rate: FeeRate::from_fee_and_size(entry.fee, entry.vsize()),
            fee_delta: entry.modified_fee - entry.fee,
        })
    }

    pub fn info_all(&self) -> Vec<TxMempoolInfo> {
        self.get_sorted_depth_and_score()
            .into_iter()
            .filter_map(|id| {
                let entry = self.arena.get(id)?;
                Some(TxMempoolInfo {
                    tx: entry.tx.clone(),
                    time: entry.time,
                    fee_rate: FeeRate::from_fee_and_size(entry.fee, entry.vsize()),
                    fee_delta: entry.modified_fee - entry.fee,
                })
            })
            .collect()
    }

    // --- graph walks ---

    /// Augment `descendants` with the seed and everything depending on it.
    /// Entries already present are assumed complete and are not re-walked.
    pub fn calculate_descendants(&self, seed: EntryId, descendants: &mut HashSet<EntryId>) {
        let mut stage = Vec::new();
        if !descendants.contains(&seed) {
            stage.push(seed);
        }

        while let Some(id) = stage.pop() {
            if !descendants.insert(id) {
                continue;
            }
            if let Some(entry) = self.arena.get(id) {
                for &child in &entry.children {
                    if !descendants.contains(&child) {
                        stage.push(child);
                    }
                }
            }
        }
    }

    /// Bounded walk over all in-pool ancestors of the seed.
    ///
    /// Fails without any mutation when a limit is exceeded; the returned
    /// set never contains the seed itself.
    pub(crate) fn calculate_mempool_ancestors(
        &self,
        seed: AncestorSeed<'_>,
        limits: &AncestorLimits,
    ) -> Result<HashSet<EntryId>, MempoolError> {
        let mut parent_work: HashSet<EntryId> = HashSet::new();
        let entry_vsize = match &seed {
            AncestorSeed::Tx(tx) => tx.weight().to_vbytes_ceil() as i64,
            AncestorSeed::Entry(id) => {
                self.arena.get(*id).expect("resident seed must exist").vsize()
            }
        };

        match seed {
            AncestorSeed::Tx(tx) => {
                // Discover in-pool parents by scanning the consumed
                // outpoints.
                for input in &tx.input {
                    if let Some(parent_id) = self.arena.get_by_txid(&input.previous_output.txid) {
                        parent_work.insert(parent_id);
                        if parent_work.len() as u64 + 1 > limits.ancestor_count {
                            return Err(MempoolError::TooManyUnconfirmedAncestors(
                                limits.ancestor_count,
                            ));
                        }
                    }
                }
            }
            AncestorSeed::Entry(id) => {
                parent_work = self
                    .arena
                    .get(id)
                    .expect("resident seed must exist")
                    .parents
                    .clone();
            }
        }

        let mut ancestors: HashSet<EntryId> = HashSet::new();
        let mut total_size = entry_vsize;

        while let Some(&stage_id) = parent_work.iter().next() {
            parent_work.remove(&stage_id);
            ancestors.insert(stage_id);

            let stage = self
                .arena
                .get(stage_id)
                .expect("ancestor handle must be live");
            total_size += stage.vsize();

            // The hypothetical addition: the seed becomes one more
            // descendant of every ancestor.
            if stage.size_with_descendants + entry_vsize > limits.descendant_size_vb {
                return Err(MempoolError::DescendantSizeTooLarge(
                    stage.txid(),
                    limits.descendant_size_vb,
                ));
            }
            if stage.count_with_descendants + 1 > limits.descendant_count {
                return Err(MempoolError::TooManyDescendants(
                    stage.txid(),
                    limits.descendant_count,
                ));
            }
            if total_size > limits.ancestor_size_vb {
                return Err(MempoolError::AncestorSizeTooLarge(limits.ancestor_size_vb));
            }

            for &parent in &stage.parents {
                if !ancestors.contains(&parent) {
                    parent_work.insert(parent);
                }
                if parent_work.len() as u64 + ancestors.len() as u64 + 1 > limits.ancestor_count {
                    return Err(MempoolError::TooManyUnconfirmedAncestors(
                        limits.ancestor_count,
                    ));
                }
            }
        }

        Ok(ancestors)
    }

    // --- link mutators ---

    /// Add or remove `parent` from `entry`'s direct parent set. Must be
    /// paired with the matching [`Self::update_child`] call.
    fn update_parent(&mut self, entry: EntryId, parent: EntryId, add: bool) {
        let link = mem::size_of::<EntryId>();
        let parents = &mut self.arena.get_mut(entry).expect("entry must be live").parents;
        if add {
            if parents.insert(parent) {
                self.cached_inner_usage += link;
            }
        } else if parents.remove(&parent) {
            self.cached_inner_usage -= link;
        }
    }

    /// Add or remove `child` from `entry`'s direct child set.
    fn update_child(&mut self, entry: EntryId, child: EntryId, add: bool) {
        let link = mem::size_of::<EntryId>();
        let children = &mut self
            .arena
            .get_mut(entry)
            .expect("entry must be live")
            .children;
        if add {
            if children.insert(child) {
                self.cached_inner_usage += link;
            }
        } else if children.remove(&child) {
            self.cached_inner_usage -= link;
        }
    }

    // --- add ---

    /// Add an entry whose ancestors the pool computes itself.
    pub fn add_unchecked(&mut self, entry: TxMemPoolEntry, valid_fee_estimate: bool) -> EntryId {
        let tx = entry.tx.clone();
        let ancestors = self
            .calculate_mempool_ancestors(AncestorSeed::Tx(&tx), &AncestorLimits::unbounded())
            .expect("unbounded ancestor walk cannot fail");
        self.add_unchecked_with_ancestors(entry, ancestors, valid_fee_estimate)
    }

    /// Add an entry with a pre-computed ancestor set.
    ///
    /// Folds the new entry into every ancestor's descendant roll-up and
    /// sets the entry's own ancestor roll-ups before it is indexed.
    pub fn add_unchecked_with_ancestors(
        &mut self,
        mut entry: TxMemPoolEntry,
        ancestors: HashSet<EntryId>,
        valid_fee_estimate: bool,
    ) -> EntryId {
        let txid = entry.txid();

        // A delta recorded before the transaction arrived applies from the
        // moment it enters.
        if let Some(&delta) = self.map_deltas.get(&txid) {
            if delta != 0 {
                entry.modified_fee += delta;
                entry.fees_with_ancestors += delta;
                entry.fees_with_descendants += delta;
            }
        }

        for &ancestor_id in &ancestors {
            let ancestor = self
                .arena
                .get(ancestor_id)
                .expect("ancestor must be resident");
            entry.count_with_ancestors += 1;
            entry.size_with_ancestors += ancestor.vsize();
            entry.fees_with_ancestors += ancestor.modified_fee;
            entry.sigops_with_ancestors += ancestor.sigop_cost;
        }

        let tx = entry.tx.clone();
        let vsize = entry.vsize();
        let fee = entry.fee;
        let wtxid = entry.wtxid();

        let id = self.arena.insert(entry);
        self.cached_inner_usage += entry_usage(self.arena.get(id).expect("just inserted"));

        // Wire direct parent edges from the consumed outpoints.
        let mut parent_ids = HashSet::new();
        for input in &tx.input {
            if let Some(parent_id) = self.arena.get_by_txid(&input.previous_output.txid) {
                parent_ids.insert(parent_id);
            }
        }
        for parent_id in parent_ids {
            self.update_parent(id, parent_id, true);
        }

        self.update_ancestors_of(true, id, &ancestors, None);

        for input in &tx.input {
            let prev = self.map_next_tx.insert(input.previous_output, txid);
            assert!(
                prev.is_none(),
                "outpoint {}:{} already claimed by {}",
                input.previous_output.txid,
                input.previous_output.vout,
                prev.unwrap_or(txid),
            );
        }

        // Keep the relay vector in random order: append, then swap into a
        // random slot.
        self.txns_randomized.push((wtxid, id));
        let last = self.txns_randomized.len() - 1;
        let slot = rand::thread_rng().gen_range(0..=last);
        self.txns_randomized.swap(slot, last);
        if let Some(entry) = self.arena.get_mut(id) {
            entry.idx_randomized = Some(slot);
        }
        if slot != last {
            let (_, displaced) = self.txns_randomized[last];
            if let Some(entry) = self.arena.get_mut(displaced) {
                entry.idx_randomized = Some(last);
            }
        }

        self.total_vsize += vsize as u64;
        self.total_fee += fee;

        for observer in &self.observers {
            observer.entry_added(&tx, valid_fee_estimate);
        }

        tracing::debug!(%txid, vsize, fee, "Added transaction to the pool");

        id
    }

    /// Add or remove `id` as a descendant of every entry in `ancestors`,
    /// and mirror the child link on its direct parents.
    ///
    /// `skip` names ancestors that are themselves leaving the pool; their
    /// roll-ups no longer matter.
    fn update_ancestors_of(
        &mut self,
        add: bool,
        id: EntryId,
        ancestors: &HashSet<EntryId>,
        skip: Option<&HashSet<EntryId>>,
    ) {
        let entry = self.arena.get(id).expect("entry must be live");
        let parents: Vec<EntryId> = entry.parents.iter().copied().collect();
        let vsize = entry.vsize();
        let modified_fee = entry.modified_fee;

        for parent in parents {
            self.update_child(parent, id, add);
        }

        let sign = if add { 1 } else { -1 };
        for &ancestor_id in ancestors {
            if skip.is_some_and(|set| set.contains(&ancestor_id)) {
                continue;
            }
            self.arena
                .update_descendant_state(ancestor_id, sign * vsize, sign * modified_fee, sign);
        }
    }

    /// Sever the parent link of every direct child of `id`.
    fn update_children_for_removal(&mut self, id: EntryId) {
        let children: Vec<EntryId> = self
            .arena
            .get(id)
            .expect("entry must be live")
            .children
            .iter()
            .copied()
            .collect();
        for child in children {
            self.update_parent(child, id, false);
        }
    }

    // --- remove ---

    /// Unfold the roll-ups for a staged removal set.
    ///
    /// With `update_descendants`, surviving descendants of each removed
    /// entry also shed the departing ancestor from their ancestor state;
    /// required when the set is not descendant-closed (block removal).
    fn update_for_remove_from_mempool(&mut self, stage: &HashSet<EntryId>, update_descendants: bool) {
        if update_descendants {
            for &id in stage {
                let mut descendants = HashSet::new();
                self.calculate_descendants(id, &mut descendants);
                descendants.remove(&id);

                let entry = self.arena.get(id).expect("staged entry must be live");
                let vsize = entry.vsize();
                let modified_fee = entry.modified_fee;
                let sigop_cost = entry.sigop_cost;

                for descendant in descendants {
                    if !stage.contains(&descendant) {
                        self.arena.update_ancestor_state(
                            descendant,
                            -vsize,
                            -modified_fee,
                            -1,
                            -sigop_cost,
                        );
                    }
                }
            }
        }

        for &id in stage {
            // Resident entry, so the link graph is authoritative and the
            // walk needs no outpoint scan.
            let ancestors = self
                .calculate_mempool_ancestors(AncestorSeed::Entry(id), &AncestorLimits::unbounded())
                .expect("unbounded ancestor walk cannot fail");
            self.update_ancestors_of(false, id, &ancestors, Some(stage));
        }

        for &id in stage {
            self.update_children_for_removal(id);
        }
    }

    /// Remove a staged set of entries.
    ///
    /// The caller guarantees the set is closed under in-pool descendants
    /// unless the reason is `Block`. Returns the removed transactions so
    /// the facade can retract their overlay coins.
    pub fn remove_staged(
        &mut self,
        stage: &HashSet<EntryId>,
        update_descendants: bool,
        reason: RemovalReason,
    ) -> Vec<Arc<Transaction>> {
        self.update_for_remove_from_mempool(stage, update_descendants);

        let mut removed = Vec::with_capacity(stage.len());
        for &id in stage {
            if let Some(tx) = self.remove_unchecked(id, reason) {
                removed.push(tx);
            }
        }
        removed
    }

    /// Physically drop one entry. All roll-up unfolding must already have
    /// happened.
    fn remove_unchecked(&mut self, id: EntryId, reason: RemovalReason) -> Option<Arc<Transaction>> {
        let entry = self.arena.remove(id)?;

        self.cached_inner_usage -= entry_usage(&entry);

        for input in &entry.tx.input {
            self.map_next_tx.remove(&input.previous_output);
        }

        if let Some(idx) = entry.idx_randomized {
            let last = self.txns_randomized.len() - 1;
            self.txns_randomized.swap_remove(idx);
            if idx < last {
                let (_, moved) = self.txns_randomized[idx];
                if let Some(moved_entry) = self.arena.get_mut(moved) {
                    moved_entry.idx_randomized = Some(idx);
                }
            }
        }

        self.total_vsize -= entry.vsize() as u64;
        self.total_fee -= entry.fee;
        self.unbroadcast.remove(&entry.txid());

        for observer in &self.observers {
            observer.entry_removed(&entry.tx, reason);
        }

        tracing::debug!(txid = %entry.txid(), reason = reason.as_str(), "Removed transaction from the pool");

        Some(entry.tx)
    }

    /// Remove a transaction and everything depending on it.
    ///
    /// When the transaction itself is not resident, residents spending its
    /// outputs seed the closure instead.
    pub fn remove_recursive(
        &mut self,
        tx: &Transaction,
        reason: RemovalReason,
    ) -> Vec<Arc<Transaction>> {
        let txid = tx.compute_txid();
        let mut roots = HashSet::new();

        if let Some(id) = self.arena.get_by_txid(&txid) {
            roots.insert(id);
        } else {
            for vout in 0..tx.output.len() as u32 {
                if let Some(spender) = self.map_next_tx.get(&OutPoint::new(txid, vout)) {
                    let spender_id = self
                        .arena
                        .get_by_txid(spender)
                        .expect("claimed spender must be resident");
                    roots.insert(spender_id);
                }
            }
        }

        let mut stage = HashSet::new();
        for &id in &roots {
            self.calculate_descendants(id, &mut stage);
        }
        self.remove_staged(&stage, false, reason)
    }

    /// Evict residents that double-spend any input of `tx`.
    pub fn remove_conflicts(&mut self, tx: &Transaction) -> Vec<Arc<Transaction>> {
        let txid = tx.compute_txid();
        let mut conflicting = Vec::new();
        for input in &tx.input {
            if let Some(conflict_txid) = self.map_next_tx.get(&input.previous_output) {
                if *conflict_txid != txid {
                    if let Some(entry) = self.get_entry(conflict_txid) {
                        conflicting.push(entry.tx.clone());
                    }
                }
            }
        }

        let mut removed = Vec::new();
        for conflict in conflicting {
            removed.extend(self.remove_recursive(&conflict, RemovalReason::Conflict));
        }
        removed
    }

    /// Remove the transactions of a connected block.
    ///
    /// Confirmed entries leave one by one with their descendants kept and
    /// repaired; conflicts leave recursively; prioritisation is dropped.
    pub fn remove_for_block(&mut self, block_txs: &[Transaction], now: i64) -> Vec<Arc<Transaction>> {
        let mut removed = Vec::new();
        for tx in block_txs {
            let txid = tx.compute_txid();
            if let Some(id) = self.arena.get_by_txid(&txid) {
                let mut stage = HashSet::new();
                stage.insert(id);
                removed.extend(self.remove_staged(&stage, true, RemovalReason::Block));
            }
            removed.extend(self.remove_conflicts(tx));
            self.clear_prioritisation(&txid);
        }

        self.last_rolling_fee_update = now;
        self.block_since_last_rolling_fee_bump = true;

        removed
    }

    /// Drop every entry without touching the delta map.
    pub fn clear(&mut self, now: i64) {
        self.arena = MemPoolArena::new();
        self.map_next_tx.clear();
        self.txns_randomized.clear();
        self.unbroadcast.clear();
        self.total_vsize = 0;
        self.total_fee = 0;
        self.cached_inner_usage = 0;
        self.rolling_minimum_fee_rate = 0.0;
        self.block_since_last_rolling_fee_bump = false;
        self.last_rolling_fee_update = now;
    }

    // --- reorg reconciliation ---

    /// Repair descendant bookkeeping after re-accepting the transactions
    /// of a disconnected block.
    ///
    /// `txids` must be in topological order (parents before children) and
    /// name exactly the re-accepted transactions. Children that stayed in
    /// the pool throughout are discovered through the outpoint index, since
    /// the link graph is not trustworthy until this pass finishes.
    pub fn update_transactions_from_block(&mut self, txids: &[Txid]) {
        let exclude: HashSet<Txid> = txids.iter().copied().collect();
        let mut cached_descendants: HashMap<EntryId, HashSet<EntryId>> = HashMap::new();

        // Reverse topological order, so a child processed earlier already
        // carries its full descendant roll-up when its parent is updated.
        for txid in txids.iter().rev() {
            let Some(id) = self.arena.get_by_txid(txid) else {
                continue;
            };

            let output_count = self
                .arena
                .get(id)
                .expect("entry must be live")
                .tx
                .output
                .len() as u32;
            for vout in 0..output_count {
                let outpoint = OutPoint::new(*txid, vout);
                if let Some(child_txid) = self.map_next_tx.get(&outpoint).copied() {
                    if let Some(child_id) = self.arena.get_by_txid(&child_txid) {
                        self.update_child(id, child_id, true);
                        self.update_parent(child_id, id, true);
                    }
                }
            }

            self.update_for_descendants(id, &mut cached_descendants, &exclude);
        }
    }

    /// Fold the out-of-block descendants of one re-accepted transaction
    /// into its descendant roll-up, and itself into their ancestor
    /// roll-ups.
    ///
    /// Descendants named in `exclude` were re-accepted on their own and
    /// already account for this entry. `cached_descendants` carries the
    /// sets computed for later list members so shared chains are only
    /// walked once.
    fn update_for_descendants(
        &mut self,
        update_id: EntryId,
        cached_descendants: &mut HashMap<EntryId, HashSet<EntryId>>,
        exclude: &HashSet<Txid>,
    ) {
        let mut stage: Vec<EntryId> = self
            .arena
            .get(update_id)
            .expect("entry must be live")
            .children
            .iter()
            .copied()
            .collect();
        let mut all_descendants: HashSet<EntryId> = HashSet::new();

        while let Some(current) = stage.pop() {
            if !all_descendants.insert(current) {
                continue;
            }
            let children: Vec<EntryId> = self
                .arena
                .get(current)
                .expect("descendant must be live")
                .children
                .iter()
                .copied()
                .collect();
            for child in children {
                if let Some(cached) = cached_descendants.get(&child) {
                    // Already fully computed in an earlier pass; absorb
                    // without traversing again.
                    for &cached_id in cached {
                        all_descendants.insert(cached_id);
                    }
                } else if !all_descendants.contains(&child) {
                    stage.push(child);
                }
            }
        }

        let update_entry = self.arena.get(update_id).expect("entry must be live");
        let update_vsize = update_entry.vsize();
        let update_fee = update_entry.modified_fee;
        let update_sigops = update_entry.sigop_cost;

        let mut modify_size = 0i64;
        let mut modify_fee = 0i64;
        let mut modify_count = 0i64;
        let mut cache_set = HashSet::new();

        for descendant in all_descendants {
            let desc_entry = self.arena.get(descendant).expect("descendant must be live");
            let desc_txid = desc_entry.txid();
            if exclude.contains(&desc_txid) {
                continue;
            }
            modify_size += desc_entry.vsize();
            modify_fee += desc_entry.modified_fee;
            modify_count += 1;
            cache_set.insert(descendant);

            self.arena
                .update_ancestor_state(descendant, update_vsize, update_fee, 1, update_sigops);
        }

        cached_descendants.insert(update_id, cache_set);

        if modify_count > 0 {
            self.arena
                .update_descendant_state(update_id, modify_size, modify_fee, modify_count);
        }
    }

    // --- prioritisation ---

    /// Apply an operator fee delta; the txid need not be resident.
    pub fn prioritise_transaction(&mut self, txid: Txid, fee_delta: i64) {
        let total_delta = {
            let delta = self.map_deltas.entry(txid).or_insert(0);
            *delta += fee_delta;
            *delta
        };

        if let Some(id) = self.arena.get_by_txid(&txid) {
            let base_fee = self.arena.get(id).expect("entry must be live").fee;
            self.arena.update_fee_delta(id, base_fee + total_delta);

            // Ripple the increment through every affected roll-up.
            let ancestors = self
                .calculate_mempool_ancestors(AncestorSeed::Entry(id), &AncestorLimits::unbounded())
                .expect("unbounded ancestor walk cannot fail");
            for &ancestor_id in &ancestors {
                self.arena.update_descendant_state(ancestor_id, 0, fee_delta, 0);
            }

            let mut descendants = HashSet::new();
            self.calculate_descendants(id, &mut descendants);
            descendants.remove(&id);
            for &descendant_id in &descendants {
                self.arena
                    .update_ancestor_state(descendant_id, 0, fee_delta, 0, 0);
            }
        }

        tracing::info!(%txid, fee_delta, total_delta, "Prioritised transaction");
    }

    /// The accumulated delta for `txid`, zero if none.
    pub fn apply_delta(&self, txid: &Txid) -> i64 {
        self.map_deltas.get(txid).copied().unwrap_or(0)
    }

    pub fn clear_prioritisation(&mut self, txid: &Txid) {
        self.map_deltas.remove(txid);
    }

    // --- eviction & fee floor ---

    /// Feed an evicted package feerate into the rolling floor.
    ///
    /// The floor only moves upward. A bump freezes decay until the next
    /// block connects.
    fn track_package_removed(&mut self, package_rate: FeeRate, incremental: FeeRate) {
        let candidate = package_rate.saturating_add(incremental).to_sat_per_kvb() as f64;
        if candidate > self.rolling_minimum_fee_rate {
            self.rolling_minimum_fee_rate = candidate;
            self.block_since_last_rolling_fee_bump = false;
        }
    }

    /// The decaying fee floor for acceptance.
    ///
    /// Halves every [`ROLLING_FEE_HALFLIFE`] seconds; faster when the pool
    /// is far below its size limit. Snaps to zero once below half the
    /// incremental relay fee.
    pub fn get_min_fee(&mut self, sizelimit: usize, now: i64, incremental: FeeRate) -> FeeRate {
        if !self.block_since_last_rolling_fee_bump || self.rolling_minimum_fee_rate == 0.0 {
            return FeeRate::from_sat_per_kvb(self.rolling_minimum_fee_rate.round() as u64);
        }

        if now > self.last_rolling_fee_update + 10 {
            let mut halflife = ROLLING_FEE_HALFLIFE as f64;
            let usage = self.dynamic_memory_usage();
            if usage < sizelimit / 4 {
                halflife /= 4.0;
            } else if usage < sizelimit / 2 {
                halflife /= 2.0;
            }

            let elapsed = (now - self.last_rolling_fee_update) as f64;
            self.rolling_minimum_fee_rate /= 2f64.powf(elapsed / halflife);
            self.last_rolling_fee_update = now;

            if self.rolling_minimum_fee_rate < incremental.to_sat_per_kvb() as f64 / 2.0 {
                self.rolling_minimum_fee_rate = 0.0;
                return FeeRate::ZERO;
            }
        }

        FeeRate::from_sat_per_kvb(self.rolling_minimum_fee_rate.round() as u64).max(incremental)
    }

    /// Evict worst-scored packages until dynamic usage fits `sizelimit`.
    ///
    /// `no_spends_remaining` collects outpoints consumed by evicted
    /// transactions that no longer have any in-pool spender, so the coin
    /// cache can reclaim them.
    pub fn trim_to_size(
        &mut self,
        sizelimit: usize,
        no_spends_remaining: Option<&mut Vec<OutPoint>>,
        incremental: FeeRate,
    ) -> Vec<Arc<Transaction>> {
        let mut removed_txs = Vec::new();
        let mut evicted_packages = 0usize;

        while !self.arena.is_empty() && self.dynamic_memory_usage() > sizelimit {
            let (victim, package_fees, package_size) = {
                let (id, entry) = self
                    .arena
                    .worst_by_descendant_score()
                    .expect("pool is not empty");
                (id, entry.fees_with_descendants, entry.size_with_descendants)
            };

            let package_rate = FeeRate::from_fee_and_size(package_fees, package_size);
            self.track_package_removed(package_rate, incremental);

            let mut stage = HashSet::new();
            self.calculate_descendants(victim, &mut stage);
            evicted_packages += 1;
            removed_txs.extend(self.remove_staged(&stage, false, RemovalReason::SizeLimit));
        }

        if let Some(out) = no_spends_remaining {
            for tx in &removed_txs {
                for input in &tx.input {
                    if self.contains_txid(&input.previous_output.txid) {
                        continue;
                    }
                    if !self.map_next_tx.contains_key(&input.previous_output) {
                        out.push(input.previous_output);
                    }
                }
            }
        }

        if evicted_packages > 0 {
            tracing::info!(
                evicted_packages,
                evicted_txs = removed_txs.len(),
                "Trimmed the pool to its size limit"
            );
        }

        removed_txs
    }

    /// Remove every entry older than `cutoff`, with descendants. Returns
    /// how many entries left and their transactions.
    pub fn expire(&mut self, cutoff: i64) -> (usize, Vec<Arc<Transaction>>) {
        let mut roots = Vec::new();
        for (id, entry) in self.arena.iter_by_entry_time() {
            if entry.time < cutoff {
                roots.push(id);
            } else {
                break;
            }
        }

        let mut stage = HashSet::new();
        for id in roots {
            self.calculate_descendants(id, &mut stage);
        }
        let count = stage.len();
        let removed = self.remove_staged(&stage, false, RemovalReason::Expiry);
        (count, removed)
    }

    /// Expire then trim; the standard cap enforcement after every add and
    /// block event.
    pub fn limit_mempool_size(
        &mut self,
        sizelimit: usize,
        age_seconds: i64,
        now: i64,
        incremental: FeeRate,
    ) -> (Vec<Arc<Transaction>>, Vec<OutPoint>) {
        let (expired, mut removed) = self.expire(now - age_seconds);
        if expired > 0 {
            tracing::info!(expired, "Expired transactions from the pool");
        }

        let mut no_spends = Vec::new();
        removed.extend(self.trim_to_size(sizelimit, Some(&mut no_spends), incremental));
        (removed, no_spends)
    }

    // --- relay ordering helpers ---

    /// Entry handles sorted by ancestor depth, then by mining score.
    pub fn get_sorted_depth_and_score(&self) -> Vec<EntryId> {
        let mut ids: Vec<EntryId> = self.arena.iter().map(|(id, _)| id).collect();
        ids.sort_by(|&a, &b| {
            let ea = self.arena.get(a).expect("entry must be live");
            let eb = self.arena.get(b).expect("entry must be live");
            ea.count_with_ancestors
                .cmp(&eb.count_with_ancestors)
                .then_with(|| Self::compare_score(ea, eb))
        });
        ids
    }

    /// Exact modified-feerate comparison, higher first, txid tiebreak.
    fn compare_score(a: &TxMemPoolEntry, b: &TxMemPoolEntry) -> Ordering {
        let f1 = a.modified_fee as i128 * b.vsize() as i128;
        let f2 = b.modified_fee as i128 * a.vsize() as i128;
        f2.cmp(&f1).then_with(|| b.txid().cmp(&a.txid()))
    }

    /// All resident txids, shallowest and best-paying first.
    pub fn query_hashes(&self) -> Vec<Txid> {
        self.get_sorted_depth_and_score()
            .into_iter()
            .filter_map(|id| self.arena.get(id).map(|entry| entry.txid()))
            .collect()
    }

    /// Relay ordering predicate: true when `a` should be announced before
    /// `b`. A missing `a` loses, a missing `b` wins.
    pub fn compare_depth_and_score(&self, a: &Txid, b: &Txid) -> bool {
        let Some(ea) = self.get_entry(a) else {
            return false;
        };
        let Some(eb) = self.get_entry(b) else {
            return true;
        };
        match ea.count_with_ancestors.cmp(&eb.count_with_ancestors) {
            Ordering::Equal => Self::compare_score(ea, eb) == Ordering::Less,
            ordering => ordering == Ordering::Less,
        }
    }

    // --- self-audit ---

    /// Re-derive every aggregate from scratch and verify the stored state.
    ///
    /// Any mismatch is an internal inconsistency and aborts the process.
    pub fn check(&self, coins: &mut CoinsViewCache) {
        tracing::debug!(
            entries = self.arena.len(),
            claims = self.map_next_tx.len(),
            "Checking pool consistency"
        );

        let mut checked_vsize = 0u64;
        let mut checked_fee = 0i64;
        let mut checked_usage = 0usize;

        for (id, entry) in self.arena.iter() {
            let txid = entry.txid();
            checked_vsize += entry.vsize() as u64;
            checked_fee += entry.fee;
            checked_usage += entry_usage(entry);

            // Direct parents must mirror the consumed outpoints.
            let mut parent_check = HashSet::new();
            for input in &entry.tx.input {
                if let Some(parent_id) = self.arena.get_by_txid(&input.previous_output.txid) {
                    let parent = self.arena.get(parent_id).expect("parent must be live");
                    assert!(
                        (input.previous_output.vout as usize) < parent.tx.output.len(),
                        "{txid} spends nonexistent output of {}",
                        parent.txid(),
                    );
                    parent_check.insert(parent_id);
                } else {
                    assert!(
                        coins.get_coin(&input.previous_output).is_some(),
                        "{txid} spends unavailable coin {}:{}",
                        input.previous_output.txid,
                        input.previous_output.vout,
                    );
                }

                assert_eq!(
                    self.map_next_tx.get(&input.previous_output),
                    Some(&txid),
                    "outpoint claim mismatch for an input of {txid}",
                );
            }
            assert_eq!(
                parent_check, entry.parents,
                "direct parent set of {txid} does not match its inputs",
            );

            // Ancestor roll-ups against a fresh walk.
            let ancestors = self
                .calculate_mempool_ancestors(AncestorSeed::Entry(id), &AncestorLimits::unbounded())
                .expect("unbounded ancestor walk cannot fail");
            let mut count = 1u64;
            let mut size = entry.vsize();
            let mut fees = entry.modified_fee;
            let mut sigops = entry.sigop_cost;
            for &ancestor_id in &ancestors {
                let ancestor = self.arena.get(ancestor_id).expect("ancestor must be live");
                count += 1;
                size += ancestor.vsize();
                fees += ancestor.modified_fee;
                sigops += ancestor.sigop_cost;
            }
            assert_eq!(count, entry.count_with_ancestors, "ancestor count of {txid}");
            assert_eq!(size, entry.size_with_ancestors, "ancestor size of {txid}");
            assert_eq!(fees, entry.fees_with_ancestors, "ancestor fees of {txid}");
            assert_eq!(sigops, entry.sigops_with_ancestors, "ancestor sigops of {txid}");

            // Direct children must mirror the outpoint claims.
            let mut child_check = HashSet::new();
            for vout in 0..entry.tx.output.len() as u32 {
                if let Some(child_txid) = self.map_next_tx.get(&OutPoint::new(txid, vout)) {
                    let child_id = self
                        .arena
                        .get_by_txid(child_txid)
                        .expect("claimed spender must be resident");
                    child_check.insert(child_id);
                }
            }
            assert_eq!(
                child_check, entry.children,
                "direct child set of {txid} does not match the outpoint claims",
            );

            // Descendant roll-ups against a fresh walk.
            let mut descendants = HashSet::new();
            self.calculate_descendants(id, &mut descendants);
            let mut count = 0u64;
            let mut size = 0i64;
            let mut fees = 0i64;
            for &descendant_id in &descendants {
                let descendant = self
                    .arena
                    .get(descendant_id)
                    .expect("descendant must be live");
                count += 1;
                size += descendant.vsize();
                fees += descendant.modified_fee;
            }
            assert_eq!(count, entry.count_with_descendants, "descendant count of {txid}");
            assert_eq!(size, entry.size_with_descendants, "descendant size of {txid}");
            assert_eq!(fees, entry.fees_with_descendants, "descendant fees of {txid}");
        }

        for (outpoint, spender) in &self.map_next_tx {
            let entry = self
                .get_entry(spender)
                .expect("claimed spender must be resident");
            assert!(
                entry
                    .tx
                    .input
                    .iter()
                    .any(|input| input.previous_output == *outpoint),
                "{spender} claims {}:{} without spending it",
                outpoint.txid,
                outpoint.vout,
            );
        }

        assert_eq!(checked_vsize, self.total_vsize, "total vsize drifted");
        assert_eq!(checked_fee, self.total_fee, "total fee drifted");
        assert_eq!(
            checked_usage, self.cached_inner_usage,
            "cached inner usage drifted"
        );
    }
}

impl Default for MemPoolInner {
    fn default() -> Self {
        Self::new()
    }
}
