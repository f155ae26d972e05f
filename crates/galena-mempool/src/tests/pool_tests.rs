//! Aggregate bookkeeping, chain limits and query surfaces.

use super::*;
use crate::MempoolError;

/// A chain A <- B: both directions of the roll-ups must see the other end.
#[test]
fn simple_chain_aggregates() {
    let t = setup();
    let utxo = fund(&t.view, 1, 100_000);

    let tx_a = spend(utxo, 100_000, 1000);
    let txid_a = tx_a.compute_txid();
    let vsize_a = tx_a.weight().to_vbytes_ceil() as i64;

    let tx_b = spend(OutPoint::new(txid_a, 0), 99_000, 500);
    let txid_b = tx_b.compute_txid();
    let vsize_b = tx_b.weight().to_vbytes_ceil() as i64;

    t.pool.accept_transaction(tx_a).unwrap();
    t.pool.accept_transaction(tx_b).unwrap();
    assert_mempool_size(&t.pool, 2);

    {
        let inner = t.pool.inner.read().unwrap();
        let a = inner.get_entry(&txid_a).unwrap();
        assert_eq!(a.count_with_descendants, 2);
        assert_eq!(a.size_with_descendants, vsize_a + vsize_b);
        assert_eq!(a.fees_with_descendants, 1500);
        assert_eq!(a.count_with_ancestors, 1);

        let b = inner.get_entry(&txid_b).unwrap();
        assert_eq!(b.count_with_ancestors, 2);
        assert_eq!(b.size_with_ancestors, vsize_a + vsize_b);
        assert_eq!(b.fees_with_ancestors, 1500);
        assert_eq!(b.count_with_descendants, 1);
    }

    assert_pool_consistent(&t);
}

/// Adding then removing a transaction restores the pre-add state.
#[test]
fn add_then_remove_is_idempotent() {
    let t = setup();
    let utxo = fund(&t.view, 1, 100_000);

    let usage_before = t.pool.dynamic_memory_usage();
    let vsize_before = t.pool.total_vsize();

    let tx = spend(utxo, 100_000, 1000);
    t.pool.accept_transaction(tx.clone()).unwrap();
    assert_mempool_size(&t.pool, 1);
    assert!(t.pool.is_spent(&utxo));

    t.pool.remove_recursive(&tx, crate::RemovalReason::Unknown);

    assert_mempool_size(&t.pool, 0);
    assert!(!t.pool.is_spent(&utxo));
    assert_eq!(t.pool.total_vsize(), vsize_before);
    assert_eq!(t.pool.total_fees(), 0);
    assert_eq!(t.pool.dynamic_memory_usage(), usage_before);
    assert_pool_consistent(&t);
}

/// Recursive removal of a parent takes the whole descendant closure.
#[test]
fn remove_recursive_takes_descendants() {
    let t = setup();
    let utxo = fund(&t.view, 1, 100_000);

    let tx_a = spend(utxo, 100_000, 1000);
    let txid_a = tx_a.compute_txid();
    let tx_b = spend(OutPoint::new(txid_a, 0), 99_000, 500);
    let tx_c = spend(OutPoint::new(tx_b.compute_txid(), 0), 98_500, 500);

    t.pool.accept_transaction(tx_a.clone()).unwrap();
    t.pool.accept_transaction(tx_b).unwrap();
    t.pool.accept_transaction(tx_c).unwrap();
    assert_mempool_size(&t.pool, 3);

    t.pool.remove_recursive(&tx_a, crate::RemovalReason::Unknown);
    assert_mempool_size(&t.pool, 0);
    assert_pool_consistent(&t);
}

/// A chain of 25 is accepted in full; the 26th link trips the ancestor
/// bound without touching any resident aggregates.
#[test]
fn ancestor_limit_boundary() {
    let t = setup();
    let mut outpoint = fund(&t.view, 1, 10_000_000);
    let mut value = 10_000_000u64;
    let mut root_txid = None;

    for _ in 0..25 {
        let tx = spend(outpoint, value, 1000);
        outpoint = OutPoint::new(tx.compute_txid(), 0);
        value -= 1000;
        root_txid.get_or_insert(tx.compute_txid());
        t.pool.accept_transaction(tx).unwrap();
    }
    assert_mempool_size(&t.pool, 25);

    let root_txid = root_txid.unwrap();
    let root_descendants_before = {
        let inner = t.pool.inner.read().unwrap();
        inner.get_entry(&root_txid).unwrap().count_with_descendants
    };
    assert_eq!(root_descendants_before, 25);

    let overflow = spend(outpoint, value, 1000);
    let err = t.pool.accept_transaction(overflow).unwrap_err();
    assert!(matches!(err, MempoolError::TooManyUnconfirmedAncestors(25)));
    assert!(err.to_string().contains("too many unconfirmed ancestors"));

    assert_mempool_size(&t.pool, 25);
    let root_descendants_after = {
        let inner = t.pool.inner.read().unwrap();
        inner.get_entry(&root_txid).unwrap().count_with_descendants
    };
    assert_eq!(root_descendants_after, root_descendants_before);
    assert_pool_consistent(&t);
}

/// The descendant-side bound protects an ancestor's package from being
/// overextended by one more child.
#[test]
fn descendant_limit_refuses_fanout() {
    let t = setup_with_options(
        MemPoolOptions::builder()
            .min_relay_feerate(0)
            .max_descendant_count(3)
            .build(),
    );
    let utxo = fund(&t.view, 1, 100_000);

    // Parent with three outputs, then children spending them one by one.
    let parent = TxBuilder::new()
        .input(utxo, 0xffff_fffd)
        .output(30_000)
        .output(30_000)
        .output(30_000)
        .build();
    let parent_txid = parent.compute_txid();
    t.pool.accept_transaction(parent).unwrap();

    for vout in 0..2 {
        let child = spend(OutPoint::new(parent_txid, vout), 30_000, 500);
        t.pool.accept_transaction(child).unwrap();
    }

    // Parent now counts 3 with descendants; one more child would make 4.
    let child = spend(OutPoint::new(parent_txid, 2), 30_000, 500);
    let err = t.pool.accept_transaction(child).unwrap_err();
    assert!(matches!(err, MempoolError::TooManyDescendants(txid, 3) if txid == parent_txid));
    assert_mempool_size(&t.pool, 3);
    assert_pool_consistent(&t);
}

/// Duplicate submissions and unknown inputs are refused up front.
#[test]
fn duplicate_and_missing_inputs() {
    let t = setup();
    let utxo = fund(&t.view, 1, 100_000);

    let tx = spend(utxo, 100_000, 1000);
    t.pool.accept_transaction(tx.clone()).unwrap();

    let err = t.pool.accept_transaction(tx).unwrap_err();
    assert!(matches!(err, MempoolError::AlreadyInMempool));

    let orphan = spend(
        OutPoint::new(Txid::from_byte_array([0x42; 32]), 0),
        50_000,
        500,
    );
    let err = t.pool.accept_transaction(orphan).unwrap_err();
    assert!(matches!(err, MempoolError::MissingInputs { .. }));
}

/// An operator delta reorders mining and ripples through the roll-ups of
/// relatives, without changing the true fee.
#[test]
fn prioritise_transaction_reorders_and_ripples() {
    let t = setup();
    let utxo_a = fund(&t.view, 1, 100_000);
    let utxo_b = fund(&t.view, 2, 100_000);

    let cheap = spend(utxo_a, 100_000, 100);
    let cheap_txid = cheap.compute_txid();
    let cheap_child = spend(OutPoint::new(cheap_txid, 0), 99_900, 100);
    let cheap_child_txid = cheap_child.compute_txid();
    let rich = spend(utxo_b, 100_000, 5_000);
    let rich_txid = rich.compute_txid();

    t.pool.accept_transaction(cheap).unwrap();
    t.pool.accept_transaction(cheap_child).unwrap();
    t.pool.accept_transaction(rich).unwrap();

    let order = t.pool.iter_txids_by_mining_score();
    assert_eq!(order[0].0, rich_txid);

    t.pool.prioritise_transaction(cheap_txid, 50_000);
    assert_eq!(t.pool.apply_delta(&cheap_txid), 50_000);

    let order = t.pool.iter_txids_by_mining_score();
    assert_eq!(order[0].0, cheap_txid);

    {
        let inner = t.pool.inner.read().unwrap();
        // The true fee is untouched; ordering state carries the delta.
        let entry = inner.get_entry(&cheap_txid).unwrap();
        assert_eq!(entry.fee, 100);
        assert_eq!(entry.modified_fee, 50_100);
        // The child's ancestor fees include the delta.
        let child = inner.get_entry(&cheap_child_txid).unwrap();
        assert_eq!(child.fees_with_ancestors, 50_100 + 100);
    }
    assert_pool_consistent(&t);

    t.pool.clear_prioritisation(&cheap_txid);
    assert_eq!(t.pool.apply_delta(&cheap_txid), 0);
}

/// A delta recorded before arrival applies on entry.
#[test]
fn prioritise_before_arrival() {
    let t = setup();
    let utxo = fund(&t.view, 1, 100_000);
    let tx = spend(utxo, 100_000, 100);
    let txid = tx.compute_txid();

    t.pool.prioritise_transaction(txid, 7_000);
    t.pool.accept_transaction(tx).unwrap();

    let inner = t.pool.inner.read().unwrap();
    let entry = inner.get_entry(&txid).unwrap();
    assert_eq!(entry.fee, 100);
    assert_eq!(entry.modified_fee, 7_100);
}

/// Contract transactions rank by their declared gas price in the fifth
/// order only.
#[test]
fn gas_price_order_at_pool_level() {
    let chain = Arc::new(MockChain::new(200, 2_000_000_000));
    let view = Arc::new(MockCoinView::new());
    let oracle = Arc::new(MockOracle::default());
    let pool = MemPool::with_options(
        chain,
        view.clone(),
        MemPoolOptions::builder().min_relay_feerate(0).build(),
    )
    .with_contract_oracle(oracle.clone());

    let utxo_a = fund(&view, 1, 100_000);
    let utxo_b = fund(&view, 2, 100_000);

    let plain = spend(utxo_a, 100_000, 10_000);
    let plain_txid = plain.compute_txid();
    let contract = spend(utxo_b, 100_000, 100);
    let contract_txid = contract.compute_txid();

    // Contract pays almost nothing in fees but declares a huge gas price.
    oracle.set_gas_price(contract_txid, 10_000_000);

    pool.accept_transaction(plain).unwrap();
    pool.accept_transaction(contract).unwrap();

    let inner = pool.inner.read().unwrap();
    let gas_order: Vec<Txid> = inner
        .arena
        .iter_by_ancestor_score_or_gas_price()
        .map(|(_, e)| e.txid())
        .collect();
    assert_eq!(gas_order, vec![contract_txid, plain_txid]);

    let plain_order: Vec<Txid> = inner
        .arena
        .iter_by_ancestor_score()
        .map(|(_, e)| e.txid())
        .collect();
    assert_eq!(plain_order, vec![plain_txid, contract_txid]);
}

/// Depth-then-score ordering drives the relay surfaces.
#[test]
fn query_hashes_orders_by_depth_then_score() {
    let t = setup();
    let utxo = fund(&t.view, 1, 100_000);
    let utxo_b = fund(&t.view, 2, 100_000);

    let parent = spend(utxo, 100_000, 500);
    let parent_txid = parent.compute_txid();
    let child = spend(OutPoint::new(parent_txid, 0), 99_500, 2_000);
    let child_txid = child.compute_txid();
    let rich_single = spend(utxo_b, 100_000, 10_000);
    let rich_txid = rich_single.compute_txid();

    t.pool.accept_transaction(parent).unwrap();
    t.pool.accept_transaction(child).unwrap();
    t.pool.accept_transaction(rich_single).unwrap();

    let hashes = t.pool.query_hashes();
    // Depth 1 entries first (rich one outranks the cheap parent), then the
    // depth-2 child.
    assert_eq!(hashes, vec![rich_txid, parent_txid, child_txid]);

    assert!(t.pool.compare_depth_and_score(&rich_txid, &parent_txid));
    assert!(!t.pool.compare_depth_and_score(&child_txid, &parent_txid));
}

#[test]
fn misc_query_surfaces() {
    let t = setup();
    let utxo = fund(&t.view, 1, 100_000);

    let tx = spend(utxo, 100_000, 1000);
    let txid = tx.compute_txid();
    let child = spend(OutPoint::new(txid, 0), 99_000, 500);

    t.pool.accept_transaction(tx.clone()).unwrap();
    t.pool.accept_transaction(child.clone()).unwrap();

    assert!(t.pool.has_no_inputs_of(&tx));
    assert!(!t.pool.has_no_inputs_of(&child));

    assert!(t.pool.transaction_within_chain_limit(&txid, 2));
    assert!(!t.pool.transaction_within_chain_limit(&txid, 1));

    let info = t.pool.info(&txid).unwrap();
    assert_eq!(info.fee_delta, 0);
    assert_eq!(info.tx.compute_txid(), txid);

    let all = t.pool.info_all();
    assert_eq!(all.len(), 2);

    assert!(t.pool.get_transaction(&txid).is_some());
    assert_eq!(t.pool.total_fees(), 1500);
}

/// Broadcast tracking: accepted entries are pending until marked.
#[test]
fn unbroadcast_tracking() {
    let t = setup();
    let utxo = fund(&t.view, 1, 100_000);
    let tx = spend(utxo, 100_000, 1000);
    let txid = tx.compute_txid();

    t.pool.accept_transaction(tx).unwrap();

    let pending = t.pool.pending_broadcast_txs();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].0, txid);

    t.pool.mark_broadcast_txs(&[txid]);
    assert!(t.pool.pending_broadcast_txs().is_empty());
}

/// Dump and reload: entries and deltas survive, replayed entries do not
/// feed estimators.
#[test]
fn dump_and_load_round_trip() {
    let t = setup();
    let utxo_a = fund(&t.view, 1, 100_000);
    let utxo_b = fund(&t.view, 2, 100_000);

    let tx_a = spend(utxo_a, 100_000, 1000);
    let txid_a = tx_a.compute_txid();
    let tx_b = spend(utxo_b, 100_000, 2000);
    let txid_b = tx_b.compute_txid();

    t.pool.accept_transaction(tx_a).unwrap();
    t.pool.accept_transaction(tx_b).unwrap();
    t.pool.prioritise_transaction(txid_a, 4_000);
    // A delta for a transaction the pool has never seen.
    let ghost_txid = Txid::from_byte_array([0x77; 32]);
    t.pool.prioritise_transaction(ghost_txid, 1_234);

    let mut buffer = Vec::new();
    t.pool.dump(&mut buffer).unwrap();

    // Restore into a fresh pool over the same chain view.
    let restored = setup();
    restored.view.add_utxo(utxo_a, create_coin(100_000, 1, false));
    restored.view.add_utxo(utxo_b, create_coin(100_000, 1, false));

    let observer = Arc::new(RecordingObserver::default());
    restored.pool.register_observer(observer.clone());

    let stats = restored.pool.load(&mut &buffer[..]).unwrap();
    assert_eq!(stats.accepted, 2);
    assert_eq!(stats.failed, 0);

    assert_in_mempool(&restored.pool, &txid_a);
    assert_in_mempool(&restored.pool, &txid_b);
    assert_eq!(restored.pool.apply_delta(&txid_a), 4_000);
    assert_eq!(restored.pool.apply_delta(&ghost_txid), 1_234);

    // Replayed entries must be flagged as unusable for fee estimation.
    let events = observer.events.lock().unwrap();
    assert_eq!(events.iter().filter(|(_, e)| e == "added:false").count(), 2);

    assert_pool_consistent(&restored);
}

/// A corrupted version tag is refused.
#[test]
fn load_rejects_bad_version() {
    let t = setup();
    let mut buffer = Vec::new();
    t.pool.dump(&mut buffer).unwrap();
    buffer[0] = 0xff;

    let err = t.pool.load(&mut &buffer[..]).unwrap_err();
    assert!(matches!(err, MempoolError::BadDumpFormat(_)));
}
