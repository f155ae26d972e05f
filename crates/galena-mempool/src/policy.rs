//! Replacement policy.
//!
//! The pool treats replaceability as an injected predicate; [`Bip125Policy`]
//! is the stock implementation enforcing the BIP125 rules:
//! 1. every directly conflicting transaction signals replaceability
//! 2. the replacement introduces no new unconfirmed inputs
//! 3. it pays a higher absolute fee than everything it displaces
//! 4. it pays for its own bandwidth at the minimum relay rate
//! 5. it pays for the displaced bandwidth as well
//! 6. it displaces at most a bounded number of transactions

use crate::error::MempoolError;
use crate::inner::MemPoolInner;
use crate::options::MemPoolOptions;
use crate::types::{ConflictSet, EntryId};
use bitcoin::{Transaction, Txid};
use std::collections::HashSet;

/// Decides whether an incoming transaction may displace the residents it
/// conflicts with.
pub trait ReplacementPolicy: Send + Sync {
    /// Evaluate the replacement. `direct_conflicts` are the resident
    /// transactions spending the same outpoints as `tx`. On success the
    /// returned set names everything to evict.
    fn may_replace(
        &self,
        tx: &Transaction,
        modified_fee: i64,
        vsize: i64,
        direct_conflicts: &HashSet<Txid>,
        inner: &MemPoolInner,
        options: &MemPoolOptions,
    ) -> Result<ConflictSet, MempoolError>;
}

/// The BIP125 rules.
#[derive(Debug, Default, Clone)]
pub struct Bip125Policy;

impl ReplacementPolicy for Bip125Policy {
    fn may_replace(
        &self,
        tx: &Transaction,
        modified_fee: i64,
        vsize: i64,
        direct_conflicts: &HashSet<Txid>,
        inner: &MemPoolInner,
        options: &MemPoolOptions,
    ) -> Result<ConflictSet, MempoolError> {
        let mut direct: HashSet<EntryId> = HashSet::new();
        for txid in direct_conflicts {
            if let Some(id) = inner.arena.get_by_txid(txid) {
                direct.insert(id);
            }
        }

        if direct.is_empty() {
            return Err(MempoolError::NoConflictToReplace);
        }

        // Everything to displace: the conflicts and their descendants.
        let mut all_conflicts = HashSet::new();
        for &conflict_id in &direct {
            inner.calculate_descendants(conflict_id, &mut all_conflicts);
        }

        // Rule 6, checked early to bound the work below.
        if all_conflicts.len() > options.max_replacement_candidates {
            return Err(MempoolError::TooManyReplacements(
                all_conflicts.len(),
                options.max_replacement_candidates,
            ));
        }

        // Rule 1.
        for &conflict_id in &direct {
            let entry = inner
                .arena
                .get(conflict_id)
                .expect("conflict handle must be live");
            if !entry.signals_rbf() {
                return Err(MempoolError::TxNotReplaceable);
            }
        }

        let mut replaced_fees: i64 = 0;
        let mut replaced_size: i64 = 0;
        for &conflict_id in &all_conflicts {
            let entry = inner
                .arena
                .get(conflict_id)
                .expect("conflict handle must be live");
            replaced_fees = replaced_fees
                .checked_add(entry.modified_fee)
                .ok_or(MempoolError::FeeOverflow)?;
            replaced_size += entry.vsize();
        }

        // Rule 2. An input funded by a transaction being displaced would be
        // left dangling, so that is rejected outright as well.
        for input in &tx.input {
            if let Some(parent_id) = inner.arena.get_by_txid(&input.previous_output.txid) {
                if all_conflicts.contains(&parent_id) {
                    return Err(MempoolError::SpendsConflictingOutput);
                }
                return Err(MempoolError::NewUnconfirmedInput);
            }
        }

        // Rule 3.
        if modified_fee <= replaced_fees {
            return Err(MempoolError::InsufficientFee(format!(
                "replacement fee {modified_fee} <= replaced fees {replaced_fees}",
            )));
        }
        let additional_fee = modified_fee - replaced_fees;

        // Rule 4.
        let own_bandwidth_fee = options.min_relay_feerate.fee_for(vsize);
        if additional_fee < own_bandwidth_fee {
            return Err(MempoolError::InsufficientFee(format!(
                "additional fee {additional_fee} does not pay for own bandwidth ({own_bandwidth_fee})",
            )));
        }

        // Rule 5.
        let replaced_bandwidth_fee = options.min_relay_feerate.fee_for(replaced_size);
        if additional_fee < replaced_bandwidth_fee {
            return Err(MempoolError::InsufficientFee(format!(
                "additional fee {additional_fee} does not pay for replaced bandwidth ({replaced_bandwidth_fee})",
            )));
        }

        Ok(ConflictSet {
            direct_conflicts: direct,
            all_conflicts,
            replaced_fees,
            replaced_size,
        })
    }
}
