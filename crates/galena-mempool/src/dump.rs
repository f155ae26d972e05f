//! Versioned dump/load of the pool contents.
//!
//! Layout, in order: u64 version, u64 entry count, then per entry the
//! consensus-serialized transaction, the i64 acceptance time and the i64
//! fee delta; finally the residual delta map as (txid, amount) pairs.
//! Everything uses consensus integer encoding.

use crate::error::MempoolError;
use crate::inner::MemPoolInner;
use bitcoin::Txid;
use bitcoin::consensus::{Decodable, Encodable};
use bitcoin::Transaction;
use std::collections::HashMap;
use std::io::{Read, Write};

/// Version tag written at the head of every dump.
pub const MEMPOOL_DUMP_VERSION: u64 = 1;

/// One record recovered from a dump.
pub struct DumpedEntry {
    pub tx: Transaction,
    pub time: i64,
    pub fee_delta: i64,
}

/// Counters reported after a load.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoadStats {
    pub accepted: usize,
    pub failed: usize,
    pub expired: usize,
}

fn encode_into(buffer: &mut Vec<u8>, value: &impl Encodable) {
    value
        .consensus_encode(buffer)
        .expect("writing to a Vec cannot fail");
}

fn decode_from<T: Decodable>(cursor: &mut &[u8]) -> Result<T, MempoolError> {
    T::consensus_decode(cursor).map_err(|e| MempoolError::BadDumpFormat(e.to_string()))
}

/// Serialize the pool contents.
pub fn dump<W: Write>(inner: &MemPoolInner, writer: &mut W) -> Result<(), MempoolError> {
    let mut buffer = Vec::new();

    encode_into(&mut buffer, &MEMPOOL_DUMP_VERSION);
    encode_into(&mut buffer, &(inner.size() as u64));

    let mut residual_deltas: HashMap<Txid, i64> = inner.map_deltas.clone();

    for id in inner.get_sorted_depth_and_score() {
        let entry = match inner.arena.get(id) {
            Some(entry) => entry,
            None => continue,
        };
        encode_into(&mut buffer, entry.tx.as_ref());
        encode_into(&mut buffer, &entry.time);
        encode_into(&mut buffer, &(entry.modified_fee - entry.fee));
        residual_deltas.remove(&entry.txid());
    }

    encode_into(&mut buffer, &(residual_deltas.len() as u64));
    for (txid, amount) in residual_deltas {
        encode_into(&mut buffer, &txid);
        encode_into(&mut buffer, &amount);
    }

    writer.write_all(&buffer)?;
    Ok(())
}

/// Read the records of a dump, verifying the version tag.
///
/// The caller replays each record through the acceptance path and applies
/// the residual deltas returned at the end.
pub fn read_dump<R: Read>(
    reader: &mut R,
) -> Result<(Vec<DumpedEntry>, Vec<(Txid, i64)>), MempoolError> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    let mut cursor: &[u8] = &bytes;

    let version: u64 = decode_from(&mut cursor)?;
    if version != MEMPOOL_DUMP_VERSION {
        return Err(MempoolError::BadDumpFormat(format!(
            "unsupported dump version {version}",
        )));
    }

    let count: u64 = decode_from(&mut cursor)?;

    let mut entries = Vec::with_capacity(count.min(100_000) as usize);
    for _ in 0..count {
        let tx: Transaction = decode_from(&mut cursor)?;
        let time: i64 = decode_from(&mut cursor)?;
        let fee_delta: i64 = decode_from(&mut cursor)?;
        entries.push(DumpedEntry {
            tx,
            time,
            fee_delta,
        });
    }

    let delta_count: u64 = decode_from(&mut cursor)?;
    let mut deltas = Vec::with_capacity(delta_count.min(100_000) as usize);
    for _ in 0..delta_count {
        let txid: Txid = decode_from(&mut cursor)?;
        let amount: i64 = decode_from(&mut cursor)?;
        deltas.push((txid, amount));
    }

    Ok((entries, deltas))
}
