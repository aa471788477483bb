//! BIP37 `merkleblock` tracking (spec.md §4.8).
//!
//! When an SPV-filtering peer asks for a filtered block, we answer with a
//! `merkleblock` naming the matched transaction ids and then stream the
//! matched `tx` packets that follow it. This module is the "merkle slot":
//! the bookkeeping that knows how many matched transactions are still
//! outstanding, so the dispatch table can flush/close the slot once they've
//! all arrived (or a non-`tx` packet interrupts the stream).

use std::collections::VecDeque;

use crate::wire::header::{BlockHash, TxId};

/// Tracks one `merkleblock` reply's outstanding matched transactions.
pub struct MerkleSlot {
    pub block_hash: BlockHash,
    pending: VecDeque<TxId>,
}

impl MerkleSlot {
    pub fn new(block_hash: BlockHash, matched: Vec<TxId>) -> MerkleSlot {
        MerkleSlot {
            block_hash,
            pending: matched.into(),
        }
    }

    /// Number of matched transactions not yet observed.
    pub fn waiting(&self) -> usize {
        self.pending.len()
    }

    /// Call on every inbound `tx` while a slot is open. Returns `true` once
    /// the slot has collected every matched transaction (spec.md §4.8: "the
    /// count of expected transactions reaches zero").
    pub fn observe_tx(&mut self, tx_id: TxId) -> bool {
        if let Some(pos) = self.pending.iter().position(|t| *t == tx_id) {
            self.pending.remove(pos);
        }
        self.pending.is_empty()
    }
}

/// Per-peer single open merkle slot. A filtering peer has at most one
/// `merkleblock` in flight at a time (spec.md §4.8: "at most one in-flight
/// merkleblock" per peer) — a second `getdata` for a filtered block while
/// one is already streaming replaces the slot rather than queueing behind
/// it, matching a non-`tx` packet's flush (spec.md §4.2's pre-dispatch
/// step 4: a waiting-tx stream is never interleaved with anything else).
#[derive(Default)]
pub struct MerkleTracker {
    slot: Option<MerkleSlot>,
}

impl MerkleTracker {
    pub fn new() -> MerkleTracker {
        MerkleTracker::default()
    }

    /// Opens a new slot, replacing any still-open one. Returns the replaced
    /// slot's hash, if any, for logging/metrics.
    pub fn open(&mut self, slot: MerkleSlot) -> Option<BlockHash> {
        self.slot.replace(slot).map(|s| s.block_hash)
    }

    /// Feed an inbound `tx`. Returns the completed slot's block hash, if
    /// the open slot (if any) just collected its last match.
    pub fn observe_tx(&mut self, tx_id: TxId) -> Option<BlockHash> {
        let slot = self.slot.as_mut()?;
        if slot.observe_tx(tx_id) {
            self.slot.take().map(|s| s.block_hash)
        } else {
            None
        }
    }

    /// Drop the open slot, if any (spec.md §4.2 step 4: "any non-TX packet
    /// flushes pending merkle slots"). Returns its hash, for logging/
    /// metrics.
    pub fn flush(&mut self) -> Option<BlockHash> {
        self.slot.take().map(|s| s.block_hash)
    }

    pub fn is_empty(&self) -> bool {
        self.slot.is_none()
    }
}
