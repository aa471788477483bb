//! BIP152 compact-block reconstruction (spec.md §4.10).

use std::collections::HashMap;
use std::sync::Arc;

use rand::RngCore;
use siphasher::sip::SipHasher13;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::constants::{COMPACT_BLOCK_NONCE_RETRIES, COMPACT_BLOCK_TIMEOUT};
use crate::error::{Error, Result};
use crate::wire::header::{BlockHash, Header};
use crate::wire::message::{CompactBlock, PrefilledTransaction};

/// A partially reconstructed compact block awaiting `blocktxn`.
pub struct CompactBlockSlot {
    pub header: Header,
    pub short_ids: Vec<u64>,
    pub nonce: u64,
    pub prefilled: Vec<PrefilledTransaction>,
    /// Transactions filled in so far, by short-id position.
    pub filled: HashMap<u64, Vec<u8>>,
    timeout: Option<JoinHandle<()>>,
}

/// The peer's table of in-flight compact blocks, keyed by block hash
/// (spec.md §3, §4.10).
pub struct CompactBlockTable {
    slots: Mutex<HashMap<BlockHash, CompactBlockSlot>>,
}

impl CompactBlockTable {
    pub fn new() -> Arc<CompactBlockTable> {
        Arc::new(CompactBlockTable {
            slots: Mutex::new(HashMap::new()),
        })
    }

    /// On `cmpctblock`: reject duplicates, otherwise open a slot with a
    /// 10s eviction timer armed by the caller (since only the caller knows
    /// how to emit the upward eviction notice).
    pub async fn insert(
        &self,
        hash: BlockHash,
        block: &CompactBlock,
        on_evict: impl FnOnce() + Send + 'static,
    ) -> Result<()> {
        let mut slots = self.slots.lock().await;
        if slots.contains_key(&hash) {
            return Err(Error::protocol(
                "duplicate cmpctblock for in-flight hash",
                0,
                None,
            ));
        }
        let timeout = tokio::spawn(async move {
            tokio::time::sleep(COMPACT_BLOCK_TIMEOUT).await;
            on_evict();
        });
        slots.insert(
            hash,
            CompactBlockSlot {
                header: block.header.clone(),
                short_ids: block.short_ids.clone(),
                nonce: block.nonce,
                prefilled: block.prefilled_txns.clone(),
                filled: HashMap::new(),
                timeout: Some(timeout),
            },
        );
        Ok(())
    }

    pub async fn evict(&self, hash: BlockHash) {
        if let Some(mut slot) = self.slots.lock().await.remove(&hash) {
            if let Some(t) = slot.timeout.take() {
                t.abort();
            }
        }
    }

    /// Attempt to fill a slot's short ids from `known`, a mempool-sourced
    /// map of short-id to tx bytes computed by the caller (the siphash
    /// keyed by `slot.nonce` is the caller's job, since it needs access to
    /// the mempool's full tx set). Returns `Some(total tx count)` if
    /// complete.
    pub async fn try_fill(&self, hash: BlockHash, known: &HashMap<u64, Vec<u8>>) -> Option<usize> {
        let mut slots = self.slots.lock().await;
        let slot = slots.get_mut(&hash)?;
        for (short_id, bytes) in known {
            slot.filled.entry(*short_id).or_insert_with(|| bytes.clone());
        }
        if slot.filled.len() + slot.prefilled.len() >= slot.short_ids.len() + slot.prefilled.len()
            && slot.short_ids.iter().all(|id| slot.filled.contains_key(id))
        {
            Some(slot.short_ids.len() + slot.prefilled.len())
        } else {
            None
        }
    }

    pub async fn take(&self, hash: BlockHash) -> Option<CompactBlockSlot> {
        let mut slot = self.slots.lock().await.remove(&hash)?;
        if let Some(t) = slot.timeout.take() {
            t.abort();
        }
        Some(slot)
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }
}

/// Computes a BIP152 short transaction id for `tx_bytes` under the given
/// block nonce, keyed the way BIP152 specifies: SipHash-1-3 with keys
/// derived from `SHA256(header || nonce)`. The peer is only given
/// precomputed tx bytes, not a SHA256 primitive (out of scope per
/// spec.md §1), so callers pass in the already-derived 128-bit siphash
/// key material via `key0`/`key1`.
pub fn short_id(key0: u64, key1: u64, tx_bytes: &[u8]) -> u64 {
    use std::hash::Hasher;
    let mut hasher = SipHasher13::new_with_keys(key0, key1);
    hasher.write(tx_bytes);
    hasher.finish() & 0x0000_FFFF_FFFF_FFFF
}

/// Construct a fresh compact-block nonce, retrying up to
/// `COMPACT_BLOCK_NONCE_RETRIES` times if `try_build` reports a short-id
/// collision, per the bounded-retry Open Question resolution in spec.md §9.
pub fn build_with_retry<T>(
    mut try_build: impl FnMut(u64) -> std::result::Result<T, ()>,
) -> Result<T> {
    for _ in 0..COMPACT_BLOCK_NONCE_RETRIES {
        let nonce = rand::thread_rng().next_u64();
        if let Ok(block) = try_build(nonce) {
            return Ok(block);
        }
    }
    Err(Error::internal(
        "exhausted retries constructing compact block (short-id collisions)",
        None,
    ))
}

/// Async counterpart of [`build_with_retry`], for builders that need to
/// call through `Chain` (to derive the per-nonce SipHash key material) on
/// every attempt rather than computing everything up front.
pub async fn build_with_retry_async<T, F, Fut>(mut try_build: F) -> Result<T>
where
    F: FnMut(u64) -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, ()>>,
{
    for _ in 0..COMPACT_BLOCK_NONCE_RETRIES {
        let nonce = rand::thread_rng().next_u64();
        if let Ok(block) = try_build(nonce).await {
            return Ok(block);
        }
    }
    Err(Error::internal(
        "exhausted retries constructing compact block (short-id collisions)",
        None,
    ))
}

/// Builds the short-id list for `txs` (skipping `skip_first`, the
/// coinbase, which always travels prefilled) under the given SipHash
/// keys, rejecting the attempt if any two short ids collide — the
/// retryable condition `build_with_retry_async` loops on.
pub fn short_ids_for(key0: u64, key1: u64, txs: &[Vec<u8>]) -> std::result::Result<Vec<u64>, ()> {
    let mut ids = Vec::with_capacity(txs.len());
    let mut seen = std::collections::HashSet::with_capacity(txs.len());
    for tx in txs {
        let id = short_id(key0, key1, tx);
        if !seen.insert(id) {
            return Err(());
        }
        ids.push(id);
    }
    Ok(ids)
}
