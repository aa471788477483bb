//! Probabilistic filters: the peer's rolling address/inventory dedup
//! filters, and the remote-supplied BIP37 SPV filter.
//!
//! The rolling filters are purely local bookkeeping, so they use the
//! `bloomfilter` crate's own internal hashing (enrichment pick — neither
//! the teacher nor the rest of the pack implements a bloom filter, spec.md
//! §3 just specifies the sizing). The SPV filter is different: its bits
//! were built by the *remote* peer following BIP37's fixed MurmurHash3
//! scheme, so this crate implements that scheme directly rather than via
//! a generic bloom filter type.

use bloomfilter::Bloom;

use crate::constants::{
    ADDR_FILTER_FP_RATE, ADDR_FILTER_ITEMS, INV_FILTER_FP_RATE, INV_FILTER_ITEMS,
    MAX_BLOOM_FILTER_SIZE, MAX_BLOOM_HASH_FUNCS,
};
use crate::wire::types::{Filter, Tweak};

/// A rolling filter used to deduplicate our own outbound announcements to
/// one peer (spec.md §3: "an inventory filter ... to suppress redundant
/// inv/tx/block sends per peer", and the address filter analogue).
pub struct RollingFilter {
    bloom: Bloom<[u8]>,
}

impl RollingFilter {
    pub fn new(items_count: usize, fp_rate: f64) -> RollingFilter {
        RollingFilter {
            bloom: Bloom::new_for_fp_rate(items_count.max(1), fp_rate),
        }
    }

    pub fn addr_filter() -> RollingFilter {
        RollingFilter::new(ADDR_FILTER_ITEMS, ADDR_FILTER_FP_RATE)
    }

    pub fn inv_filter() -> RollingFilter {
        RollingFilter::new(INV_FILTER_ITEMS, INV_FILTER_FP_RATE)
    }

    /// Returns `true` if `item` was already present (and leaves it set
    /// either way) — the add-and-test-in-one-step pattern §4.4's
    /// `sendInv`/`announce` dedup relies on.
    pub fn contains_or_insert(&mut self, item: &[u8]) -> bool {
        self.bloom.check_and_set(item)
    }

    pub fn contains(&self, item: &[u8]) -> bool {
        self.bloom.check(item)
    }

    pub fn insert(&mut self, item: &[u8]) {
        self.bloom.set(item);
    }
}

/// BIP37 SPV filter, as declared by a remote peer via `filterload` and
/// mutated by `filteradd`/`filterclear` (spec.md §4.8).
#[derive(Clone)]
pub struct SpvFilter {
    bits: Vec<u8>,
    hash_functions_count: u32,
    tweak: u32,
    /// BIP37 `nFlags`: 0 = never update, 1 = update all, 2 = update
    /// P2PKH-only. The flag's *meaning* belongs to the chain/tx matching
    /// logic the chain collaborator owns; the peer only stores it.
    pub flags: u8,
}

impl SpvFilter {
    pub fn new(filter: Filter, hash_functions_count: u32, tweak: Tweak, flags: u8) -> SpvFilter {
        SpvFilter {
            bits: filter.0,
            hash_functions_count,
            tweak: tweak.0,
            flags,
        }
    }

    /// The `filterload` message that would install this filter on a peer,
    /// used when we are ourselves an SPV client pushing our own filter
    /// (spec.md §4.1 "Ready" actions: "push our bloom filter, if any").
    pub fn to_filterload(&self) -> crate::wire::message::Message {
        crate::wire::message::Message::FilterLoad {
            filter: Filter(self.bits.clone()),
            hash_functions_count: self.hash_functions_count,
            tweak: Tweak(self.tweak),
            flags: self.flags,
        }
    }

    /// Validate BIP37 size constraints (spec.md §4.8, §4.11): oversized
    /// filters or hash-function counts are a ban-worthy protocol violation,
    /// not silently clamped.
    pub fn validate(filter: &Filter, hash_functions_count: u32) -> bool {
        !filter.0.is_empty()
            && filter.0.len() <= MAX_BLOOM_FILTER_SIZE
            && hash_functions_count <= MAX_BLOOM_HASH_FUNCS
    }

    pub fn add(&mut self, data: &[u8]) {
        if self.bits.is_empty() {
            return;
        }
        for i in 0..self.hash_functions_count {
            let idx = self.bit_index(data, i);
            self.bits[idx / 8] |= 1 << (7 - (idx % 8));
        }
    }

    pub fn contains(&self, data: &[u8]) -> bool {
        if self.bits.is_empty() {
            return false;
        }
        (0..self.hash_functions_count).all(|i| {
            let idx = self.bit_index(data, i);
            self.bits[idx / 8] & (1 << (7 - (idx % 8))) != 0
        })
    }

    fn bit_index(&self, data: &[u8], hash_num: u32) -> usize {
        let seed = hash_num.wrapping_mul(0xFBA4_C795).wrapping_add(self.tweak);
        let h = murmur3_32(data, seed);
        (h as usize) % (self.bits.len() * 8)
    }
}

/// MurmurHash3 (x86, 32-bit), per BIP37's hashing scheme.
fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mut hash = seed;
    let chunks = data.chunks_exact(4);
    let tail = chunks.remainder();

    for chunk in chunks {
        let mut k = u32::from_le_bytes(chunk.try_into().unwrap());
        k = k.wrapping_mul(C1);
        k = k.rotate_left(15);
        k = k.wrapping_mul(C2);

        hash ^= k;
        hash = hash.rotate_left(13);
        hash = hash.wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let mut k1: u32 = 0;
    for (i, byte) in tail.iter().enumerate().rev() {
        k1 ^= (*byte as u32) << (8 * i);
    }
    if !tail.is_empty() {
        k1 = k1.wrapping_mul(C1);
        k1 = k1.rotate_left(15);
        k1 = k1.wrapping_mul(C2);
        hash ^= k1;
    }

    hash ^= data.len() as u32;
    hash ^= hash >> 16;
    hash = hash.wrapping_mul(0x85eb_ca6b);
    hash ^= hash >> 13;
    hash = hash.wrapping_mul(0xc2b2_ae35);
    hash ^= hash >> 16;
    hash
}
