//! Minimal block/transaction identifiers and header shapes.
//!
//! The chain and mempool are external collaborators (spec.md §1); this
//! module defines only the value types the peer passes across that
//! boundary, not a consensus implementation. Field layout follows
//! `zebra-chain::block::header` and `zebra-chain::block::hash`.

use std::fmt;

/// A double-SHA256 block hash.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct BlockHash(pub [u8; 32]);

/// A double-SHA256 transaction id (the non-witness txid).
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct TxId(pub [u8; 32]);

macro_rules! impl_hash_debug {
    ($t:ty) => {
        impl fmt::Debug for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let mut reversed = self.0;
                reversed.reverse();
                write!(f, "{}", hex::encode(reversed))
            }
        }
    };
}
impl_hash_debug!(BlockHash);
impl_hash_debug!(TxId);

/// A chain height. Heights are non-negative; genesis is height 0.
#[derive(Copy, Clone, Eq, PartialEq, PartialOrd, Ord, Debug, Hash)]
pub struct Height(pub u32);

impl Height {
    /// Saturating distance from `self` down to `other`, or `None` if `other` is higher.
    pub fn distance_above(self, other: Height) -> Option<u32> {
        self.0.checked_sub(other.0)
    }
}

/// A block header, as relayed in `headers` and the preface of `cmpctblock`.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Header {
    pub version: i32,
    pub prev_block: BlockHash,
    pub merkle_root: [u8; 32],
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

/// A header plus its hash and the number of transactions in its block, as
/// sent in `headers`.
///
/// Hashing an 80-byte header is double-SHA256, which is the wire codec's
/// job (spec.md §1 lists checksumming/hashing as delegated); the chain
/// store hands the peer a hash alongside every header it serves rather
/// than making the peer recompute it.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct CountedHeader {
    pub header: Header,
    pub hash: BlockHash,
    pub tx_count: u64,
}
