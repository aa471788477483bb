//! Inventory items for the Bitcoin protocol.
//!
//! Adapted from `zebra-network::protocol::external::inv::InventoryHash`,
//! extended with the witness and compact-block variants that spec.md §4.7
//! (`getdata` dispatch) and §4.10 (compact blocks) require, since Zcash
//! (the teacher's domain) has no segwit or compact-block support to model
//! those on.

use crate::wire::header::{BlockHash, TxId};

/// An inventory hash: a typed hash advertised in `inv`/`getdata`/`notfound`.
///
/// Bitcoin calls this an "inventory vector", but it's just a typed hash,
/// not a container, so (following the teacher) we avoid that name.
///
/// [Bitcoin reference](https://en.bitcoin.it/wiki/Protocol_documentation#Inventory_Vectors)
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum InventoryHash {
    /// The wiki says "any data with this number may be ignored".
    Error,
    Tx(TxId),
    Block(BlockHash),
    FilteredBlock(BlockHash),
    CompactBlock(BlockHash),
    WitnessTx(TxId),
    WitnessBlock(BlockHash),
    WitnessFilteredBlock(BlockHash),
}

impl InventoryHash {
    /// The hash this item refers to, independent of type.
    pub fn hash_bytes(&self) -> [u8; 32] {
        match self {
            InventoryHash::Error => [0; 32],
            InventoryHash::Tx(h) | InventoryHash::WitnessTx(h) => h.0,
            InventoryHash::Block(h)
            | InventoryHash::FilteredBlock(h)
            | InventoryHash::CompactBlock(h)
            | InventoryHash::WitnessBlock(h)
            | InventoryHash::WitnessFilteredBlock(h) => h.0,
        }
    }

    pub fn is_tx(&self) -> bool {
        matches!(self, InventoryHash::Tx(_) | InventoryHash::WitnessTx(_))
    }

    pub fn is_block_like(&self) -> bool {
        !self.is_tx() && !matches!(self, InventoryHash::Error)
    }

    /// Strip the witness flag, for peers that negotiated `!have_witness`.
    pub fn without_witness(self) -> InventoryHash {
        match self {
            InventoryHash::WitnessTx(h) => InventoryHash::Tx(h),
            InventoryHash::WitnessBlock(h) => InventoryHash::Block(h),
            InventoryHash::WitnessFilteredBlock(h) => InventoryHash::FilteredBlock(h),
            other => other,
        }
    }
}

impl From<TxId> for InventoryHash {
    fn from(tx: TxId) -> InventoryHash {
        InventoryHash::Tx(tx)
    }
}

impl From<BlockHash> for InventoryHash {
    fn from(hash: BlockHash) -> InventoryHash {
        InventoryHash::Block(hash)
    }
}
