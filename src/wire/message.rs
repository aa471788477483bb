//! The logical Bitcoin P2P message and its payload types.
//!
//! Adapted from `zebra-network::protocol::external::message`. The Zcash
//! teacher's wire messages are unlinked from their on-wire bytes — framing
//! is a serialization detail handled by the (out-of-scope) codec, and this
//! enum is the internal representation the peer dispatches on. We keep
//! that design and extend the enum with the BIP151/BIP150 handshake
//! packets, `getutxos`/`utxos`, and `havewitness`/`alert`/`unknown`, since
//! the teacher's Zcash network never negotiates transport encryption or
//! segwit and so never needed them.

use std::fmt;
use std::net::SocketAddr;

use crate::wire::header::{BlockHash, CountedHeader, TxId};
use crate::wire::inv::InventoryHash;
use crate::wire::meta_addr::MetaAddr;
use crate::wire::types::{Filter, Nonce, PeerServices, ProtocolVersion, Tweak};
use crate::wire::Command;

/// A `version` message: the Bitcoin analogue of a TLS `ClientHello`.
///
/// [Bitcoin reference](https://en.bitcoin.it/wiki/Protocol_documentation#version)
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Version {
    pub version: ProtocolVersion,
    pub services: PeerServices,
    pub timestamp: i64,
    pub address_recv: (PeerServices, SocketAddr),
    pub address_from: (PeerServices, SocketAddr),
    pub nonce: Nonce,
    pub user_agent: String,
    pub best_block: crate::wire::header::Height,
    pub relay: bool,
}

/// A `getblocks` message: `known_blocks` spaced out along the peer's best
/// chain, used to locate the common ancestor. The peer replies with `inv`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct GetBlocks {
    pub known_blocks: Vec<BlockHash>,
    pub stop_hash: Option<BlockHash>,
}

/// A `getheaders` message: like `GetBlocks`, but the reply is `headers`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct GetHeaders {
    pub known_blocks: Vec<BlockHash>,
    pub stop_hash: Option<BlockHash>,
}

/// A BIP37 `merkleblock` reply to a `getdata` for a filtered block.
#[derive(Debug, Clone, PartialEq)]
pub struct MerkleBlock {
    pub block_hash: BlockHash,
    pub transaction_count: u32,
    /// Hashes of the matched transactions, in tree order.
    pub matched_hashes: Vec<TxId>,
    /// The partial-merkle-tree flag bits.
    pub flags: Vec<u8>,
}

/// A BIP152 prefilled transaction: one the sender includes directly in the
/// `cmpctblock` rather than referring to by short id (the coinbase, always).
#[derive(Debug, Clone, PartialEq)]
pub struct PrefilledTransaction {
    pub index: u64,
    pub tx_id: TxId,
}

/// A BIP152 `cmpctblock` message.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactBlock {
    pub header: crate::wire::header::Header,
    pub block_hash: BlockHash,
    pub nonce: u64,
    pub short_ids: Vec<u64>,
    pub prefilled_txns: Vec<PrefilledTransaction>,
}

/// A BIP152 `getblocktxn` message requesting specific transactions by index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetBlockTxn {
    pub block_hash: BlockHash,
    pub indexes: Vec<u64>,
}

/// A BIP152 `blocktxn` reply.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockTxn {
    pub block_hash: BlockHash,
    /// The requested transactions, id paired with bytes — a `getblocktxn`
    /// reply must carry the bytes themselves, since the requester asked
    /// precisely because it didn't already have them (spec.md §4.10).
    pub txs: Vec<(TxId, Vec<u8>)>,
}

/// A BIP152 `sendcmpct` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendCompact {
    pub announce: bool,
    pub version: u64,
}

/// Reject reason ccodes.
///
/// [Bitcoin reference](https://en.bitcoin.it/wiki/Protocol_documentation#reject)
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum RejectReason {
    Malformed = 0x01,
    Invalid = 0x10,
    Obsolete = 0x11,
    Duplicate = 0x12,
    Nonstandard = 0x40,
    Dust = 0x41,
    InsufficientFee = 0x42,
    Checkpoint = 0x43,
    Other = 0x50,
}

/// A BIP37 `getutxos` request (non-standard extension some nodes support).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetUtxos {
    pub check_mempool: bool,
    pub outpoints: Vec<(TxId, u32)>,
}

/// One outpoint's lookup result in a `utxos` reply.
#[derive(Debug, Clone, PartialEq)]
pub struct UtxosReply {
    pub chain_height: crate::wire::header::Height,
    pub chain_tip_hash: BlockHash,
    /// Bitmap: bit `i` set means outpoint `i` was found unspent.
    pub hits: Vec<bool>,
    pub coins: Vec<Vec<u8>>,
}

/// A Bitcoin P2P network message: the peer's logical packet representation.
///
/// [Bitcoin reference](https://en.bitcoin.it/wiki/Protocol_documentation)
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Version(Version),
    Verack,

    Ping(Nonce),
    Pong(Nonce),

    Reject {
        message: String,
        ccode: RejectReason,
        reason: String,
        data: Option<[u8; 32]>,
    },

    GetAddr,
    Addr(Vec<MetaAddr>),

    GetBlocks(GetBlocks),
    Inv(Vec<InventoryHash>),
    GetHeaders(GetHeaders),
    Headers(Vec<CountedHeader>),
    GetData(Vec<InventoryHash>),

    /// A `block` message. The payload is opaque to the peer: it is produced
    /// by, and only interpreted by, the chain/mempool collaborators.
    Block(Vec<u8>),
    /// A `tx` message. The payload bytes are opaque, but the parser
    /// (out of scope per spec.md §1) already computes the tx id while
    /// framing, since merkle-slot tracking (spec.md §4.8) needs it without
    /// the peer hashing anything itself.
    Tx(TxId, Vec<u8>),
    NotFound(Vec<InventoryHash>),

    Mempool,

    FilterLoad {
        filter: Filter,
        hash_functions_count: u32,
        tweak: Tweak,
        flags: u8,
    },
    FilterAdd {
        data: Vec<u8>,
    },
    FilterClear,

    MerkleBlock(MerkleBlock),
    CompactBlock(CompactBlock),
    GetBlockTxn(GetBlockTxn),
    BlockTxn(BlockTxn),
    SendCompact(SendCompact),
    FeeFilter(u64),
    SendHeaders,

    GetUtxos(GetUtxos),
    Utxos(UtxosReply),

    /// A legacy substitute for the witness service bit, used on networks
    /// that predate it (spec.md §4.5).
    HaveWitness,

    /// BIP151 encryption-handshake packets. Their payloads are opaque: the
    /// cryptographic internals are driven by the `EncryptionHandshake`
    /// trait (spec.md §1), not interpreted here.
    EncInit(Vec<u8>),
    EncAck(Vec<u8>),

    /// BIP150 authentication-handshake packets, same opacity rule.
    AuthChallenge(Vec<u8>),
    AuthReply(Vec<u8>),
    AuthPropose(Vec<u8>),

    Alert(Vec<u8>),

    /// Any command the dispatch table does not recognize (spec.md §4.2:
    /// "Unknown types emit `unknown` upward and are not fatal").
    Unknown(String),
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command().to_string())
    }
}

impl Message {
    pub fn command(&self) -> Command {
        match self {
            Message::Version(_) => Command::Version,
            Message::Verack => Command::Verack,
            Message::Ping(_) => Command::Ping,
            Message::Pong(_) => Command::Pong,
            Message::Reject { .. } => Command::Reject,
            Message::GetAddr => Command::GetAddr,
            Message::Addr(_) => Command::Addr,
            Message::GetBlocks(_) => Command::GetBlocks,
            Message::Inv(_) => Command::Inv,
            Message::GetHeaders(_) => Command::GetHeaders,
            Message::Headers(_) => Command::Headers,
            Message::GetData(_) => Command::GetData,
            Message::Block(_) => Command::Block,
            Message::Tx(..) => Command::Tx,
            Message::NotFound(_) => Command::NotFound,
            Message::Mempool => Command::MemPool,
            Message::FilterLoad { .. } => Command::FilterLoad,
            Message::FilterAdd { .. } => Command::FilterAdd,
            Message::FilterClear => Command::FilterClear,
            Message::MerkleBlock(_) => Command::MerkleBlock,
            Message::CompactBlock(_) => Command::CmpctBlock,
            Message::GetBlockTxn(_) => Command::GetBlockTxn,
            Message::BlockTxn(_) => Command::BlockTxn,
            Message::SendCompact(_) => Command::SendCmpct,
            Message::FeeFilter(_) => Command::FeeFilter,
            Message::SendHeaders => Command::SendHeaders,
            Message::GetUtxos(_) => Command::GetUtxos,
            Message::Utxos(_) => Command::Utxos,
            Message::HaveWitness => Command::HaveWitness,
            Message::EncInit(_) => Command::EncInit,
            Message::EncAck(_) => Command::EncAck,
            Message::AuthChallenge(_) => Command::AuthChallenge,
            Message::AuthReply(_) => Command::AuthReply,
            Message::AuthPropose(_) => Command::AuthPropose,
            Message::Alert(_) => Command::Alert,
            Message::Unknown(_) => Command::Unknown,
        }
    }
}
