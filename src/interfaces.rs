//! The narrow external interfaces spec.md §6 specifies: everything the
//! peer calls through but does not own. Expressed as `async_trait`s so the
//! session can `.await` a lookup without knowing whether the backing store
//! is in-process or over a socket — the same boundary zebra-network keeps
//! between itself and `zebra-chain`/`zebra-state` by depending on them as
//! separate crates rather than inlining storage.

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::error::Result;
use crate::wire::header::{BlockHash, CountedHeader, Header, Height, TxId};
use crate::wire::{MetaAddr, PeerServices};

/// A duplex byte-stream transport (spec.md §6).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Non-blocking enqueue; backpressure is the transport's problem, not
    /// the peer's (spec.md §5).
    fn write(&self, bytes: &[u8]) -> bool;
    async fn destroy(&self);
    fn peer_addr(&self) -> SocketAddr;
}

/// Consumes raw bytes and emits logical packets (spec.md §6). The wire
/// codec itself (framing/checksum/varint) is out of scope; this trait is
/// the seam the peer calls through.
pub trait StreamParser: Send {
    fn feed(&mut self, chunk: &[u8]) -> std::result::Result<Vec<crate::wire::Message>, String>;
}

/// Turns a logical packet into wire bytes (spec.md §6). `checksum` lets a
/// caller supply a precomputed checksum (e.g. a `tx`'s cached hash) to
/// avoid re-hashing large payloads. `Sync` because it's shared behind an
/// `Arc` across the session's handler tasks.
pub trait Framer: Send + Sync {
    fn frame(&self, msg: &crate::wire::Message, checksum: Option<[u8; 4]>) -> Vec<u8>;
}

/// The BIP151 transport-encryption handshake object (spec.md §1, §6). The
/// peer drives this through its contract; the cryptographic internals are
/// out of scope.
///
/// Methods take `&self`, not `&mut self`: the session calls `wait` and the
/// `on_*`/`to_*` mutators concurrently from different tasks (one blocked
/// waiting for completion while inbound packets drive the handshake
/// forward), so an implementor holds any mutable state behind its own
/// interior-mutability primitive.
#[async_trait]
pub trait EncryptionHandshake: Send + Sync {
    fn completed(&self) -> bool;
    fn handshake_succeeded(&self) -> bool;
    /// Resolves when the handshake completes or the timeout elapses,
    /// whichever is first.
    async fn wait(&self, timeout: std::time::Duration) -> Result<()>;
    fn to_encinit(&self) -> Vec<u8>;
    fn on_encinit(&self, payload: &[u8]) -> Result<()>;
    fn to_encack(&self) -> Vec<u8>;
    fn on_encack(&self, payload: &[u8]) -> Result<()>;
    fn destroy(&self);
    /// Completes the handshake, successfully (`None`) or with an error.
    fn complete(&self, err: Option<String>);
}

/// The BIP150 peer-authentication handshake object, same opacity and
/// concurrency rule as `EncryptionHandshake`.
#[async_trait]
pub trait AuthHandshake: Send + Sync {
    fn completed(&self) -> bool;
    fn auth_succeeded(&self) -> bool;
    /// Whether an identity for the remote peer is already known, e.g. from
    /// a prior session's `authpropose` (spec.md §4.1). An outbound
    /// `authchallenge` is only worth sending when this is true — without a
    /// known identity there's nothing to verify the reply against.
    fn has_known_identity(&self) -> bool;
    async fn wait(&self, timeout: std::time::Duration) -> Result<()>;
    fn to_challenge(&self) -> Vec<u8>;
    fn on_challenge(&self, payload: &[u8]) -> Result<Vec<u8>>;
    fn on_reply(&self, payload: &[u8]) -> Result<()>;
    fn on_propose(&self, payload: &[u8]) -> Result<Vec<u8>>;
    fn destroy(&self);
    fn complete(&self, err: Option<String>);
}

/// A coin returned from `getutxos`/a `Chain` lookup: opaque to the peer
/// beyond its existence (spec.md §4.7).
pub type Coin = Vec<u8>;

/// The chain/block store collaborator (spec.md §6).
#[async_trait]
pub trait Chain: Send + Sync {
    fn height(&self) -> Height;
    fn tip_hash(&self) -> BlockHash;
    fn synced(&self) -> bool;
    fn spv(&self) -> bool;
    fn prune(&self) -> bool;

    async fn get_block(&self, hash: BlockHash) -> Option<Vec<u8>>;
    async fn get_header(&self, hash: BlockHash) -> Option<Header>;
    async fn get_coin(&self, tx_id: TxId, index: u32) -> Option<Coin>;
    async fn block_height(&self, hash: BlockHash) -> Option<Height>;
    /// A block's transactions, id paired with bytes, in order (coinbase
    /// first), for compact-block and `getblocktxn` construction (spec.md
    /// §4.10). `None` if the block isn't known.
    async fn get_block_txs(&self, hash: BlockHash) -> Option<Vec<(TxId, Vec<u8>)>>;
    /// Derives the BIP152 SipHash-1-3 key pair for `hash` under `nonce`
    /// (`SHA256(header || nonce)`, split into two little-endian u64
    /// halves). The SHA256 primitive lives with the codec/chain, not this
    /// crate (spec.md §1).
    async fn compact_block_keys(&self, hash: BlockHash, nonce: u64) -> Option<(u64, u64)>;

    /// Resolves a locator to the best known ancestor; returns the hash to
    /// continue walking forward from (spec.md §4.7).
    async fn find_locator(&self, locator: &[BlockHash]) -> Option<BlockHash>;
    /// The next block hash after `hash` on the best chain, if any.
    async fn get_next_hash(&self, hash: BlockHash) -> Option<BlockHash>;
    /// Walk forward from `hash`, collecting up to `limit` headers (or
    /// until `stop` is reached).
    async fn headers_from(
        &self,
        hash: BlockHash,
        stop: Option<BlockHash>,
        limit: usize,
    ) -> Vec<CountedHeader>;
    /// Walk forward from `hash`, collecting up to `limit` block hashes (or
    /// until `stop` is reached).
    async fn block_hashes_from(
        &self,
        hash: BlockHash,
        stop: Option<BlockHash>,
        limit: usize,
    ) -> Vec<BlockHash>;
}

/// The mempool collaborator (spec.md §6).
#[async_trait]
pub trait Mempool: Send + Sync {
    async fn get_tx(&self, tx_id: TxId) -> Option<Vec<u8>>;
    async fn get_coin(&self, tx_id: TxId, index: u32) -> Option<Coin>;
    async fn is_spent(&self, tx_id: TxId, index: u32) -> bool;
    async fn get_snapshot(&self) -> Vec<TxId>;
    /// `None` if the mempool doesn't know the tx; present rate otherwise.
    async fn fee_rate(&self, tx_id: TxId) -> Option<u64>;
    /// Whether this is a coinbase transaction (spec.md §4.7: "coinbases
    /// are never served").
    async fn is_coinbase(&self, tx_id: TxId) -> bool;

    /// Whether `tx_id`'s outputs/inputs match the given SPV filter
    /// (spec.md §4.4, §4.8). Matching needs the transaction's actual
    /// scripts, which only the mempool/chain store has; the peer only
    /// forwards the filter bits it was handed.
    async fn matches_filter(&self, tx_id: TxId, filter: &crate::filter::SpvFilter) -> bool;
}

/// The peer pool collaborator (spec.md §6): selection, banning, and global
/// inventory all live here, not on the peer. The peer reports events and
/// reads shared, pool-owned state through this interface.
#[async_trait]
pub trait Pool: Send + Sync {
    fn local_address(&self) -> SocketAddr;
    fn local_services(&self) -> PeerServices;
    fn local_nonce(&self) -> crate::wire::Nonce;
    fn relay(&self) -> bool;
    fn selfish(&self) -> bool;
    fn spv_filter(&self) -> Option<crate::filter::SpvFilter>;
    fn pool_fee_rate(&self) -> Option<u64>;
    fn syncing(&self) -> bool;
    /// Inventory currently being broadcast to all peers, announced to a
    /// peer immediately after handshake (spec.md §4.1 "Ready" actions).
    fn broadcast_inventory(&self) -> Vec<crate::wire::InventoryHash>;

    async fn set_misbehavior(&self, peer_addr: SocketAddr, score: u32);
    async fn ignore(&self, peer_addr: SocketAddr);
    async fn is_misbehaving(&self, peer_addr: SocketAddr) -> bool;
    async fn is_ignored(&self, peer_addr: SocketAddr) -> bool;
    async fn known_addresses(&self, max: usize) -> Vec<MetaAddr>;
}
