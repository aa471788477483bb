//! Shared mock collaborators for the scenario tests in `tests/`.
//!
//! These stand in for the external seams `interfaces.rs` declares
//! (transport, codec, chain, mempool, pool) the way the unit tests inside
//! each `src/*.rs` module do, but shared across files so every scenario
//! test isn't re-declaring the same null objects.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;

use btcpeer::interfaces::{Chain, Coin, Framer, Mempool, Pool, StreamParser, Transport};
use btcpeer::wire::header::{BlockHash, CountedHeader, Header, Height, TxId};
use btcpeer::wire::{Message, MetaAddr, Nonce, PeerServices};
use btcpeer::filter::SpvFilter;

/// Records every outbound frame a session writes, so scenario tests can
/// assert on what went out over the wire without a real socket.
pub struct RecordingTransport {
    pub destroyed: StdMutex<bool>,
    pub writes: StdMutex<Vec<Vec<u8>>>,
    addr: SocketAddr,
}

impl RecordingTransport {
    pub fn new(addr: &str) -> Arc<RecordingTransport> {
        Arc::new(RecordingTransport {
            destroyed: StdMutex::new(false),
            writes: StdMutex::new(Vec::new()),
            addr: addr.parse().unwrap(),
        })
    }

    pub fn sent_commands(&self) -> Vec<String> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .map(|w| String::from_utf8_lossy(w).to_string())
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn write(&self, bytes: &[u8]) -> bool {
        self.writes.lock().unwrap().push(bytes.to_vec());
        true
    }
    async fn destroy(&self) {
        *self.destroyed.lock().unwrap() = true;
    }
    fn peer_addr(&self) -> SocketAddr {
        self.addr
    }
}

/// A `Framer` whose "wire bytes" are just the command name, which is all
/// the scenario tests need to assert "a `getaddr` went out", etc.
pub struct TaggingFramer;
impl Framer for TaggingFramer {
    fn frame(&self, msg: &Message, _checksum: Option<[u8; 4]>) -> Vec<u8> {
        msg.to_string().into_bytes()
    }
}

/// A parser the test drives directly by pushing `Message`s onto a shared
/// queue; `feed` drains it regardless of the bytes passed in, since the
/// wire codec itself is out of scope (spec.md §1).
pub struct QueueParser {
    pub queue: Arc<StdMutex<Vec<Message>>>,
}

impl StreamParser for QueueParser {
    fn feed(&mut self, _chunk: &[u8]) -> Result<Vec<Message>, String> {
        Ok(std::mem::take(&mut self.queue.lock().unwrap()))
    }
}

/// A chain collaborator with a fixed height and a single known block, for
/// compact-block-depth and getdata scenarios.
pub struct FakeChain {
    pub height: Height,
    pub blocks: StdMutex<std::collections::HashMap<[u8; 32], Vec<u8>>>,
}

impl FakeChain {
    pub fn new(height: u32) -> Arc<FakeChain> {
        Arc::new(FakeChain {
            height: Height(height),
            blocks: StdMutex::new(std::collections::HashMap::new()),
        })
    }
}

#[async_trait]
impl Chain for FakeChain {
    fn height(&self) -> Height {
        self.height
    }
    fn tip_hash(&self) -> BlockHash {
        BlockHash([0xAA; 32])
    }
    fn synced(&self) -> bool {
        true
    }
    fn spv(&self) -> bool {
        false
    }
    fn prune(&self) -> bool {
        false
    }
    async fn get_block(&self, hash: BlockHash) -> Option<Vec<u8>> {
        self.blocks.lock().unwrap().get(&hash.0).cloned()
    }
    async fn get_header(&self, _hash: BlockHash) -> Option<Header> {
        None
    }
    async fn get_coin(&self, _tx_id: TxId, _index: u32) -> Option<Coin> {
        None
    }
    async fn block_height(&self, _hash: BlockHash) -> Option<Height> {
        Some(self.height)
    }
    async fn get_block_txs(&self, _hash: BlockHash) -> Option<Vec<(TxId, Vec<u8>)>> {
        None
    }
    async fn compact_block_keys(&self, _hash: BlockHash, _nonce: u64) -> Option<(u64, u64)> {
        None
    }
    async fn find_locator(&self, _locator: &[BlockHash]) -> Option<BlockHash> {
        Some(BlockHash([0; 32]))
    }
    async fn get_next_hash(&self, _hash: BlockHash) -> Option<BlockHash> {
        None
    }
    async fn headers_from(
        &self,
        _hash: BlockHash,
        _stop: Option<BlockHash>,
        _limit: usize,
    ) -> Vec<CountedHeader> {
        vec![]
    }
    async fn block_hashes_from(
        &self,
        _hash: BlockHash,
        _stop: Option<BlockHash>,
        _limit: usize,
    ) -> Vec<BlockHash> {
        vec![]
    }
}

pub struct EmptyMempool;

#[async_trait]
impl Mempool for EmptyMempool {
    async fn get_tx(&self, _tx_id: TxId) -> Option<Vec<u8>> {
        None
    }
    async fn get_coin(&self, _tx_id: TxId, _index: u32) -> Option<Coin> {
        None
    }
    async fn is_spent(&self, _tx_id: TxId, _index: u32) -> bool {
        false
    }
    async fn get_snapshot(&self) -> Vec<TxId> {
        vec![]
    }
    async fn fee_rate(&self, _tx_id: TxId) -> Option<u64> {
        None
    }
    async fn is_coinbase(&self, _tx_id: TxId) -> bool {
        false
    }
    async fn matches_filter(&self, _tx_id: TxId, _filter: &SpvFilter) -> bool {
        false
    }
}

/// A pool collaborator with a fixed local nonce and no broadcast inventory
/// by default, so scenario tests control exactly what gets relayed.
pub struct FakePool {
    pub nonce: Nonce,
}

impl FakePool {
    pub fn new(nonce: u64) -> Arc<FakePool> {
        Arc::new(FakePool { nonce: Nonce(nonce) })
    }
}

#[async_trait]
impl Pool for FakePool {
    fn local_address(&self) -> SocketAddr {
        "127.0.0.1:8333".parse().unwrap()
    }
    fn local_services(&self) -> PeerServices {
        PeerServices::NETWORK
    }
    fn local_nonce(&self) -> Nonce {
        self.nonce
    }
    fn relay(&self) -> bool {
        true
    }
    fn selfish(&self) -> bool {
        false
    }
    fn spv_filter(&self) -> Option<SpvFilter> {
        None
    }
    fn pool_fee_rate(&self) -> Option<u64> {
        None
    }
    fn syncing(&self) -> bool {
        false
    }
    fn broadcast_inventory(&self) -> Vec<btcpeer::wire::InventoryHash> {
        vec![]
    }
    async fn set_misbehavior(&self, _peer_addr: SocketAddr, _score: u32) {}
    async fn ignore(&self, _peer_addr: SocketAddr) {}
    async fn is_misbehaving(&self, _peer_addr: SocketAddr) -> bool {
        false
    }
    async fn is_ignored(&self, _peer_addr: SocketAddr) -> bool {
        false
    }
    async fn known_addresses(&self, _max: usize) -> Vec<MetaAddr> {
        vec![]
    }
}
