//! Serialize-side request handlers: `getheaders`, `getblocks`, `getdata`,
//! `getutxos`, `mempool` (spec.md §4.7).
//!
//! Each of these walks the chain/mempool collaborator, which may be slow;
//! spec.md §5/§9 requires that a second request of the same kind arriving
//! mid-walk be dropped rather than queued, so concurrent floods can't pile
//! up unbounded work. `TryLock` is the non-queueing primitive that
//! enforces that: an `AtomicBool` guarding one "in flight" slot per peer.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::announce::Announcer;
use crate::constants::{
    COMPACT_BLOCK_MAX_DEPTH, GETBLOCKS_WALK_LIMIT, GETBLOCKTXN_MAX_DEPTH, MAX_GETUTXOS_PREVOUTS,
    MAX_HEADERS,
};
use crate::error::{Error, Result};
use crate::filter::SpvFilter;
use crate::interfaces::{Chain, Mempool, Pool};
use crate::wire::header::BlockHash;
use crate::wire::message::{
    GetBlockTxn, GetBlocks, GetHeaders, GetUtxos, Message, MerkleBlock, UtxosReply,
};
use crate::wire::InventoryHash;

/// A single-slot non-queueing lock: `try_acquire` either returns a guard
/// that releases on drop, or `None` if a request of this kind is already
/// being served (spec.md §5, §9).
#[derive(Default)]
pub struct TryLock {
    busy: AtomicBool,
}

impl TryLock {
    pub fn new() -> TryLock {
        TryLock::default()
    }

    pub fn try_acquire(&self) -> Option<TryLockGuard<'_>> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(TryLockGuard { lock: self })
        } else {
            None
        }
    }
}

pub struct TryLockGuard<'a> {
    lock: &'a TryLock,
}

impl Drop for TryLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.busy.store(false, Ordering::Release);
    }
}

/// The serve-side handlers for one peer session. Holds one `TryLock` per
/// handler kind, since a flood of `getheaders` must not starve a
/// concurrent `getdata`, or vice versa.
pub struct ServeHandlers {
    chain: Arc<dyn Chain>,
    mempool: Arc<dyn Mempool>,
    pool: Arc<dyn Pool>,
    peer_addr: SocketAddr,
    selfish: bool,
    spv: bool,

    getheaders_lock: TryLock,
    getblocks_lock: TryLock,
    getdata_lock: TryLock,
    getutxos_lock: TryLock,
    mempool_lock: TryLock,

    /// The `hashContinue` bookkeeping for a `getblocks` walk that hit
    /// `GETBLOCKS_WALK_LIMIT` (spec.md §4.7): the last hash of the batch we
    /// sent, which, if later requested via `getdata`, should resume the
    /// walk rather than being served as an ordinary block.
    hash_continue: tokio::sync::Mutex<Option<BlockHash>>,
}

impl ServeHandlers {
    pub fn new(
        chain: Arc<dyn Chain>,
        mempool: Arc<dyn Mempool>,
        pool: Arc<dyn Pool>,
        peer_addr: SocketAddr,
        selfish: bool,
        spv: bool,
    ) -> ServeHandlers {
        ServeHandlers {
            chain,
            mempool,
            pool,
            peer_addr,
            selfish,
            spv,
            getheaders_lock: TryLock::new(),
            getblocks_lock: TryLock::new(),
            getdata_lock: TryLock::new(),
            getutxos_lock: TryLock::new(),
            mempool_lock: TryLock::new(),
            hash_continue: tokio::sync::Mutex::new(None),
        }
    }

    fn serving_disabled(&self) -> bool {
        self.selfish || self.spv
    }

    /// `getheaders` (spec.md §4.7): walk forward from the locator, capped
    /// at `MAX_HEADERS`. Dropped silently (not an error) if a walk is
    /// already in flight.
    pub async fn getheaders(&self, req: &GetHeaders, announcer: &Announcer) -> Result<()> {
        let Some(_guard) = self.getheaders_lock.try_acquire() else {
            return Ok(());
        };
        if self.serving_disabled() || !self.chain.synced() || self.chain.prune() {
            return Ok(());
        }
        let start = match self.chain.find_locator(&req.known_blocks).await {
            Some(h) => h,
            None => return Ok(()),
        };
        let headers = self
            .chain
            .headers_from(start, req.stop_hash, MAX_HEADERS)
            .await;
        announcer.send_headers(headers).await;
        Ok(())
    }

    /// `getblocks` (spec.md §4.7): same walk as `getheaders` but replies
    /// with `inv`, and arms `hashContinue` when the walk is truncated by
    /// `GETBLOCKS_WALK_LIMIT`.
    pub async fn getblocks(&self, req: &GetBlocks, announcer: &Announcer) -> Result<()> {
        let Some(_guard) = self.getblocks_lock.try_acquire() else {
            return Ok(());
        };
        if self.serving_disabled() || !self.chain.synced() || self.chain.prune() {
            return Ok(());
        }
        let start = match self.chain.find_locator(&req.known_blocks).await {
            Some(h) => h,
            None => return Ok(()),
        };
        let hashes = self
            .chain
            .block_hashes_from(start, req.stop_hash, GETBLOCKS_WALK_LIMIT)
            .await;

        if hashes.len() == GETBLOCKS_WALK_LIMIT {
            *self.hash_continue.lock().await = hashes.last().copied();
        }

        let items = hashes.into_iter().map(InventoryHash::Block).collect();
        announcer.send_inv(items).await;
        Ok(())
    }

    /// `getdata` (spec.md §4.7, §4.8, §4.10): serve blocks/txs/filtered
    /// blocks/compact blocks by type, enforcing the selfish/SPV/prune gates
    /// and coinbase exclusion, and resuming a truncated `getblocks` walk
    /// when the requested hash matches `hashContinue`. `remote_filter` is
    /// the peer's currently loaded BIP37 filter, if any, consulted only for
    /// `FilteredBlock`/`WitnessFilteredBlock` items.
    pub async fn getdata(
        &self,
        items: &[InventoryHash],
        announcer: &Announcer,
        remote_filter: Option<&SpvFilter>,
    ) -> Result<Vec<InventoryHash>> {
        let Some(_guard) = self.getdata_lock.try_acquire() else {
            return Ok(vec![]);
        };

        let mut not_found = Vec::new();
        for item in items {
            match item {
                InventoryHash::Tx(tx_id) | InventoryHash::WitnessTx(tx_id) => {
                    if self.serving_disabled() {
                        not_found.push(*item);
                        continue;
                    }
                    if self.mempool.is_coinbase(*tx_id).await {
                        not_found.push(*item);
                        continue;
                    }
                    match self.mempool.get_tx(*tx_id).await {
                        Some(bytes) => {
                            announcer.send(&Message::Tx(*tx_id, bytes));
                        }
                        None => not_found.push(*item),
                    }
                }
                InventoryHash::CompactBlock(hash) => {
                    if self.serving_disabled() || self.chain.prune() {
                        not_found.push(*item);
                        continue;
                    }
                    // Within COMPACT_BLOCK_MAX_DEPTH of the tip a cmpctblock
                    // goes out; otherwise fall back to a full block
                    // (spec.md §4.7, §8).
                    match self.build_compact_block(*hash).await? {
                        Some(cmpct) => {
                            announcer.send(&cmpct);
                        }
                        None => match self.chain.get_block(*hash).await {
                            Some(bytes) => {
                                announcer.send(&Message::Block(bytes));
                            }
                            None => not_found.push(*item),
                        },
                    }
                    self.resume_hash_continue(*hash, announcer).await;
                }
                InventoryHash::Block(hash) | InventoryHash::WitnessBlock(hash) => {
                    if self.serving_disabled() || self.chain.prune() {
                        not_found.push(*item);
                        continue;
                    }
                    match self.chain.get_block(*hash).await {
                        Some(bytes) => {
                            announcer.send(&Message::Block(bytes));
                        }
                        None => not_found.push(*item),
                    }
                    self.resume_hash_continue(*hash, announcer).await;
                }
                InventoryHash::FilteredBlock(hash) | InventoryHash::WitnessFilteredBlock(hash) => {
                    if self.serving_disabled() || self.chain.prune() {
                        not_found.push(*item);
                        continue;
                    }
                    match self.build_merkle_block(*hash, remote_filter).await {
                        Some((merkle, matched)) => {
                            announcer.send(&Message::MerkleBlock(merkle));
                            for (tx_id, bytes) in matched {
                                announcer.send(&Message::Tx(tx_id, bytes));
                            }
                        }
                        None => not_found.push(*item),
                    }
                    self.resume_hash_continue(*hash, announcer).await;
                }
                InventoryHash::Error => {}
            }
        }
        Ok(not_found)
    }

    /// Keys every mempool transaction by its BIP152 short id under a
    /// compact block's nonce, so an incoming `cmpctblock` can be
    /// attempted-filled from the mempool before asking the peer for the
    /// rest via `getblocktxn` (spec.md §4.10).
    pub async fn mempool_known_short_ids(
        &self,
        hash: BlockHash,
        nonce: u64,
    ) -> Option<std::collections::HashMap<u64, Vec<u8>>> {
        let (key0, key1) = self.chain.compact_block_keys(hash, nonce).await?;
        let snapshot = self.mempool.get_snapshot().await;
        let mut known = std::collections::HashMap::with_capacity(snapshot.len());
        for tx_id in snapshot {
            if let Some(bytes) = self.mempool.get_tx(tx_id).await {
                known.insert(crate::compact::short_id(key0, key1, &bytes), bytes);
            }
        }
        Some(known)
    }

    /// Keys a `blocktxn` reply's transactions by their BIP152 short id
    /// under the slot's nonce, so the caller can check which of a compact
    /// block's short ids the reply completed (spec.md §4.10). `None` if
    /// the chain has forgotten the block's key material (e.g. it
    /// reorganized away).
    pub async fn keyed_short_ids(
        &self,
        hash: BlockHash,
        nonce: u64,
        txs: &[(crate::wire::header::TxId, Vec<u8>)],
    ) -> Option<std::collections::HashMap<u64, Vec<u8>>> {
        let (key0, key1) = self.chain.compact_block_keys(hash, nonce).await?;
        Some(
            txs.iter()
                .map(|(_, bytes)| (crate::compact::short_id(key0, key1, bytes), bytes.clone()))
                .collect(),
        )
    }

    /// Resumes a truncated `getblocks` walk when `hash` is the armed
    /// `hashContinue` (spec.md §4.7): one trailing `inv` up to the current
    /// tip, then the marker is cleared.
    async fn resume_hash_continue(&self, hash: BlockHash, announcer: &Announcer) {
        let mut continue_hash = self.hash_continue.lock().await;
        if *continue_hash != Some(hash) {
            return;
        }
        continue_hash.take();
        drop(continue_hash);
        if let Some(tip) = self.chain.get_next_hash(hash).await {
            let hashes = self
                .chain
                .block_hashes_from(tip, None, GETBLOCKS_WALK_LIMIT)
                .await;
            let inv = hashes.into_iter().map(InventoryHash::Block).collect();
            announcer.send_inv(inv).await;
        }
    }

    /// `getutxos` (spec.md §4.7, a non-standard extension): bounded to
    /// `MAX_GETUTXOS_PREVOUTS` prevouts per request.
    pub async fn getutxos(&self, req: &GetUtxos) -> Result<UtxosReply> {
        let Some(_guard) = self.getutxos_lock.try_acquire() else {
            return Err(Error::internal(
                "getutxos already in flight for this peer",
                Some(self.peer_addr),
            ));
        };
        if req.outpoints.len() > MAX_GETUTXOS_PREVOUTS {
            return Err(Error::protocol(
                "getutxos exceeds max prevout count",
                crate::constants::BAN_SCORE_MALFORMED,
                Some(self.peer_addr),
            ));
        }

        let mut hits = Vec::with_capacity(req.outpoints.len());
        let mut coins = Vec::new();
        for (tx_id, index) in &req.outpoints {
            let coin = if req.check_mempool {
                match self.mempool.get_coin(*tx_id, *index).await {
                    Some(c) => Some(c),
                    None => self.chain.get_coin(*tx_id, *index).await,
                }
            } else {
                self.chain.get_coin(*tx_id, *index).await
            };
            hits.push(coin.is_some());
            if let Some(c) = coin {
                coins.push(c);
            }
        }

        Ok(UtxosReply {
            chain_height: self.chain.height(),
            chain_tip_hash: self.chain.tip_hash(),
            hits,
            coins,
        })
    }

    /// `mempool` (BIP35, spec.md §4.7): reply with an `inv` snapshot of the
    /// whole mempool. Ignored for selfish sessions and while still syncing.
    pub async fn mempool(&self, announcer: &Announcer) -> Result<()> {
        let Some(_guard) = self.mempool_lock.try_acquire() else {
            return Ok(());
        };
        // Unlike the other handlers, `mempool` isn't gated on SPV: a BIP37
        // filtering peer is still owed a (filtered, at dispatch time) view
        // of the mempool. Selfishness and sync state are what matter here
        // (spec.md §4.7, §4.9).
        if self.selfish || !self.chain.synced() {
            return Ok(());
        }
        let snapshot = self.mempool.get_snapshot().await;
        let items = snapshot.into_iter().map(InventoryHash::Tx).collect();
        announcer.send_inv(items).await;
        Ok(())
    }

    /// `getblocktxn` (spec.md §4.10): only served within
    /// `GETBLOCKTXN_MAX_DEPTH` of the tip, never for a pruned/SPV/selfish
    /// session, and never if the block isn't known.
    pub async fn getblocktxn(
        &self,
        req: &GetBlockTxn,
    ) -> Result<Option<Vec<(crate::wire::header::TxId, Vec<u8>)>>> {
        if self.serving_disabled() || self.chain.prune() {
            return Ok(None);
        }
        let Some(height) = self.chain.block_height(req.block_hash).await else {
            return Ok(None);
        };
        let depth = self
            .chain
            .height()
            .distance_above(height)
            .unwrap_or(u32::MAX);
        if depth > GETBLOCKTXN_MAX_DEPTH {
            return Ok(None);
        }
        let Some(txs) = self.chain.get_block_txs(req.block_hash).await else {
            return Ok(None);
        };
        let selected = req
            .indexes
            .iter()
            .filter_map(|i| txs.get(*i as usize).cloned())
            .collect();
        Ok(Some(selected))
    }

    /// `merkleblock` construction for a `getdata(FILTERED_BLOCK)` hit
    /// (spec.md §4.7, §4.8): the block's transactions matched against the
    /// peer's loaded BIP37 filter become `matched_hashes`, each followed by
    /// its own `tx` packet. With no filter loaded, nothing is considered
    /// matched — Bitcoin Core itself rejects `FILTERED_BLOCK` requests from
    /// a peer that never sent `filterload`, and an empty match set is the
    /// same outcome without a separate error path.
    async fn build_merkle_block(
        &self,
        hash: BlockHash,
        remote_filter: Option<&SpvFilter>,
    ) -> Option<(MerkleBlock, Vec<(crate::wire::header::TxId, Vec<u8>)>)> {
        let txs = self.chain.get_block_txs(hash).await?;
        let mut matched = Vec::new();
        if let Some(filter) = remote_filter {
            for (tx_id, bytes) in &txs {
                if self.mempool.matches_filter(*tx_id, filter).await {
                    matched.push((*tx_id, bytes.clone()));
                }
            }
        }
        let merkle = MerkleBlock {
            block_hash: hash,
            transaction_count: txs.len() as u32,
            matched_hashes: matched.iter().map(|(id, _)| *id).collect(),
            // The actual partial-merkle-tree flag bits are a function of
            // the tree structure and match set; building them needs the
            // tree-shape primitives that live with the chain/codec layer
            // (spec.md §1), so this crate leaves them empty rather than
            // fabricating a tree it has no way to verify.
            flags: Vec::new(),
        };
        Some((merkle, matched))
    }

    /// `cmpctblock` construction for a `getdata(CMPCT_BLOCK)` hit
    /// (spec.md §4.7, §4.10): only within `COMPACT_BLOCK_MAX_DEPTH` of the
    /// tip, retrying the nonce on a short-id collision within the block.
    async fn build_compact_block(&self, hash: BlockHash) -> Result<Option<Message>> {
        let Some(height) = self.chain.block_height(hash).await else {
            return Ok(None);
        };
        let depth = self.chain.height().distance_above(height).unwrap_or(u32::MAX);
        if depth > COMPACT_BLOCK_MAX_DEPTH {
            return Ok(None);
        }
        let Some(header) = self.chain.get_header(hash).await else {
            return Ok(None);
        };
        let Some(txs) = self.chain.get_block_txs(hash).await else {
            return Ok(None);
        };
        let Some(((coinbase_id, _), rest)) = txs.split_first() else {
            return Ok(None);
        };
        let coinbase_id = *coinbase_id;
        let rest: Vec<Vec<u8>> = rest.iter().map(|(_, bytes)| bytes.clone()).collect();
        let chain = Arc::clone(&self.chain);
        let (nonce, short_ids) = crate::compact::build_with_retry_async(move |nonce| {
            let chain = Arc::clone(&chain);
            let rest = rest.clone();
            async move {
                let (key0, key1) = chain.compact_block_keys(hash, nonce).await.ok_or(())?;
                let short_ids = crate::compact::short_ids_for(key0, key1, &rest)?;
                Ok((nonce, short_ids))
            }
        })
        .await?;
        Ok(Some(Message::CompactBlock(crate::wire::message::CompactBlock {
            header,
            block_hash: hash,
            nonce,
            short_ids,
            prefilled_txns: vec![crate::wire::message::PrefilledTransaction {
                index: 0,
                tx_id: coinbase_id,
            }],
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::Mutex as StdMutex;

    use crate::filter::SpvFilter;
    use crate::interfaces::Coin;
    use crate::wire::header::{CountedHeader, Header, Height, TxId};
    use crate::wire::{MetaAddr, Nonce, PeerServices};

    struct FakeChain {
        height: Height,
        synced: bool,
        prune: bool,
        blocks: StdMutex<HashMap<[u8; 32], Vec<u8>>>,
        block_heights: StdMutex<HashMap<[u8; 32], Height>>,
        block_txs: StdMutex<HashMap<[u8; 32], Vec<(TxId, Vec<u8>)>>>,
    }

    impl FakeChain {
        fn new(height: Height) -> FakeChain {
            FakeChain {
                height,
                synced: true,
                prune: false,
                blocks: StdMutex::new(HashMap::new()),
                block_heights: StdMutex::new(HashMap::new()),
                block_txs: StdMutex::new(HashMap::new()),
            }
        }

        fn unsynced(height: Height) -> FakeChain {
            FakeChain {
                synced: false,
                ..FakeChain::new(height)
            }
        }

        fn pruned(height: Height) -> FakeChain {
            FakeChain {
                prune: true,
                ..FakeChain::new(height)
            }
        }
    }

    #[async_trait]
    impl Chain for FakeChain {
        fn height(&self) -> Height {
            self.height
        }
        fn tip_hash(&self) -> BlockHash {
            BlockHash([9; 32])
        }
        fn synced(&self) -> bool {
            self.synced
        }
        fn spv(&self) -> bool {
            false
        }
        fn prune(&self) -> bool {
            self.prune
        }
        async fn get_block(&self, hash: BlockHash) -> Option<Vec<u8>> {
            self.blocks.lock().unwrap().get(&hash.0).cloned()
        }
        async fn get_header(&self, hash: BlockHash) -> Option<Header> {
            self.block_heights.lock().unwrap().get(&hash.0)?;
            Some(Header {
                version: 1,
                prev_block: BlockHash([0; 32]),
                merkle_root: [0; 32],
                time: 0,
                bits: 0,
                nonce: 0,
            })
        }
        async fn get_coin(&self, _tx_id: TxId, _index: u32) -> Option<Coin> {
            None
        }
        async fn block_height(&self, hash: BlockHash) -> Option<Height> {
            match self.block_heights.lock().unwrap().get(&hash.0) {
                Some(h) => Some(*h),
                None => Some(self.height),
            }
        }
        async fn get_block_txs(&self, hash: BlockHash) -> Option<Vec<(TxId, Vec<u8>)>> {
            self.block_txs.lock().unwrap().get(&hash.0).cloned()
        }
        async fn compact_block_keys(&self, _hash: BlockHash, _nonce: u64) -> Option<(u64, u64)> {
            Some((1, 2))
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
            vec![BlockHash([1; 32])]
        }
    }

    struct FakeMempool;

    #[async_trait]
    impl Mempool for FakeMempool {
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
            true
        }
    }

    struct FakePool;

    #[async_trait]
    impl Pool for FakePool {
        fn local_address(&self) -> SocketAddr {
            "127.0.0.1:8333".parse().unwrap()
        }
        fn local_services(&self) -> PeerServices {
            PeerServices::NETWORK
        }
        fn local_nonce(&self) -> Nonce {
            Nonce(1)
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
        fn broadcast_inventory(&self) -> Vec<InventoryHash> {
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

    struct NullTransport;
    #[async_trait]
    impl crate::interfaces::Transport for NullTransport {
        fn write(&self, _bytes: &[u8]) -> bool {
            true
        }
        async fn destroy(&self) {}
        fn peer_addr(&self) -> SocketAddr {
            "127.0.0.1:8333".parse().unwrap()
        }
    }

    struct NullFramer;
    impl crate::interfaces::Framer for NullFramer {
        fn frame(&self, msg: &Message, _checksum: Option<[u8; 4]>) -> Vec<u8> {
            msg.to_string().into_bytes()
        }
    }

    /// Records each frame's command name, in send order, so a test can
    /// assert what was sent without a real socket.
    struct RecordingTransport {
        sent: StdMutex<Vec<String>>,
    }
    impl RecordingTransport {
        fn new() -> RecordingTransport {
            RecordingTransport {
                sent: StdMutex::new(Vec::new()),
            }
        }
    }
    #[async_trait]
    impl crate::interfaces::Transport for RecordingTransport {
        fn write(&self, bytes: &[u8]) -> bool {
            self.sent
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(bytes).into_owned());
            true
        }
        async fn destroy(&self) {}
        fn peer_addr(&self) -> SocketAddr {
            "127.0.0.1:8333".parse().unwrap()
        }
    }

    fn handlers() -> (ServeHandlers, Announcer) {
        let chain: Arc<dyn Chain> = Arc::new(FakeChain::new(Height(100)));
        let mempool: Arc<dyn Mempool> = Arc::new(FakeMempool);
        let pool: Arc<dyn Pool> = Arc::new(FakePool);
        let addr: SocketAddr = "127.0.0.1:8333".parse().unwrap();
        let announcer = Announcer::new(Arc::new(NullTransport), Arc::new(NullFramer));
        (
            ServeHandlers::new(chain, mempool, pool, addr, false, false),
            announcer,
        )
    }

    #[tokio::test]
    async fn try_lock_rejects_concurrent_acquire() {
        let lock = TryLock::new();
        let guard = lock.try_acquire();
        assert!(guard.is_some());
        assert!(lock.try_acquire().is_none());
        drop(guard);
        assert!(lock.try_acquire().is_some());
    }

    #[tokio::test]
    async fn getdata_reports_unknown_block_as_not_found() {
        let (handlers, announcer) = handlers();
        let hash = BlockHash([42; 32]);
        let result = handlers
            .getdata(&[InventoryHash::Block(hash)], &announcer, None)
            .await
            .unwrap();
        assert_eq!(result, vec![InventoryHash::Block(hash)]);
    }

    #[tokio::test]
    async fn getdata_for_compact_block_within_depth_sends_cmpctblock() {
        let chain = FakeChain::new(Height(100));
        let hash = BlockHash([7; 32]);
        chain.blocks.lock().unwrap().insert(hash.0, vec![0xAA]);
        chain.block_heights.lock().unwrap().insert(hash.0, Height(95));
        chain.block_txs.lock().unwrap().insert(
            hash.0,
            vec![
                (TxId([1; 32]), b"coinbase".to_vec()),
                (TxId([2; 32]), b"tx-one".to_vec()),
            ],
        );
        let chain: Arc<dyn Chain> = Arc::new(chain);
        let mempool: Arc<dyn Mempool> = Arc::new(FakeMempool);
        let pool: Arc<dyn Pool> = Arc::new(FakePool);
        let addr: SocketAddr = "127.0.0.1:8333".parse().unwrap();
        let handlers = ServeHandlers::new(chain, mempool, pool, addr, false, false);
        let announcer = Announcer::new(Arc::new(NullTransport), Arc::new(NullFramer));

        let result = handlers
            .getdata(&[InventoryHash::CompactBlock(hash)], &announcer, None)
            .await
            .unwrap();
        assert!(result.is_empty(), "the item should be served, not reported not-found");
    }

    #[tokio::test]
    async fn getdata_for_deep_compact_block_falls_back_to_full_block() {
        let chain = FakeChain::new(Height(100));
        let hash = BlockHash([8; 32]);
        chain.blocks.lock().unwrap().insert(hash.0, vec![0xBB]);
        // Far below COMPACT_BLOCK_MAX_DEPTH of the chain tip.
        chain.block_heights.lock().unwrap().insert(hash.0, Height(50));
        let chain: Arc<dyn Chain> = Arc::new(chain);
        let mempool: Arc<dyn Mempool> = Arc::new(FakeMempool);
        let pool: Arc<dyn Pool> = Arc::new(FakePool);
        let addr: SocketAddr = "127.0.0.1:8333".parse().unwrap();
        let handlers = ServeHandlers::new(chain, mempool, pool, addr, false, false);
        let announcer = Announcer::new(Arc::new(NullTransport), Arc::new(NullFramer));

        let result = handlers
            .getdata(&[InventoryHash::CompactBlock(hash)], &announcer, None)
            .await
            .unwrap();
        assert!(result.is_empty(), "a known deep block still gets served, just as a full block");
    }

    #[tokio::test]
    async fn getdata_for_filtered_block_sends_merkleblock_then_matched_txs() {
        let chain = FakeChain::new(Height(100));
        let hash = BlockHash([10; 32]);
        chain.block_txs.lock().unwrap().insert(
            hash.0,
            vec![
                (TxId([1; 32]), b"coinbase".to_vec()),
                (TxId([2; 32]), b"tx-one".to_vec()),
            ],
        );
        let chain: Arc<dyn Chain> = Arc::new(chain);
        let mempool: Arc<dyn Mempool> = Arc::new(FakeMempool);
        let pool: Arc<dyn Pool> = Arc::new(FakePool);
        let addr: SocketAddr = "127.0.0.1:8333".parse().unwrap();
        let handlers = ServeHandlers::new(chain, mempool, pool, addr, false, false);
        let transport = Arc::new(RecordingTransport::new());
        let announcer = Announcer::new(Arc::clone(&transport) as Arc<dyn crate::interfaces::Transport>, Arc::new(NullFramer));
        let filter = SpvFilter::new(crate::wire::types::Filter(vec![0u8; 8]), 1, crate::wire::types::Tweak(0), 0);

        let result = handlers
            .getdata(&[InventoryHash::FilteredBlock(hash)], &announcer, Some(&filter))
            .await
            .unwrap();
        assert!(result.is_empty(), "a known block should be served, not reported not-found");

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 3, "one merkleblock plus one tx per matched transaction");
        assert_eq!(sent[0], "merkleblock");
        assert_eq!(sent[1], "tx");
        assert_eq!(sent[2], "tx");
    }

    #[tokio::test]
    async fn getdata_for_filtered_block_without_a_loaded_filter_matches_nothing() {
        let chain = FakeChain::new(Height(100));
        let hash = BlockHash([11; 32]);
        chain.block_txs.lock().unwrap().insert(
            hash.0,
            vec![(TxId([1; 32]), b"coinbase".to_vec())],
        );
        let chain: Arc<dyn Chain> = Arc::new(chain);
        let mempool: Arc<dyn Mempool> = Arc::new(FakeMempool);
        let pool: Arc<dyn Pool> = Arc::new(FakePool);
        let addr: SocketAddr = "127.0.0.1:8333".parse().unwrap();
        let handlers = ServeHandlers::new(chain, mempool, pool, addr, false, false);
        let transport = Arc::new(RecordingTransport::new());
        let announcer = Announcer::new(Arc::clone(&transport) as Arc<dyn crate::interfaces::Transport>, Arc::new(NullFramer));

        let result = handlers
            .getdata(&[InventoryHash::FilteredBlock(hash)], &announcer, None)
            .await
            .unwrap();
        assert!(result.is_empty());

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1, "only the (empty-match) merkleblock, no tx packets");
        assert_eq!(sent[0], "merkleblock");
    }

    #[tokio::test]
    async fn getblocktxn_selects_requested_indexes() {
        let chain = FakeChain::new(Height(100));
        let hash = BlockHash([9; 32]);
        chain.block_heights.lock().unwrap().insert(hash.0, Height(99));
        chain.block_txs.lock().unwrap().insert(
            hash.0,
            vec![
                (TxId([1; 32]), b"coinbase".to_vec()),
                (TxId([2; 32]), b"tx-one".to_vec()),
                (TxId([3; 32]), b"tx-two".to_vec()),
            ],
        );
        let chain: Arc<dyn Chain> = Arc::new(chain);
        let mempool: Arc<dyn Mempool> = Arc::new(FakeMempool);
        let pool: Arc<dyn Pool> = Arc::new(FakePool);
        let addr: SocketAddr = "127.0.0.1:8333".parse().unwrap();
        let handlers = ServeHandlers::new(chain, mempool, pool, addr, false, false);

        let req = GetBlockTxn {
            block_hash: hash,
            indexes: vec![0, 2],
        };
        let reply = handlers.getblocktxn(&req).await.unwrap().unwrap();
        assert_eq!(
            reply,
            vec![
                (TxId([1; 32]), b"coinbase".to_vec()),
                (TxId([3; 32]), b"tx-two".to_vec()),
            ]
        );
    }

    #[tokio::test]
    async fn getutxos_rejects_oversized_request() {
        let (handlers, _announcer) = handlers();
        let outpoints = (0..20).map(|i| (TxId([i as u8; 32]), 0)).collect();
        let req = GetUtxos {
            check_mempool: false,
            outpoints,
        };
        assert!(handlers.getutxos(&req).await.is_err());
    }

    #[tokio::test]
    async fn selfish_session_does_not_serve_mempool() {
        let chain: Arc<dyn Chain> = Arc::new(FakeChain::new(Height(1)));
        let mempool: Arc<dyn Mempool> = Arc::new(FakeMempool);
        let pool: Arc<dyn Pool> = Arc::new(FakePool);
        let addr: SocketAddr = "127.0.0.1:8333".parse().unwrap();
        let handlers = ServeHandlers::new(chain, mempool, pool, addr, true, false);
        let announcer = Announcer::new(Arc::new(NullTransport), Arc::new(NullFramer));
        handlers.mempool(&announcer).await.unwrap();
    }

    /// A not-yet-synced node has nothing authoritative to answer `mempool`
    /// with (spec.md §4.7, §4.9), even for a non-selfish session.
    #[tokio::test]
    async fn unsynced_session_does_not_serve_mempool() {
        let chain: Arc<dyn Chain> = Arc::new(FakeChain::unsynced(Height(1)));
        let mempool: Arc<dyn Mempool> = Arc::new(FakeMempool);
        let pool: Arc<dyn Pool> = Arc::new(FakePool);
        let addr: SocketAddr = "127.0.0.1:8333".parse().unwrap();
        let handlers = ServeHandlers::new(chain, mempool, pool, addr, false, false);
        let transport = Arc::new(RecordingTransport::new());
        let announcer = Announcer::new(Arc::clone(&transport) as Arc<dyn crate::interfaces::Transport>, Arc::new(NullFramer));
        handlers.mempool(&announcer).await.unwrap();
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unsynced_session_does_not_serve_getheaders_or_getblocks() {
        let chain: Arc<dyn Chain> = Arc::new(FakeChain::unsynced(Height(100)));
        let mempool: Arc<dyn Mempool> = Arc::new(FakeMempool);
        let pool: Arc<dyn Pool> = Arc::new(FakePool);
        let addr: SocketAddr = "127.0.0.1:8333".parse().unwrap();
        let handlers = ServeHandlers::new(chain, mempool, pool, addr, false, false);
        let transport = Arc::new(RecordingTransport::new());
        let announcer = Announcer::new(Arc::clone(&transport) as Arc<dyn crate::interfaces::Transport>, Arc::new(NullFramer));

        handlers
            .getheaders(&GetHeaders { known_blocks: vec![], stop_hash: None }, &announcer)
            .await
            .unwrap();
        handlers
            .getblocks(&GetBlocks { known_blocks: vec![], stop_hash: None }, &announcer)
            .await
            .unwrap();
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn pruned_session_does_not_serve_getheaders_or_getblocks() {
        let chain: Arc<dyn Chain> = Arc::new(FakeChain::pruned(Height(100)));
        let mempool: Arc<dyn Mempool> = Arc::new(FakeMempool);
        let pool: Arc<dyn Pool> = Arc::new(FakePool);
        let addr: SocketAddr = "127.0.0.1:8333".parse().unwrap();
        let handlers = ServeHandlers::new(chain, mempool, pool, addr, false, false);
        let transport = Arc::new(RecordingTransport::new());
        let announcer = Announcer::new(Arc::clone(&transport) as Arc<dyn crate::interfaces::Transport>, Arc::new(NullFramer));

        handlers
            .getheaders(&GetHeaders { known_blocks: vec![], stop_hash: None }, &announcer)
            .await
            .unwrap();
        handlers
            .getblocks(&GetBlocks { known_blocks: vec![], stop_hash: None }, &announcer)
            .await
            .unwrap();
        assert!(transport.sent.lock().unwrap().is_empty());
    }
}
