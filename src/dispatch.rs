//! The inbound packet dispatch table (spec.md §4.2) for a session already
//! past the handshake. `version`/`verack`/the BIP151/BIP150 packets are
//! handled directly by the session state machine, since they gate entry
//! into this table rather than flowing through it.
//!
//! Pre-dispatch, every inbound packet goes through four steps (spec.md
//! §4.2): (1) record `lastRecv`, (2) drop anything but handshake packets
//! until the enc-handshake (if any) completes, (3) same for the
//! auth-handshake, (4) flush any open merkle slot on a non-`tx` packet.
//! Steps 1–3 are the session state machine's job (it owns the timestamps
//! and handshake objects); this module implements step 4 plus the routing
//! table itself.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::announce::Announcer;
use crate::compact::CompactBlockTable;
use crate::constants::{BAN_SCORE_MALFORMED, BAN_SCORE_SEVERE, MAX_FILTERADD_DATA_SIZE, MAX_INV_ITEMS};
use crate::error::{Error, Result};
use crate::event::{Event, EventSink};
use crate::filter::SpvFilter;
use crate::interfaces::Pool;
use crate::merkle::{MerkleSlot, MerkleTracker};
use crate::serve::ServeHandlers;
use crate::wire::message::Message;
use crate::wire::types::FeeRate;
use crate::wire::{Command, InventoryHash};

/// Per-peer state the dispatch table reads or mutates that isn't owned by
/// any other module: the remote-supplied SPV filter (if any), the
/// negotiated compact-block mode flag, and the `sendheaders`/`feefilter`
/// preferences `Session::announce` needs when relaying new inventory
/// (spec.md §4.4). Guarded by one mutex since all of these change rarely
/// relative to `tx`/`inv` traffic.
#[derive(Default)]
pub struct PeerFilterState {
    pub remote_filter: Option<SpvFilter>,
    pub headers_preferred: bool,
    pub peer_fee_filter: Option<FeeRate>,
}

pub struct Dispatcher {
    serve: Arc<ServeHandlers>,
    announcer: Arc<Announcer>,
    request_tracker: Arc<crate::request::RequestTracker>,
    compact_blocks: Arc<CompactBlockTable>,
    merkle: Mutex<MerkleTracker>,
    filter_state: Mutex<PeerFilterState>,
    events: EventSink,
    pool: Arc<dyn Pool>,
    peer_addr: std::net::SocketAddr,
}

impl Dispatcher {
    pub fn new(
        serve: Arc<ServeHandlers>,
        announcer: Arc<Announcer>,
        request_tracker: Arc<crate::request::RequestTracker>,
        compact_blocks: Arc<CompactBlockTable>,
        events: EventSink,
        pool: Arc<dyn Pool>,
        peer_addr: std::net::SocketAddr,
    ) -> Dispatcher {
        Dispatcher {
            serve,
            announcer,
            request_tracker,
            compact_blocks,
            merkle: Mutex::new(MerkleTracker::new()),
            filter_state: Mutex::new(PeerFilterState::default()),
            events,
            pool,
            peer_addr,
        }
    }

    /// Routes one inbound, post-handshake packet. Returns the ban score to
    /// add, if the packet was a protocol violation (spec.md §4.11); `Ok(())`
    /// covers both "handled cleanly" and "handled, nothing to score".
    pub async fn dispatch(&self, msg: Message) -> Result<()> {
        // Pre-dispatch step 4: any packet other than `tx` flushes open
        // merkle slots (spec.md §4.2, §4.8).
        if msg.command() != Command::Tx {
            if let Some(hash) = self.merkle.lock().await.flush() {
                tracing::debug!(block = ?hash, "merkle slot flushed by non-tx packet");
            }
        }

        // First let the request tracker try to match this against a
        // pending request (spec.md §4.3); it's a no-op if nothing is
        // waiting on this command.
        self.request_tracker.fire(msg.command(), &msg).await;

        match msg {
            Message::Ping(nonce) => {
                self.announcer.send_pong(nonce);
                self.events.emit(Event::Ping(nonce.0));
            }
            Message::Pong(nonce) => {
                self.events.emit(Event::Pong(nonce.0));
            }
            Message::Inv(items) => self.on_inv(items).await?,
            Message::GetData(items) => self.on_getdata(items).await?,
            Message::NotFound(items) => {
                self.events.emit(Event::NotFound(items));
            }
            Message::GetHeaders(req) => {
                self.serve.getheaders(&req, &self.announcer).await?;
            }
            Message::Headers(headers) => {
                if headers.len() > crate::constants::MAX_HEADERS {
                    return Err(Error::protocol(
                        "headers exceeds max batch size",
                        BAN_SCORE_SEVERE,
                        Some(self.peer_addr),
                    ));
                }
                self.events.emit(Event::Headers(headers));
            }
            Message::GetBlocks(req) => {
                self.serve.getblocks(&req, &self.announcer).await?;
            }
            Message::Block(bytes) => {
                self.events.emit(Event::Block(bytes));
            }
            Message::Tx(tx_id, bytes) => {
                if let Some(hash) = self.merkle.lock().await.observe_tx(tx_id) {
                    tracing::debug!(block = ?hash, "merkle slot completed");
                }
                self.events.emit(Event::Tx(bytes));
            }
            Message::Mempool => {
                self.serve.mempool(&self.announcer).await?;
            }
            Message::FilterLoad {
                filter,
                hash_functions_count,
                tweak,
                flags,
            } => self.on_filterload(filter, hash_functions_count, tweak, flags).await?,
            Message::FilterAdd { data } => self.on_filteradd(data).await?,
            Message::FilterClear => {
                self.filter_state.lock().await.remote_filter = None;
            }
            Message::MerkleBlock(mb) => {
                let mut tracker = self.merkle.lock().await;
                let replaced = tracker.open(MerkleSlot::new(mb.block_hash, mb.matched_hashes.clone()));
                drop(tracker);
                if let Some(hash) = replaced {
                    tracing::debug!(block = ?hash, "merkle slot replaced before completion");
                }
                self.events.emit(Event::MerkleBlock {
                    block_hash: mb.block_hash,
                    matched_tx_ids: mb.matched_hashes,
                });
            }
            Message::CompactBlock(block) => self.on_cmpctblock(block).await?,
            Message::GetBlockTxn(req) => {
                if let Some(txs) = self.serve.getblocktxn(&req).await? {
                    self.events.emit(Event::GetBlockTxn(req.clone()));
                    tracing::trace!(count = txs.len(), "served getblocktxn");
                    self.announcer.send(&Message::BlockTxn(
                        crate::wire::message::BlockTxn {
                            block_hash: req.block_hash,
                            txs,
                        },
                    ));
                }
            }
            Message::BlockTxn(reply) => self.on_blocktxn(reply).await?,
            Message::SendCompact(sc) => {
                self.events.emit(Event::SendCompact(sc));
            }
            Message::FeeFilter(rate) => {
                self.filter_state.lock().await.peer_fee_filter = Some(FeeRate(rate));
                self.events.emit(Event::FeeFilter(rate));
            }
            Message::SendHeaders => {
                self.filter_state.lock().await.headers_preferred = true;
                self.events.emit(Event::SendHeaders);
            }
            Message::Addr(addrs) => {
                self.events.emit(Event::Addr(addrs));
            }
            Message::GetAddr => {
                let known = self.pool.known_addresses(1000).await;
                for addr in known {
                    self.announcer.send_addr(addr).await;
                }
            }
            Message::GetUtxos(req) => {
                let reply = self.serve.getutxos(&req).await?;
                self.announcer.send(&Message::Utxos(reply));
            }
            Message::Utxos(_) => {
                self.events.emit(Event::Utxos);
            }
            Message::HaveWitness => {
                self.events.emit(Event::HaveWitness);
            }
            Message::Alert(_) => {
                self.events.emit(Event::Alert);
            }
            Message::Reject {
                message, reason, ..
            } => {
                self.events.emit(Event::Reject { message, reason });
            }
            Message::Unknown(cmd) => {
                self.events.emit(Event::Unknown(cmd));
            }
            // Handshake-phase packets should never reach the post-handshake
            // table; if they do, the session state machine has a bug, not
            // the remote peer — treat as unknown rather than panicking.
            Message::Version(_)
            | Message::Verack
            | Message::EncInit(_)
            | Message::EncAck(_)
            | Message::AuthChallenge(_)
            | Message::AuthReply(_)
            | Message::AuthPropose(_) => {
                tracing::warn!("handshake packet reached post-handshake dispatch");
            }
        }
        Ok(())
    }

    async fn on_inv(&self, items: Vec<InventoryHash>) -> Result<()> {
        if items.len() > MAX_INV_ITEMS {
            return Err(Error::protocol(
                "inv exceeds max item count",
                BAN_SCORE_SEVERE,
                Some(self.peer_addr),
            ));
        }
        let (blocks, txs): (Vec<_>, Vec<_>) = items.into_iter().partition(|i| i.is_block_like());
        if !blocks.is_empty() {
            self.events.emit(Event::Blocks(blocks.clone()));
        }
        if !txs.is_empty() {
            self.events.emit(Event::Txs(txs.clone()));
        }
        self.events.emit(Event::Inv([blocks, txs].concat()));
        Ok(())
    }

    async fn on_getdata(&self, items: Vec<InventoryHash>) -> Result<()> {
        if items.len() > MAX_INV_ITEMS {
            return Err(Error::protocol(
                "getdata exceeds max item count",
                BAN_SCORE_SEVERE,
                Some(self.peer_addr),
            ));
        }
        let filter_state = self.filter_state.lock().await;
        let remote_filter = filter_state.remote_filter.clone();
        drop(filter_state);
        let not_found = self
            .serve
            .getdata(&items, &self.announcer, remote_filter.as_ref())
            .await?;
        if !not_found.is_empty() {
            self.announcer.send(&Message::NotFound(not_found));
        }
        Ok(())
    }

    async fn on_filterload(
        &self,
        filter: crate::wire::types::Filter,
        hash_functions_count: u32,
        tweak: crate::wire::types::Tweak,
        flags: u8,
    ) -> Result<()> {
        if !SpvFilter::validate(&filter, hash_functions_count) {
            return Err(Error::protocol(
                "oversized or malformed bloom filter",
                BAN_SCORE_SEVERE,
                Some(self.peer_addr),
            ));
        }
        let spv_filter = SpvFilter::new(filter, hash_functions_count, tweak, flags);
        self.filter_state.lock().await.remote_filter = Some(spv_filter);
        Ok(())
    }

    async fn on_filteradd(&self, data: Vec<u8>) -> Result<()> {
        if data.len() > MAX_FILTERADD_DATA_SIZE {
            return Err(Error::protocol(
                "filteradd element too large",
                BAN_SCORE_MALFORMED,
                Some(self.peer_addr),
            ));
        }
        let mut state = self.filter_state.lock().await;
        match state.remote_filter.as_mut() {
            Some(filter) => {
                filter.add(&data);
                Ok(())
            }
            None => Err(Error::protocol(
                "filteradd without a loaded filter",
                BAN_SCORE_MALFORMED,
                Some(self.peer_addr),
            )),
        }
    }

    /// `cmpctblock` (spec.md §4.10): open a slot, attempt an immediate
    /// mempool fill, and request whatever's still missing via
    /// `getblocktxn` rather than waiting for the peer to offer it.
    async fn on_cmpctblock(&self, block: crate::wire::message::CompactBlock) -> Result<()> {
        let hash = block.block_hash;
        let nonce = block.nonce;
        let short_ids = block.short_ids.clone();
        let compact_blocks = Arc::clone(&self.compact_blocks);
        self.compact_blocks
            .insert(hash, &block, move || {
                tracing::debug!(block = ?hash, "compact block evicted: blocktxn never arrived");
                let compact_blocks = Arc::clone(&compact_blocks);
                tokio::spawn(async move {
                    compact_blocks.evict(hash).await;
                });
            })
            .await?;

        let known = self
            .serve
            .mempool_known_short_ids(hash, nonce)
            .await
            .unwrap_or_default();
        if self.compact_blocks.try_fill(hash, &known).await.is_some() {
            self.compact_blocks.take(hash).await;
            self.events.emit(Event::CompactBlockFilled { block_hash: hash });
            return Ok(());
        }

        let missing: Vec<u64> = short_ids
            .iter()
            .enumerate()
            .filter(|(_, id)| !known.contains_key(id))
            .map(|(i, _)| i as u64)
            .collect();
        if !missing.is_empty() {
            self.announcer.send(&Message::GetBlockTxn(
                crate::wire::message::GetBlockTxn {
                    block_hash: hash,
                    indexes: missing,
                },
            ));
        }
        Ok(())
    }

    /// `blocktxn`: look up the slot it answers; absent means log and
    /// ignore. Otherwise attempt to fill it with the reply's transactions
    /// — failure scores misbehavior, success emits a completion event
    /// (spec.md §4.10).
    async fn on_blocktxn(&self, reply: crate::wire::message::BlockTxn) -> Result<()> {
        let Some(slot) = self.compact_blocks.take(reply.block_hash).await else {
            tracing::debug!(block = ?reply.block_hash, "blocktxn for unknown compact-block slot");
            return Ok(());
        };
        let known = self
            .serve
            .keyed_short_ids(reply.block_hash, slot.nonce, &reply.txs)
            .await
            .unwrap_or_default();
        let complete = slot.short_ids.iter().all(|id| known.contains_key(id));
        if !complete {
            return Err(Error::protocol(
                "blocktxn reply failed to complete the compact block",
                BAN_SCORE_SEVERE,
                Some(self.peer_addr),
            ));
        }
        self.events.emit(Event::CompactBlockFilled {
            block_hash: reply.block_hash,
        });
        Ok(())
    }

    /// Whether this peer has sent `sendheaders` (spec.md §4.4: prefer
    /// headers over `inv` for new blocks once negotiated).
    pub async fn headers_preferred(&self) -> bool {
        self.filter_state.lock().await.headers_preferred
    }

    /// This peer's last-announced `feefilter` floor, if any.
    pub async fn peer_fee_filter(&self) -> Option<FeeRate> {
        self.filter_state.lock().await.peer_fee_filter
    }

    #[cfg(test)]
    pub async fn remote_filter_is_set(&self) -> bool {
        self.filter_state.lock().await.remote_filter.is_some()
    }

    pub async fn has_open_merkle_slot(&self) -> bool {
        !self.merkle.lock().await.is_empty()
    }
}
