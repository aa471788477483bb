//! Outbound helpers: everything a session sends unprompted (spec.md §4.4).
//!
//! Grounded on `zebra-network`'s split between a connection's inbound
//! dispatch and its outbound `Sink` half — here expressed as a standalone
//! `Announcer` the session owns, rather than inlining `transport.write`
//! calls throughout the state machine.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::constants::{HEADERS_CHUNK_SIZE, INV_CHUNK_SIZE, NO_NONCE_PING_VERSION};
use crate::filter::RollingFilter;
use crate::interfaces::{Framer, Transport};
use crate::wire::header::{CountedHeader, TxId};
use crate::wire::message::{GetUtxos, Message, SendCompact};
use crate::wire::types::{FeeRate, Nonce, ProtocolVersion};
use crate::wire::InventoryHash;

/// One thing worth telling a peer about: either a new block (sent as a
/// header or an `inv` entry depending on what the peer prefers) or a new
/// mempool transaction (subject to the peer's relay/fee-rate policy).
pub enum Announcement {
    Block(CountedHeader),
    Tx { tx_id: TxId, fee_rate: Option<u64> },
}

/// Per-peer context `announce` needs but that the session, not the
/// announcer, owns the source of truth for.
pub struct AnnounceContext {
    pub peer_relay: bool,
    pub peer_fee_filter: Option<FeeRate>,
    pub headers_preferred: bool,
}

/// The outbound half of a session: owns the transport/framer pair and the
/// per-peer dedup filters, and exposes one method per spec.md §4.4 action.
pub struct Announcer {
    transport: Arc<dyn Transport>,
    framer: Arc<dyn Framer>,
    inv_filter: Mutex<RollingFilter>,
    addr_filter: Mutex<RollingFilter>,
}

impl Announcer {
    pub fn new(transport: Arc<dyn Transport>, framer: Arc<dyn Framer>) -> Announcer {
        Announcer {
            transport,
            framer,
            inv_filter: Mutex::new(RollingFilter::inv_filter()),
            addr_filter: Mutex::new(RollingFilter::addr_filter()),
        }
    }

    /// Frame and enqueue one message. Returns `false` if the transport
    /// applied backpressure (spec.md §5: non-blocking, fire-and-forget).
    pub fn send(&self, msg: &Message) -> bool {
        let bytes = self.framer.frame(msg, None);
        self.transport.write(&bytes)
    }

    /// Filter and batch a set of announcements (spec.md §4.4's `announce`):
    /// drop txs the peer doesn't want relayed, drop txs below the peer's
    /// fee filter, convert blocks to headers or `inv` per preference, and
    /// dedup everything — headers included — against the per-peer
    /// inventory filter before it goes out (spec.md §3, §8: never emit the
    /// same hash twice).
    pub async fn announce(&self, items: Vec<Announcement>, ctx: &AnnounceContext) {
        let mut headers = Vec::new();
        let mut inv_items = Vec::new();

        for item in items {
            match item {
                Announcement::Block(counted) => {
                    if ctx.headers_preferred {
                        headers.push(counted);
                    } else {
                        inv_items.push(InventoryHash::Block(counted.hash));
                    }
                }
                Announcement::Tx { tx_id, fee_rate } => {
                    if !ctx.peer_relay {
                        continue;
                    }
                    if let Some(min) = ctx.peer_fee_filter {
                        if fee_rate.map(|r| r < min.0).unwrap_or(false) {
                            continue;
                        }
                    }
                    inv_items.push(InventoryHash::Tx(tx_id));
                }
            }
        }

        if !headers.is_empty() {
            self.send_headers(headers).await;
        }
        if !inv_items.is_empty() {
            self.send_inv(inv_items).await;
        }
    }

    /// Send `inv` in `INV_CHUNK_SIZE`-sized batches, deduplicated against
    /// the rolling inventory filter (spec.md §4.4, §3).
    pub async fn send_inv(&self, items: Vec<InventoryHash>) {
        let mut filter = self.inv_filter.lock().await;
        let fresh: Vec<InventoryHash> = items
            .into_iter()
            .filter(|item| !filter.contains_or_insert(&item.hash_bytes()))
            .collect();
        drop(filter);

        for chunk in fresh.chunks(INV_CHUNK_SIZE) {
            self.send(&Message::Inv(chunk.to_vec()));
        }
    }

    /// Send `headers` in `HEADERS_CHUNK_SIZE`-sized batches, deduplicated
    /// against the same rolling inventory filter `send_inv` uses (spec.md
    /// §4.4, §3).
    pub async fn send_headers(&self, headers: Vec<CountedHeader>) {
        let mut filter = self.inv_filter.lock().await;
        let fresh: Vec<CountedHeader> = headers
            .into_iter()
            .filter(|h| !filter.contains_or_insert(&h.hash.0))
            .collect();
        drop(filter);

        for chunk in fresh.chunks(HEADERS_CHUNK_SIZE) {
            self.send(&Message::Headers(chunk.to_vec()));
        }
    }

    /// Send a gossiped address, deduped the same way inventory is.
    pub async fn send_addr(&self, addr: crate::wire::MetaAddr) {
        let mut filter = self.addr_filter.lock().await;
        if !filter.contains_or_insert(addr.addr.to_string().as_bytes()) {
            drop(filter);
            self.send(&Message::Addr(vec![addr.sanitize()]));
        }
    }

    /// `ping`: nonce-bearing for peers above BIP31's version gate, the
    /// legacy zero-nonce ping for a peer at or below it (spec.md §4.6).
    pub fn send_ping(&self, peer_version: ProtocolVersion, nonce: Nonce) {
        let nonce = if peer_version.0 > NO_NONCE_PING_VERSION {
            nonce
        } else {
            Nonce::ZERO
        };
        self.send(&Message::Ping(nonce));
    }

    pub fn send_pong(&self, nonce: Nonce) {
        self.send(&Message::Pong(nonce));
    }

    pub fn send_version(&self, version: crate::wire::message::Version) {
        self.send(&Message::Version(version));
    }

    pub fn send_verack(&self) {
        self.send(&Message::Verack);
    }

    pub fn send_getaddr(&self) {
        self.send(&Message::GetAddr);
    }

    /// Push our own bloom filter to a peer when we are ourselves an SPV
    /// client (spec.md §4.1 "Ready" actions).
    pub fn push_filter(&self, filter: &crate::filter::SpvFilter) {
        self.send(&filter.to_filterload());
    }

    pub fn send_feefilter(&self, min_fee_rate: FeeRate) {
        self.send(&Message::FeeFilter(min_fee_rate.0));
    }

    pub fn send_sendcmpct(&self, announce: bool, version: u64) {
        self.send(&Message::SendCompact(SendCompact { announce, version }));
    }

    pub fn send_sendheaders(&self) {
        self.send(&Message::SendHeaders);
    }

    pub fn send_getutxos(&self, request: GetUtxos) {
        self.send(&Message::GetUtxos(request));
    }
}
