//! A typed event sink, replacing the "global event emitter with >10,000
//! listeners" pattern the REDESIGN FLAGS in spec.md §9 call out.
//!
//! The session *holds* a sender (composition, not the prototype-chain
//! "inheritance from an event emitter" the redesign notes reject) and the
//! pool holds the matching receiver. Grounded on the mpsc-channel-as-event-bus
//! pattern common across the async examples in the pack (e.g.
//! `r3e-network-neo-rs::network::peer` and `radicle-dev-heartwood::service::session`).

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::Error;
use crate::wire::{CountedHeader, InventoryHash, MetaAddr, Message};

/// One of the observable events enumerated in spec.md §6.
#[derive(Debug, Clone)]
pub enum Event {
    Connect,
    Ack,
    Close,
    Error(Arc<Error>),
    Version,
    Verack,
    Ping(u64),
    Pong(u64),
    Addr(Vec<MetaAddr>),
    Inv(Vec<InventoryHash>),
    Blocks(Vec<InventoryHash>),
    Txs(Vec<InventoryHash>),
    Block(Vec<u8>),
    Tx(Vec<u8>),
    Headers(Vec<CountedHeader>),
    SendHeaders,
    MerkleBlock {
        block_hash: crate::wire::BlockHash,
        matched_tx_ids: Vec<crate::wire::header::TxId>,
    },
    FeeFilter(u64),
    Reject { message: String, reason: String },
    Alert,
    NotFound(Vec<InventoryHash>),
    Utxos,
    HaveWitness,
    EncInit,
    EncAck,
    AuthChallenge,
    AuthReply,
    AuthPropose,
    SendCompact(crate::wire::message::SendCompact),
    GetBlockTxn(crate::wire::message::GetBlockTxn),
    /// A `blocktxn` reply completed the compact block the peer was
    /// reconstructing (spec.md §4.10).
    CompactBlockFilled {
        block_hash: crate::wire::BlockHash,
    },
    Unknown(String),
}

impl From<&Message> for Event {
    /// The default "pass the packet upward unchanged" mapping used by
    /// handlers that have nothing more specific to report than "I saw this".
    fn from(msg: &Message) -> Self {
        match msg {
            Message::Unknown(cmd) => Event::Unknown(cmd.clone()),
            other => Event::Unknown(other.command().to_string()),
        }
    }
}

/// The peer's half of the event channel: `send` never blocks the session
/// loop for long (the channel is generously bounded) and a full channel
/// simply means the pool isn't keeping up, not a protocol error.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<Event>,
}

/// The pool's half, returned alongside a fresh `EventSink`.
pub type EventStream = mpsc::Receiver<Event>;

/// Channel depth: generous enough that a slow pool consumer does not stall
/// packet dispatch under normal load.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

impl EventSink {
    pub fn channel() -> (EventSink, EventStream) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        (EventSink { tx }, rx)
    }

    /// Emit an event upward. Never fails the caller: if the pool has
    /// dropped its receiver the peer is already being torn down.
    pub fn emit(&self, event: Event) {
        if self.tx.try_send(event).is_err() {
            tracing::trace!("event dropped: pool receiver full or closed");
        }
    }
}
