//! The logical packet layer the peer dispatches and emits.
//!
//! This module corresponds to `zebra-network::protocol::external`: it
//! defines the internal representation of Bitcoin P2P messages, unlinked
//! from their wire bytes. Actual framing, checksumming and varint encoding
//! are delegated to a `Framer`/`StreamParser` pair the peer is handed
//! (spec.md §1, §6) — this crate does not implement them.

pub mod command;
pub mod header;
pub mod inv;
pub mod message;
pub mod meta_addr;
pub mod types;

pub use command::Command;
pub use header::{BlockHash, CountedHeader, Header, Height, TxId};
pub use inv::InventoryHash;
pub use message::Message;
pub use meta_addr::MetaAddr;
pub use types::{CompactMode, FeeRate, Filter, Nonce, PeerServices, ProtocolVersion, Tweak};
