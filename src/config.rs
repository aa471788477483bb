//! The peer's configuration schema (spec.md §6).
//!
//! `zebrad` loads its configuration via `serde` + `toml`; the peer crate
//! only owns the *schema*, since loading/watching config files is a CLI
//! concern out of this crate's scope (spec.md §1).

use serde::{Deserialize, Serialize};

use crate::constants::MIN_PROTOCOL_VERSION;

/// Per-peer policy options, matching spec.md §6's configuration list
/// verbatim plus the network parameters the handlers gate on.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Offer/require the BIP151 encryption handshake.
    pub bip151: bool,
    /// Offer/require the BIP150 authentication handshake (requires `bip151`).
    pub bip150: bool,
    /// Negotiate BIP152 compact blocks.
    pub compact: bool,
    /// Require the witness service bit (with the legacy `havewitness`
    /// fallback described in spec.md §4.5).
    pub witness: bool,
    /// Prefer `sendheaders` announcements over `inv` for new blocks.
    pub headers: bool,
    /// This session is an SPV client: applies filter-serving rules and
    /// enforces `NODE_BLOOM` on the remote peer.
    pub spv: bool,
    /// Enforce the remote peer advertising `NODE_GETHEADERS` (spec.md §4.5).
    /// Unset by default since most deployments don't require it.
    pub require_getheaders: bool,
    /// Do not serve chain/mempool resources to peers (spec.md glossary:
    /// "Selfish").
    pub selfish: bool,
    /// Default relay policy before a peer's `version.relay` is known.
    pub relay: bool,

    pub min_protocol_version: u32,
    /// The 4-byte network magic identifying which Bitcoin network (or
    /// testnet/regtest/signet variant) this session speaks to.
    pub network_magic: [u8; 4],
    pub user_agent: String,
}

impl Default for PeerConfig {
    fn default() -> Self {
        PeerConfig {
            bip151: false,
            bip150: false,
            compact: true,
            witness: true,
            headers: true,
            spv: false,
            require_getheaders: false,
            selfish: false,
            relay: true,
            min_protocol_version: MIN_PROTOCOL_VERSION,
            network_magic: [0xf9, 0xbe, 0xb4, 0xd9],
            user_agent: "/btcpeer:0.1.0/".to_string(),
        }
    }
}

impl PeerConfig {
    /// `bip150` only makes sense layered on top of `bip151` (spec.md §4.1).
    pub fn normalized(mut self) -> Self {
        if !self.bip151 {
            self.bip150 = false;
        }
        self
    }
}
