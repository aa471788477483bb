//! Newtype wrappers and flag sets for primitive wire values.
//!
//! Grounded on `zebra-network::protocol::external::types` (referenced by
//! `message.rs` in the teacher crate but not itself retrieved) and on
//! `aang114-bitcoin-p2p-handshake::messages::types` for the service-bit
//! layout.

use std::fmt;

use bitflags::bitflags;

/// A node's advertised `version` field, e.g. 70015.
#[derive(Copy, Clone, Eq, PartialEq, PartialOrd, Ord, Debug, Hash)]
pub struct ProtocolVersion(pub u32);

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

bitflags! {
    /// Service bits advertised in `version.services` and `addr` entries.
    ///
    /// [Bitcoin reference](https://en.bitcoin.it/wiki/Protocol_documentation#version)
    #[derive(Default)]
    pub struct PeerServices: u64 {
        const NETWORK          = 1 << 0;
        const GETUTXO          = 1 << 1;
        const BLOOM            = 1 << 2;
        const WITNESS          = 1 << 3;
        const XTHIN            = 1 << 4;
        /// Peer serves `getheaders` beyond the default best-effort support;
        /// enforceable per-session via `PeerConfig::require_getheaders`.
        const GETHEADERS       = 1 << 5;
        const NETWORK_LIMITED  = 1 << 10;
    }
}

/// A nonce used by `version` (self-connect detection) and `ping`/`pong`.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub struct Nonce(pub u64);

impl Nonce {
    pub fn random() -> Self {
        Nonce(rand::random())
    }

    /// The sentinel nonce used by legacy (pre-BIP31) `ping`/`pong`.
    pub const ZERO: Nonce = Nonce(0);

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

/// Raw BIP37 bloom filter bytes carried in a `filterload` message.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Filter(pub Vec<u8>);

/// The BIP37 tweak added to the bloom filter's seed.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Tweak(pub u32);

/// BIP133 minimum relay fee rate, in satoshis per kilobyte. `-1` in the
/// source representation means "unset"; we use `Option<FeeRate>` instead.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct FeeRate(pub u64);

/// BIP152 `sendcmpct` announcement mode negotiated with a peer.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum CompactMode {
    /// No compact-block mode has been negotiated.
    None,
    /// Mode 0 (the only mode this crate implements), BIP152 §"Low Bandwidth".
    Mode0,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_nonce_detected() {
        assert!(Nonce::ZERO.is_zero());
        assert!(!Nonce::random().is_zero() || Nonce::random().0 == 0);
    }

    #[test]
    fn peer_services_bits_round_trip() {
        let s = PeerServices::NETWORK | PeerServices::BLOOM;
        assert!(s.contains(PeerServices::NETWORK));
        assert!(s.contains(PeerServices::BLOOM));
        assert!(!s.contains(PeerServices::WITNESS));
    }
}
