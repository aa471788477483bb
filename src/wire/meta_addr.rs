//! An address-with-metadata type used in `addr`/`getaddr`.
//!
//! Adapted from the pack's `zebra-network::meta_addr::MetaAddr`. We keep
//! the sanitize-before-relay behavior and drop the `PeerAddrState`/address
//! book ordering machinery, which belongs to the pool (spec.md §1: "peer
//! pool / address manager ... external collaborator").

use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::wire::types::PeerServices;

/// Addresses are sanitized to 10-minute-aligned timestamps before being
/// relayed, the same granularity the teacher's `MetaAddr::sanitize` uses.
pub const TIMESTAMP_TRUNCATION_SECONDS: i64 = 10 * 60;

/// An address with the services it advertised and when we last saw it.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct MetaAddr {
    pub addr: SocketAddr,
    pub services: PeerServices,
    last_seen: i64,
}

impl MetaAddr {
    pub fn new_gossiped(addr: SocketAddr, services: PeerServices, last_seen: i64) -> MetaAddr {
        MetaAddr {
            addr,
            services,
            last_seen,
        }
    }

    pub fn new_now(addr: SocketAddr, services: PeerServices) -> MetaAddr {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        MetaAddr::new_gossiped(addr, services, now)
    }

    pub fn last_seen(&self) -> i64 {
        self.last_seen
    }

    /// A sanitized copy of this address, safe to relay to a remote peer.
    pub fn sanitize(&self) -> MetaAddr {
        let ts = self.last_seen;
        MetaAddr {
            addr: self.addr,
            services: self.services,
            last_seen: ts - ts.rem_euclid(TIMESTAMP_TRUNCATION_SECONDS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_truncates_timestamp() {
        let addr: SocketAddr = "127.0.0.1:8333".parse().unwrap();
        let a = MetaAddr::new_gossiped(addr, PeerServices::NETWORK, 1_000_061);
        let s = a.sanitize();
        assert_eq!(s.last_seen() % TIMESTAMP_TRUNCATION_SECONDS, 0);
        assert!(s.last_seen() <= a.last_seen());
    }
}
