//! The failure taxonomy (spec.md §7).
//!
//! Grounded on `thiserror` usage throughout the teacher workspace
//! (`zebra-network`, `zebra-chain`, `zebra-consensus` all derive their
//! error enums this way).

use std::net::SocketAddr;

use thiserror::Error;

/// One of the three severities spec.md §4.11/§7 distinguishes.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Severity {
    /// Destroy the peer; report negative reputation upward.
    Transport,
    /// Destroy the peer; the handshake could not complete.
    Handshake,
    /// Increment ban score; may send `reject`; may destroy if threshold reached.
    Protocol,
    /// Not an error for ban-scoring purposes: serve the item as `notfound` instead.
    PolicyOrMissing,
    /// Surface upward as an `error` event; serve-side lock is released; peer lives.
    Internal,
}

/// The peer's error type. Every public fallible operation returns this.
#[derive(Error, Debug)]
pub enum Error {
    #[error("transport failure{}: {kind}", addr_suffix(.addr))]
    Transport {
        kind: TransportFailure,
        addr: Option<SocketAddr>,
    },

    #[error("handshake failure{}: {reason}", addr_suffix(.addr))]
    Handshake {
        reason: String,
        addr: Option<SocketAddr>,
    },

    #[error("protocol violation{} (+{score}): {reason}", addr_suffix(.addr))]
    Protocol {
        reason: String,
        score: u32,
        addr: Option<SocketAddr>,
    },

    #[error("policy rejection{}: {reason}", addr_suffix(.addr))]
    Policy {
        reason: String,
        addr: Option<SocketAddr>,
    },

    #[error("resource missing{}: {reason}", addr_suffix(.addr))]
    ResourceMissing {
        reason: String,
        addr: Option<SocketAddr>,
    },

    #[error("internal error{}: {reason}", addr_suffix(.addr))]
    Internal {
        reason: String,
        addr: Option<SocketAddr>,
    },
}

fn addr_suffix(addr: &Option<SocketAddr>) -> String {
    match addr {
        Some(a) => format!(" ({a})"),
        None => String::new(),
    }
}

/// Transport-level failures (spec.md §4.11): any of these, or any error
/// observed before the transport reports `connected`, destroys the peer.
#[derive(Error, Copy, Clone, Eq, PartialEq, Debug)]
pub enum TransportFailure {
    #[error("connection refused")]
    ConnectionRefused,
    #[error("host unreachable")]
    HostUnreachable,
    #[error("network unreachable")]
    NetworkUnreachable,
    #[error("host not found")]
    NotFound,
    #[error("connection reset")]
    ConnectionReset,
    #[error("connect timed out")]
    ConnectTimeout,
}

impl Error {
    pub fn severity(&self) -> Severity {
        match self {
            Error::Transport { .. } => Severity::Transport,
            Error::Handshake { .. } => Severity::Handshake,
            Error::Protocol { .. } => Severity::Protocol,
            Error::Policy { .. } | Error::ResourceMissing { .. } => Severity::PolicyOrMissing,
            Error::Internal { .. } => Severity::Internal,
        }
    }

    /// The ban score to add to the peer, if any (spec.md §4.11).
    pub fn ban_score(&self) -> u32 {
        match self {
            Error::Protocol { score, .. } => *score,
            _ => 0,
        }
    }

    pub fn protocol(reason: impl Into<String>, score: u32, addr: Option<SocketAddr>) -> Error {
        Error::Protocol {
            reason: reason.into(),
            score,
            addr,
        }
    }

    pub fn internal(reason: impl Into<String>, addr: Option<SocketAddr>) -> Error {
        Error::Internal {
            reason: reason.into(),
            addr,
        }
    }

    pub fn handshake(reason: impl Into<String>, addr: Option<SocketAddr>) -> Error {
        Error::Handshake {
            reason: reason.into(),
            addr,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
