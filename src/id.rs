//! A per-pool session-id generator.
//!
//! Replaces the "process-wide counter `Peer.uid`" pattern the REDESIGN
//! FLAGS in spec.md §9 call out: the generator is a value the pool
//! constructs once and passes to each new `Session`, not module-level
//! mutable state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Clone)]
pub struct SessionIdGenerator {
    next: Arc<AtomicU64>,
}

impl SessionIdGenerator {
    pub fn new() -> SessionIdGenerator {
        SessionIdGenerator {
            next: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn next_id(&self) -> SessionId {
        SessionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SessionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}
