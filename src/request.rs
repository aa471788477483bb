//! The request/response tracker (spec.md §4.3).
//!
//! Adapted from the "request map keyed by string" redesign note in
//! spec.md §9: a map from `Command` to an ordered `VecDeque` of
//! `RequestEntry`, with per-entry `tokio::time` timeouts instead of one
//! timer per queue. Timeouts remove their own entry by id equality, not by
//! pointer/queue-position, matching spec.md §4.3's "removes itself from
//! its queue by id (equality, not pointer semantics)".

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::constants::REQUEST_TIMEOUT;
use crate::error::Error;
use crate::wire::{Command, Message};

/// What a request's callback wants to happen to its `RequestEntry` after
/// handling a response (spec.md §4.3).
pub enum Disposition {
    /// The category is still waiting on a further related packet (e.g. a
    /// `getheaders` response split across packets); keep the entry armed.
    Keep,
    /// The request is satisfied; dequeue and destroy the entry.
    Done,
}

type CallbackFuture = Pin<Box<dyn Future<Output = Disposition> + Send>>;

/// Owns the async work a response triggers (spec.md §4.1's `version`/
/// `verack` continuation runs chain/mempool lookups, which are async) —
/// `FnMut`, not `FnOnce`, since a `Keep` disposition re-queues the same
/// entry so a later packet in the same category invokes it again.
type Callback = Box<dyn FnMut(std::result::Result<Message, Error>) -> CallbackFuture + Send>;

struct Entry {
    id: u64,
    callback: Option<Callback>,
    timeout: Option<JoinHandle<()>>,
}

/// Tracks outstanding `request(cmd, callback)` calls for one peer.
pub struct RequestTracker {
    queues: Mutex<HashMap<Command, VecDeque<Entry>>>,
    next_id: AtomicU64,
}

impl RequestTracker {
    pub fn new() -> Arc<RequestTracker> {
        Arc::new(RequestTracker {
            queues: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Registers a wait for the next inbound packet of category `cmd`.
    /// Arms a 10s timeout that reports a timeout error to `callback` and
    /// self-removes (spec.md §4.3).
    pub async fn request(self: &Arc<Self>, cmd: Command, callback: Callback) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let tracker = Arc::clone(self);
        let timeout = tokio::spawn(async move {
            tokio::time::sleep(REQUEST_TIMEOUT).await;
            tracker.fire_timeout(cmd, id).await;
        });

        let mut queues = self.queues.lock().await;
        queues.entry(cmd).or_default().push_back(Entry {
            id,
            callback: Some(callback),
            timeout: Some(timeout),
        });
        id
    }

    async fn fire_timeout(self: Arc<Self>, cmd: Command, id: u64) {
        let entry = {
            let mut queues = self.queues.lock().await;
            let queue = match queues.get_mut(&cmd) {
                Some(q) => q,
                None => return,
            };
            let pos = queue.iter().position(|e| e.id == id);
            let entry = pos.map(|p| queue.remove(p)).flatten();
            if queue.is_empty() {
                queues.remove(&cmd);
            }
            entry
        };
        if let Some(mut entry) = entry {
            if let Some(mut cb) = entry.callback.take() {
                cb(Err(Error::protocol(
                    format!("request timed out waiting for {cmd}"),
                    0,
                    None,
                )))
                .await;
            }
        }
    }

    /// Delivers an inbound packet of category `cmd` to the head of its
    /// queue. Unsolicited responses (no queue, or an empty queue) are a
    /// silent no-op (spec.md §4.3).
    pub async fn response(&self, cmd: Command, payload: &Message) {
        let mut entry = {
            let mut queues = self.queues.lock().await;
            let queue = match queues.get_mut(&cmd) {
                Some(q) => q,
                None => return,
            };
            match queue.pop_front() {
                Some(e) => e,
                None => return,
            }
        };

        let Some(cb) = entry.callback.as_mut() else {
            return;
        };
        let disposition = cb(Ok(payload.clone())).await;
        match disposition {
            Disposition::Done => {
                if let Some(handle) = entry.timeout.take() {
                    handle.abort();
                }
            }
            Disposition::Keep => {
                // Still waiting on a subsequent related packet in this
                // category (spec.md §4.3): push the same entry back to the
                // front so the next `cmd` packet reaches this callback
                // instead of being silently dropped. The timeout stays
                // armed; it still bounds the whole wait, not just the
                // first packet.
                let mut queues = self.queues.lock().await;
                queues.entry(cmd).or_default().push_front(entry);
            }
        }
    }

    /// Atomically resolves a pending request (if any) and lets the caller
    /// emit the associated upward event afterward — spec.md §4.3's `fire`.
    pub async fn fire(&self, cmd: Command, payload: &Message) {
        self.response(cmd, payload).await;
    }

    /// Destroys every pending entry across every queue (spec.md §4.11,
    /// `destroy`). Idempotent: a second call simply finds nothing to do.
    pub async fn destroy_all(&self) {
        let mut queues = self.queues.lock().await;
        for (_, mut queue) in queues.drain() {
            while let Some(mut entry) = queue.pop_front() {
                if let Some(handle) = entry.timeout.take() {
                    handle.abort();
                }
                if let Some(mut cb) = entry.callback.take() {
                    cb(Err(Error::internal("peer destroyed", None))).await;
                }
            }
        }
    }

    #[cfg(test)]
    pub async fn pending_count(&self, cmd: Command) -> usize {
        self.queues
            .lock()
            .await
            .get(&cmd)
            .map(|q| q.len())
            .unwrap_or(0)
    }
}
