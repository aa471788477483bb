//! Named protocol gates, limits, and timeouts.
//!
//! Magic numbers appear here once, as named constants, rather than inline
//! in handler bodies — the same role `aang114-bitcoin-p2p-handshake::constants`
//! and `zebra-network::protocol::external`'s version gates play in the pack.

use std::time::Duration;

/// The minimum `version.version` this crate will accept from a peer.
pub const MIN_PROTOCOL_VERSION: u32 = 31800;

/// Below this version, `ping`/`pong` carry no nonce (spec.md §4.6).
pub const NO_NONCE_PING_VERSION: u32 = 60000;

/// `sendheaders` is only offered to peers at or above this version.
pub const SENDHEADERS_VERSION: u32 = 70012;

/// `sendcmpct` is only offered to peers at or above this version.
pub const SENDCMPCT_VERSION: u32 = 70014;

/// BIP152 compact-block protocol version this crate announces.
pub const COMPACT_BLOCKS_VERSION: u32 = 70015;

/// Maximum `inv`/`getdata` items per message before it's a ban-worthy
/// protocol violation (spec.md §4.4, §4.7, §8).
pub const MAX_INV_ITEMS: usize = 50_000;

/// Maximum `headers` items per message (spec.md §4.4, §8).
pub const MAX_HEADERS: usize = 2_000;

/// Maximum prevouts accepted in one `getutxos` request (spec.md §4.7).
pub const MAX_GETUTXOS_PREVOUTS: usize = 15;

/// Maximum hashes walked by one `getblocks` sweep before `hashContinue`
/// takes over (spec.md §4.7).
pub const GETBLOCKS_WALK_LIMIT: usize = 500;

/// How close to the chain tip a block must be to qualify for compact-block
/// service instead of a full block (spec.md §4.7, §8).
pub const COMPACT_BLOCK_MAX_DEPTH: u32 = 10;

/// How close to the chain tip a block must be for `getblocktxn` to be
/// served at all (spec.md §4.10, §8).
pub const GETBLOCKTXN_MAX_DEPTH: u32 = 15;

/// BIP37 filter size limits (spec.md §4.8).
pub const MAX_BLOOM_FILTER_SIZE: usize = 36_000;
pub const MAX_BLOOM_HASH_FUNCS: u32 = 50;
pub const MAX_FILTERADD_DATA_SIZE: usize = 520;

/// Ban score added for a malformed-but-not-fatal parse (spec.md §4.11, §7).
pub const BAN_SCORE_MALFORMED: u32 = 10;
/// Ban score added for the heavier protocol violations spec.md §4.11 lists.
pub const BAN_SCORE_SEVERE: u32 = 100;
/// Ban score at which the pool should disconnect/ban the peer.
pub const BAN_SCORE_THRESHOLD: u32 = 100;

/// Rolling address filter sizing (spec.md §3).
pub const ADDR_FILTER_ITEMS: usize = 5_000;
pub const ADDR_FILTER_FP_RATE: f64 = 1e-3;

/// Rolling inventory filter sizing (spec.md §3).
pub const INV_FILTER_ITEMS: usize = 50_000;
pub const INV_FILTER_FP_RATE: f64 = 1e-6;

/// Chunk sizes for outbound batching (spec.md §4.4).
pub const INV_CHUNK_SIZE: usize = 50_000;
pub const HEADERS_CHUNK_SIZE: usize = 2_000;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const BIP151_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);
pub const BIP150_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const COMPACT_BLOCK_TIMEOUT: Duration = Duration::from_secs(10);
pub const PING_INTERVAL: Duration = Duration::from_secs(120);

/// Bounded retry count for SipHash short-ID collisions during compact
/// block construction (spec.md §9, Open Question: "specify a bounded
/// retry").
pub const COMPACT_BLOCK_NONCE_RETRIES: u32 = 16;
