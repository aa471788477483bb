//! The peer session: one long-lived P2P connection and its state machine
//! (spec.md §3, §4.1).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::announce::{Announcement, AnnounceContext, Announcer};
use crate::compact::CompactBlockTable;
use crate::config::PeerConfig;
use crate::constants::{
    BAN_SCORE_MALFORMED, BAN_SCORE_THRESHOLD, BIP150_HANDSHAKE_TIMEOUT, BIP151_HANDSHAKE_TIMEOUT,
    COMPACT_BLOCKS_VERSION, PING_INTERVAL, SENDCMPCT_VERSION, SENDHEADERS_VERSION,
};
use crate::dispatch::Dispatcher;
use crate::error::{Error, Result, Severity};
use crate::event::{Event, EventSink};
use crate::id::SessionId;
use crate::interfaces::{
    AuthHandshake, Chain, EncryptionHandshake, Framer, Mempool, Pool, StreamParser, Transport,
};
use crate::request::RequestTracker;
use crate::serve::ServeHandlers;
use crate::wire::header::CountedHeader;
use crate::wire::message::{Message, Version};
use crate::wire::types::{FeeRate, Nonce, PeerServices, ProtocolVersion};
use crate::wire::InventoryHash;

/// The peer's lifecycle states (spec.md §4.1).
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum State {
    Connecting,
    EncHandshake,
    AuthHandshake,
    VersionExchange,
    Ready,
    Closed,
}

/// Collaborators and handshake objects a caller hands the peer when
/// constructing a session — everything spec.md §6 lists as external.
pub struct SessionDeps {
    pub transport: Arc<dyn Transport>,
    pub framer: Arc<dyn Framer>,
    pub parser: Box<dyn StreamParser>,
    pub chain: Arc<dyn Chain>,
    pub mempool: Arc<dyn Mempool>,
    pub pool: Arc<dyn Pool>,
    pub enc_handshake: Option<Box<dyn EncryptionHandshake>>,
    pub auth_handshake: Option<Box<dyn AuthHandshake>>,
    /// Whether this session initiated the connection. Governs which
    /// `version` service-bit checks apply and whether a BIP150
    /// `authchallenge` is sent first (spec.md §4.1, §4.5).
    pub outbound: bool,
}

/// One long-lived P2P session.
pub struct Session {
    pub id: SessionId,
    config: PeerConfig,
    peer_addr: SocketAddr,

    transport: Arc<dyn Transport>,
    chain: Arc<dyn Chain>,
    mempool: Arc<dyn Mempool>,
    pool: Arc<dyn Pool>,
    announcer: Arc<Announcer>,
    dispatcher: Dispatcher,
    request_tracker: Arc<RequestTracker>,
    outbound: bool,

    parser: Mutex<Box<dyn StreamParser>>,
    enc_handshake: Option<Box<dyn EncryptionHandshake>>,
    auth_handshake: Option<Box<dyn AuthHandshake>>,

    state: Mutex<State>,
    remote_version: Mutex<Option<Version>>,
    local_nonce: Nonce,
    verack_sent: AtomicBool,
    verack_received: AtomicBool,
    ban_score: AtomicU32,
    last_recv_millis: AtomicI64,
    destroyed: AtomicBool,
    events: EventSink,

    last_ping: Mutex<Option<(Nonce, tokio::time::Instant)>>,
    /// Rolling minimum observed ping round-trip, in milliseconds.
    /// `u64::MAX` means "no sample yet" (spec.md §9 Open Question: exposed
    /// as `min_ping() -> Option<Duration>`, never a sentinel outside this
    /// module).
    min_ping_millis: AtomicU64,
    ping_task: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub fn new(
        id: SessionId,
        config: PeerConfig,
        peer_addr: SocketAddr,
        deps: SessionDeps,
        events: EventSink,
    ) -> Arc<Session> {
        let announcer = Arc::new(Announcer::new(deps.transport.clone(), deps.framer.clone()));
        let request_tracker = RequestTracker::new();
        let compact_blocks = CompactBlockTable::new();
        let serve = Arc::new(ServeHandlers::new(
            deps.chain.clone(),
            deps.mempool.clone(),
            deps.pool.clone(),
            peer_addr,
            config.selfish,
            config.spv,
        ));
        let dispatcher = Dispatcher::new(
            serve,
            announcer.clone(),
            request_tracker.clone(),
            compact_blocks,
            events.clone(),
            deps.pool.clone(),
            peer_addr,
        );

        Arc::new(Session {
            id,
            local_nonce: deps.pool.local_nonce(),
            config,
            peer_addr,
            transport: deps.transport,
            chain: deps.chain,
            mempool: deps.mempool,
            pool: deps.pool,
            announcer,
            dispatcher,
            request_tracker,
            outbound: deps.outbound,
            parser: Mutex::new(deps.parser),
            enc_handshake: deps.enc_handshake,
            auth_handshake: deps.auth_handshake,
            state: Mutex::new(State::Connecting),
            remote_version: Mutex::new(None),
            verack_sent: AtomicBool::new(false),
            verack_received: AtomicBool::new(false),
            ban_score: AtomicU32::new(0),
            last_recv_millis: AtomicI64::new(0),
            destroyed: AtomicBool::new(false),
            events,
            last_ping: Mutex::new(None),
            min_ping_millis: AtomicU64::new(u64::MAX),
            ping_task: Mutex::new(None),
        })
    }

    pub fn state(&self) -> State {
        // A blocking try_lock is safe here: `state` is only ever held
        // across a single synchronous assignment, never across an .await.
        *self.state.try_lock().expect("state mutex is never held across an await")
    }

    pub fn ban_score(&self) -> u32 {
        self.ban_score.load(Ordering::Relaxed)
    }

    /// The current rolling-minimum observed ping latency, or `None` if no
    /// ping/pong round-trip has completed yet.
    pub fn min_ping(&self) -> Option<Duration> {
        match self.min_ping_millis.load(Ordering::Relaxed) {
            u64::MAX => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn last_recv(&self) -> i64 {
        self.last_recv_millis.load(Ordering::Relaxed)
    }

    /// The entry point a pool calls to relay new blocks/transactions to
    /// this peer (spec.md §4.4): applies the peer's relay/fee-filter
    /// policy and headers-vs-inv preference via `Announcer::announce`,
    /// using this session's currently negotiated state.
    pub async fn announce(&self, items: Vec<Announcement>) {
        let peer_relay = self
            .remote_version
            .lock()
            .await
            .as_ref()
            .map(|v| v.relay)
            .unwrap_or(true);
        let ctx = AnnounceContext {
            peer_relay,
            peer_fee_filter: self.dispatcher.peer_fee_filter().await,
            headers_preferred: self.dispatcher.headers_preferred().await,
        };
        self.announcer.announce(items, &ctx).await;
    }

    /// Resolves raw inventory hashes (as the pool tracks broadcast
    /// inventory) into the typed `Announcement`s `announce` expects,
    /// dropping anything the chain/mempool no longer knows about.
    async fn inventory_to_announcements(&self, items: Vec<InventoryHash>) -> Vec<Announcement> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match item {
                InventoryHash::Block(hash) | InventoryHash::WitnessBlock(hash) => {
                    if let Some(header) = self.chain.get_header(hash).await {
                        out.push(Announcement::Block(CountedHeader {
                            header,
                            hash,
                            tx_count: 0,
                        }));
                    }
                }
                InventoryHash::Tx(tx_id) | InventoryHash::WitnessTx(tx_id) => {
                    out.push(Announcement::Tx {
                        tx_id,
                        fee_rate: self.mempool.fee_rate(tx_id).await,
                    });
                }
                InventoryHash::Error
                | InventoryHash::FilteredBlock(_)
                | InventoryHash::CompactBlock(_)
                | InventoryHash::WitnessFilteredBlock(_) => {}
            }
        }
        out
    }

    /// Kicks off the connection: BIP151 (if configured), then BIP150 (if
    /// configured, requires BIP151), then `version` (spec.md §4.1).
    pub async fn start(self: &Arc<Self>) {
        self.events.emit(Event::Connect);
        if self.config.bip151 && self.enc_handshake.is_some() {
            *self.state.lock().await = State::EncHandshake;
            self.begin_enc_handshake().await;
        } else {
            self.begin_version_exchange().await;
        }
    }

    async fn begin_enc_handshake(self: &Arc<Self>) {
        if let Some(enc) = self.enc_handshake.as_ref() {
            let payload = enc.to_encinit();
            self.announcer.send(&Message::EncInit(payload));
        }
        let session = Arc::clone(self);
        tokio::spawn(async move { session.wait_enc_handshake().await });
    }

    async fn wait_enc_handshake(self: Arc<Self>) {
        let result = match self.enc_handshake.as_ref() {
            Some(enc) => enc.wait(BIP151_HANDSHAKE_TIMEOUT).await,
            None => Ok(()),
        };
        match result {
            Ok(()) => {
                if self.config.bip150 && self.auth_handshake.is_some() {
                    *self.state.lock().await = State::AuthHandshake;
                    self.begin_auth_handshake().await;
                } else {
                    self.begin_version_exchange().await;
                }
            }
            Err(e) => self.handle_error(e).await,
        }
    }

    async fn begin_auth_handshake(self: &Arc<Self>) {
        // spec.md §4.1: an `authchallenge` only goes out first when we
        // initiated the connection and already have a known identity for
        // the remote peer to verify the reply against; otherwise the
        // handshake waits for the peer to send one.
        if let Some(auth) = self.auth_handshake.as_ref() {
            if self.outbound && auth.has_known_identity() {
                let challenge = auth.to_challenge();
                self.announcer.send(&Message::AuthChallenge(challenge));
            }
        }
        let session = Arc::clone(self);
        tokio::spawn(async move { session.wait_auth_handshake().await });
    }

    async fn wait_auth_handshake(self: Arc<Self>) {
        let result = match self.auth_handshake.as_ref() {
            Some(auth) => auth.wait(BIP150_HANDSHAKE_TIMEOUT).await,
            None => Ok(()),
        };
        match result {
            Ok(()) => self.begin_version_exchange().await,
            Err(e) => self.handle_error(e).await,
        }
    }

    async fn begin_version_exchange(self: &Arc<Self>) {
        *self.state.lock().await = State::VersionExchange;
        let version = self.build_version_message();
        self.announcer.send_version(version);
        self.await_remote_version().await;
        self.await_remote_verack().await;
    }

    /// Registers the wait for the peer's `version` through the request
    /// tracker (spec.md §4.1, §4.3), rather than handling it inline in
    /// `on_message` — the tracker's timeout is what bounds how long the
    /// handshake waits before erroring out.
    async fn await_remote_version(self: &Arc<Self>) {
        let session = Arc::clone(self);
        self.request_tracker
            .request(
                crate::wire::Command::Version,
                Box::new(move |res| {
                    let session = Arc::clone(&session);
                    Box::pin(async move {
                        match res {
                            Ok(Message::Version(v)) => {
                                if let Err(e) = session.on_version(v).await {
                                    session.handle_error(e).await;
                                }
                            }
                            Err(e) => session.handle_error(e).await,
                            Ok(_) => {}
                        }
                        crate::request::Disposition::Done
                    })
                }),
            )
            .await;
    }

    /// Registers the wait for the peer's `verack` the same way
    /// (spec.md §4.1, §4.3).
    async fn await_remote_verack(self: &Arc<Self>) {
        let session = Arc::clone(self);
        self.request_tracker
            .request(
                crate::wire::Command::Verack,
                Box::new(move |res| {
                    let session = Arc::clone(&session);
                    Box::pin(async move {
                        match res {
                            Ok(Message::Verack) => {
                                let _ = session.on_verack().await;
                            }
                            Err(e) => session.handle_error(e).await,
                            Ok(_) => {}
                        }
                        crate::request::Disposition::Done
                    })
                }),
            )
            .await;
    }

    fn build_version_message(&self) -> Version {
        Version {
            version: ProtocolVersion(COMPACT_BLOCKS_VERSION),
            services: self.pool.local_services(),
            timestamp: now_secs(),
            address_recv: (PeerServices::NETWORK, self.peer_addr),
            address_from: (self.pool.local_services(), self.pool.local_address()),
            nonce: self.local_nonce,
            user_agent: self.config.user_agent.clone(),
            best_block: self.chain.height(),
            relay: self.config.relay,
        }
    }

    /// Feed raw inbound bytes to the parser and dispatch every packet it
    /// yields. Errors are handled internally (ban-scored or fatal per
    /// spec.md §4.11); this only returns `Err` for a destroyed session.
    pub async fn receive(self: &Arc<Self>, bytes: &[u8]) -> Result<()> {
        if self.destroyed.load(Ordering::Acquire) {
            return Ok(());
        }
        self.last_recv_millis.store(now_millis(), Ordering::Relaxed);

        let parsed = {
            let mut parser = self.parser.lock().await;
            parser.feed(bytes)
        };
        let messages = match parsed {
            Ok(m) => m,
            Err(reason) => {
                self.handle_error(Error::protocol(reason, BAN_SCORE_MALFORMED, Some(self.peer_addr)))
                    .await;
                return Ok(());
            }
        };

        for msg in messages {
            if let Err(e) = self.on_message(msg).await {
                self.handle_error(e).await;
            }
        }
        Ok(())
    }

    async fn on_message(self: &Arc<Self>, msg: Message) -> Result<()> {
        let state = *self.state.lock().await;
        match (state, msg) {
            (State::EncHandshake, Message::EncInit(payload)) => self.on_encinit(&payload),
            (State::EncHandshake, Message::EncAck(payload)) => self.on_encack(&payload),
            (State::EncHandshake, _) => Ok(()),

            (State::AuthHandshake, Message::AuthChallenge(payload)) => self.on_authchallenge(&payload),
            (State::AuthHandshake, Message::AuthReply(payload)) => self.on_authreply(&payload),
            (State::AuthHandshake, Message::AuthPropose(payload)) => self.on_authpropose(&payload),
            (State::AuthHandshake, _) => Ok(()),

            (State::VersionExchange, Message::Version(v)) => {
                let msg = Message::Version(v);
                self.request_tracker.fire(crate::wire::Command::Version, &msg).await;
                Ok(())
            }
            (State::VersionExchange, Message::Verack) => {
                self.request_tracker.fire(crate::wire::Command::Verack, &Message::Verack).await;
                Ok(())
            }
            (State::VersionExchange, _) => Ok(()),

            (State::Ready, Message::Pong(nonce)) => {
                self.observe_pong(nonce).await;
                self.dispatcher.dispatch(Message::Pong(nonce)).await
            }
            (State::Ready, msg) => self.dispatcher.dispatch(msg).await,

            (State::Connecting, _) | (State::Closed, _) => Ok(()),
        }
    }

    fn on_encinit(&self, payload: &[u8]) -> Result<()> {
        if let Some(enc) = self.enc_handshake.as_ref() {
            enc.on_encinit(payload)?;
            if !enc.completed() {
                let ack = enc.to_encack();
                self.announcer.send(&Message::EncAck(ack));
            }
        }
        Ok(())
    }

    fn on_encack(&self, payload: &[u8]) -> Result<()> {
        if let Some(enc) = self.enc_handshake.as_ref() {
            enc.on_encack(payload)?;
        }
        Ok(())
    }

    fn on_authchallenge(&self, payload: &[u8]) -> Result<()> {
        if let Some(auth) = self.auth_handshake.as_ref() {
            let reply = auth.on_challenge(payload)?;
            self.announcer.send(&Message::AuthReply(reply));
        }
        Ok(())
    }

    fn on_authreply(&self, payload: &[u8]) -> Result<()> {
        if let Some(auth) = self.auth_handshake.as_ref() {
            auth.on_reply(payload)?;
        }
        Ok(())
    }

    fn on_authpropose(&self, payload: &[u8]) -> Result<()> {
        if let Some(auth) = self.auth_handshake.as_ref() {
            let challenge = auth.on_propose(payload)?;
            self.announcer.send(&Message::AuthChallenge(challenge));
        }
        Ok(())
    }

    /// `version` (spec.md §4.1): self-connect detection via nonce,
    /// protocol version floor, service-bit requirements, then reply
    /// `verack`.
    async fn on_version(self: &Arc<Self>, v: Version) -> Result<()> {
        if v.nonce == self.local_nonce && !v.nonce.is_zero() {
            return Err(Error::handshake("self-connect detected", Some(self.peer_addr)));
        }
        if v.version.0 < self.config.min_protocol_version {
            return Err(Error::handshake(
                format!("peer protocol version {} below minimum", v.version.0),
                Some(self.peer_addr),
            ));
        }
        if let Err(e) = self.check_required_services(&v.services) {
            self.pool.ignore(self.peer_addr).await;
            return Err(e);
        }

        *self.remote_version.lock().await = Some(v);
        self.events.emit(Event::Version);
        self.announcer.send_verack();
        self.verack_sent.store(true, Ordering::Relaxed);
        self.check_ready().await;
        Ok(())
    }

    /// NETWORK/NODE_GETHEADERS/NODE_BLOOM requirements a `version` must
    /// satisfy (spec.md §4.5). The witness bit is deliberately excluded:
    /// its enforcement is the legacy `havewitness` fallback in `on_ready`,
    /// not an immediate rejection here.
    fn check_required_services(&self, services: &PeerServices) -> Result<()> {
        if self.outbound && !services.contains(PeerServices::NETWORK) {
            return Err(Error::handshake(
                "outbound peer missing the NETWORK service bit",
                Some(self.peer_addr),
            ));
        }
        if self.config.require_getheaders && !services.contains(PeerServices::GETHEADERS) {
            return Err(Error::handshake(
                "peer missing the required NODE_GETHEADERS service bit",
                Some(self.peer_addr),
            ));
        }
        if self.config.spv && !services.contains(PeerServices::BLOOM) {
            return Err(Error::handshake(
                "peer missing NODE_BLOOM required for an SPV session",
                Some(self.peer_addr),
            ));
        }
        Ok(())
    }

    async fn on_verack(self: &Arc<Self>) -> Result<()> {
        self.verack_received.store(true, Ordering::Relaxed);
        self.events.emit(Event::Verack);
        self.check_ready().await;
        Ok(())
    }

    /// Transition to `Ready` once both a valid `version` has been received
    /// and `verack` has been exchanged in both directions (spec.md §4.1,
    /// §9's "`ack` implies `version` is present" invariant: we only ever
    /// emit `Ack` after `remote_version` is `Some`).
    async fn check_ready(self: &Arc<Self>) {
        let have_version = self.remote_version.lock().await.is_some();
        if !have_version
            || !self.verack_sent.load(Ordering::Relaxed)
            || !self.verack_received.load(Ordering::Relaxed)
        {
            return;
        }

        {
            let mut state = self.state.lock().await;
            if *state == State::Ready {
                return;
            }
            *state = State::Ready;
        }

        debug_assert!(self.remote_version.lock().await.is_some());
        self.events.emit(Event::Ack);
        self.on_ready().await;
    }

    /// The "Ready" actions spec.md §4.1 lists, fired once: optional
    /// `sendheaders`, legacy `havewitness` fallback, optional `sendcmpct`,
    /// `getaddr`, push our own filter if we're an SPV client, announce our
    /// current fee floor, relay in-flight broadcast inventory, then start
    /// the keep-alive ping loop.
    async fn on_ready(self: &Arc<Self>) {
        let remote = self.remote_version.lock().await.clone();
        let remote_version = remote.as_ref().map(|v| v.version.0).unwrap_or(0);
        let remote_services = remote.as_ref().map(|v| v.services).unwrap_or(PeerServices::empty());

        if self.config.headers && remote_version >= SENDHEADERS_VERSION {
            self.announcer.send_sendheaders();
        }
        // Legacy fallback (spec.md §4.5): a peer that hasn't advertised the
        // witness service bit is asked to confirm witness support via
        // `havewitness`, used on networks that predate the bit.
        if self.config.witness && !remote_services.contains(PeerServices::WITNESS) {
            self.announcer.send(&Message::HaveWitness);
        }
        if self.config.compact && remote_version >= COMPACT_BLOCKS_VERSION {
            self.announcer.send_sendcmpct(true, SENDCMPCT_VERSION as u64);
        }
        self.announcer.send_getaddr();
        if let Some(filter) = self.pool.spv_filter() {
            self.announcer.push_filter(&filter);
        }
        if let Some(rate) = self.pool.pool_fee_rate() {
            self.announcer.send_feefilter(FeeRate(rate));
        }
        let inventory = self.pool.broadcast_inventory();
        if !inventory.is_empty() {
            let announcements = self.inventory_to_announcements(inventory).await;
            if !announcements.is_empty() {
                self.announce(announcements).await;
            }
        }

        let session = Arc::clone(self);
        let handle = tokio::spawn(async move { session.run_ping_loop().await });
        *self.ping_task.lock().await = Some(handle);
    }

    async fn run_ping_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(PING_INTERVAL);
        interval.tick().await; // the first tick fires immediately; skip it
        loop {
            interval.tick().await;
            if self.destroyed.load(Ordering::Acquire) {
                return;
            }
            let nonce = Nonce::random();
            *self.last_ping.lock().await = Some((nonce, tokio::time::Instant::now()));
            let remote_version = self
                .remote_version
                .lock()
                .await
                .as_ref()
                .map(|v| v.version)
                .unwrap_or(ProtocolVersion(0));
            self.announcer.send_ping(remote_version, nonce);
        }
    }

    async fn observe_pong(&self, nonce: Nonce) {
        let mut guard = self.last_ping.lock().await;
        if let Some((expected, sent_at)) = *guard {
            if expected == nonce {
                let rtt_millis = sent_at.elapsed().as_millis() as u64;
                self.min_ping_millis.fetch_min(rtt_millis, Ordering::Relaxed);
                *guard = None;
            }
        }
    }

    /// Classifies and acts on an error per spec.md §4.11/§7: transport and
    /// handshake failures destroy the peer; protocol violations add ban
    /// score and destroy once the threshold is reached; policy/missing
    /// outcomes are not errors for scoring purposes; internal errors
    /// surface upward without affecting ban score.
    async fn handle_error(self: &Arc<Self>, err: Error) {
        match err.severity() {
            Severity::Transport | Severity::Handshake => {
                self.events.emit(Event::Error(Arc::new(err)));
                self.destroy().await;
            }
            Severity::Protocol => {
                let score = err.ban_score();
                let total = self.ban_score.fetch_add(score, Ordering::Relaxed) + score;
                self.pool.set_misbehavior(self.peer_addr, score).await;
                self.events.emit(Event::Error(Arc::new(err)));
                if total >= BAN_SCORE_THRESHOLD {
                    self.destroy().await;
                }
            }
            Severity::PolicyOrMissing => {}
            Severity::Internal => {
                self.events.emit(Event::Error(Arc::new(err)));
            }
        }
    }

    /// Idempotent teardown (spec.md §4.11): a second call is a no-op.
    pub async fn destroy(self: &Arc<Self>) {
        if self
            .destroyed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return;
        }
        *self.state.lock().await = State::Closed;

        if let Some(handle) = self.ping_task.lock().await.take() {
            handle.abort();
        }
        self.request_tracker.destroy_all().await;
        if let Some(enc) = self.enc_handshake.as_ref() {
            enc.destroy();
        }
        if let Some(auth) = self.auth_handshake.as_ref() {
            auth.destroy();
        }
        self.transport.destroy().await;
        self.events.emit(Event::Close);
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    use crate::filter::SpvFilter;
    use crate::interfaces::Coin;
    use crate::wire::header::{BlockHash, CountedHeader, Header, Height, TxId};
    use crate::wire::MetaAddr;

    struct NullTransport {
        destroyed: StdMutex<bool>,
        writes: StdMutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl Transport for NullTransport {
        fn write(&self, bytes: &[u8]) -> bool {
            self.writes.lock().unwrap().push(bytes.to_vec());
            true
        }
        async fn destroy(&self) {
            *self.destroyed.lock().unwrap() = true;
        }
        fn peer_addr(&self) -> SocketAddr {
            "203.0.113.7:8333".parse().unwrap()
        }
    }

    struct PassthroughFramer;
    impl Framer for PassthroughFramer {
        fn frame(&self, msg: &Message, _checksum: Option<[u8; 4]>) -> Vec<u8> {
            msg.to_string().into_bytes()
        }
    }

    /// A parser stub the tests drive directly via a shared queue, since the
    /// wire codec itself is out of scope (spec.md §1).
    struct QueueParser {
        queue: Arc<StdMutex<Vec<Message>>>,
    }
    impl StreamParser for QueueParser {
        fn feed(&mut self, _chunk: &[u8]) -> std::result::Result<Vec<Message>, String> {
            Ok(std::mem::take(&mut self.queue.lock().unwrap()))
        }
    }

    struct EmptyChain;
    #[async_trait]
    impl Chain for EmptyChain {
        fn height(&self) -> Height {
            Height(0)
        }
        fn tip_hash(&self) -> BlockHash {
            BlockHash([0; 32])
        }
        fn synced(&self) -> bool {
            true
        }
        fn spv(&self) -> bool {
            false
        }
        fn prune(&self) -> bool {
            false
        }
        async fn get_block(&self, _hash: BlockHash) -> Option<Vec<u8>> {
            None
        }
        async fn get_header(&self, _hash: BlockHash) -> Option<Header> {
            None
        }
        async fn get_coin(&self, _tx_id: TxId, _index: u32) -> Option<Coin> {
            None
        }
        async fn block_height(&self, _hash: BlockHash) -> Option<Height> {
            None
        }
        async fn get_block_txs(&self, _hash: BlockHash) -> Option<Vec<(TxId, Vec<u8>)>> {
            None
        }
        async fn compact_block_keys(&self, _hash: BlockHash, _nonce: u64) -> Option<(u64, u64)> {
            None
        }
        async fn find_locator(&self, _locator: &[BlockHash]) -> Option<BlockHash> {
            None
        }
        async fn get_next_hash(&self, _hash: BlockHash) -> Option<BlockHash> {
            None
        }
        async fn headers_from(
            &self,
            _hash: BlockHash,
            _stop: Option<BlockHash>,
            _limit: usize,
        ) -> Vec<CountedHeader> {
            vec![]
        }
        async fn block_hashes_from(
            &self,
            _hash: BlockHash,
            _stop: Option<BlockHash>,
            _limit: usize,
        ) -> Vec<BlockHash> {
            vec![]
        }
    }

    struct EmptyMempool;
    #[async_trait]
    impl Mempool for EmptyMempool {
        async fn get_tx(&self, _tx_id: TxId) -> Option<Vec<u8>> {
            None
        }
        async fn get_coin(&self, _tx_id: TxId, _index: u32) -> Option<Coin> {
            None
        }
        async fn is_spent(&self, _tx_id: TxId, _index: u32) -> bool {
            false
        }
        async fn get_snapshot(&self) -> Vec<TxId> {
            vec![]
        }
        async fn fee_rate(&self, _tx_id: TxId) -> Option<u64> {
            None
        }
        async fn is_coinbase(&self, _tx_id: TxId) -> bool {
            false
        }
        async fn matches_filter(&self, _tx_id: TxId, _filter: &SpvFilter) -> bool {
            false
        }
    }

    struct FixedPool {
        nonce: Nonce,
    }
    #[async_trait]
    impl Pool for FixedPool {
        fn local_address(&self) -> SocketAddr {
            "127.0.0.1:8333".parse().unwrap()
        }
        fn local_services(&self) -> PeerServices {
            PeerServices::NETWORK
        }
        fn local_nonce(&self) -> Nonce {
            self.nonce
        }
        fn relay(&self) -> bool {
            true
        }
        fn selfish(&self) -> bool {
            false
        }
        fn spv_filter(&self) -> Option<SpvFilter> {
            None
        }
        fn pool_fee_rate(&self) -> Option<u64> {
            None
        }
        fn syncing(&self) -> bool {
            false
        }
        fn broadcast_inventory(&self) -> Vec<crate::wire::InventoryHash> {
            vec![]
        }
        async fn set_misbehavior(&self, _peer_addr: SocketAddr, _score: u32) {}
        async fn ignore(&self, _peer_addr: SocketAddr) {}
        async fn is_misbehaving(&self, _peer_addr: SocketAddr) -> bool {
            false
        }
        async fn is_ignored(&self, _peer_addr: SocketAddr) -> bool {
            false
        }
        async fn known_addresses(&self, _max: usize) -> Vec<MetaAddr> {
            vec![]
        }
    }

    fn build_session(queue: Arc<StdMutex<Vec<Message>>>) -> (Arc<Session>, Arc<NullTransport>) {
        let transport = Arc::new(NullTransport {
            destroyed: StdMutex::new(false),
            writes: StdMutex::new(Vec::new()),
        });
        let deps = SessionDeps {
            transport: transport.clone(),
            framer: Arc::new(PassthroughFramer),
            parser: Box::new(QueueParser { queue }),
            chain: Arc::new(EmptyChain),
            mempool: Arc::new(EmptyMempool),
            pool: Arc::new(FixedPool { nonce: Nonce(1234) }),
            enc_handshake: None,
            auth_handshake: None,
            outbound: true,
        };
        let (sink, _stream) = EventSink::channel();
        let session = Session::new(
            SessionId(1),
            PeerConfig::default(),
            "198.51.100.9:8333".parse().unwrap(),
            deps,
            sink,
        );
        (session, transport)
    }

    #[tokio::test]
    async fn handshake_reaches_ready_after_version_and_verack() {
        let queue = Arc::new(StdMutex::new(Vec::new()));
        let (session, _transport) = build_session(queue.clone());

        session.start().await;
        assert_eq!(session.state(), State::VersionExchange);

        queue.lock().unwrap().push(Message::Version(Version {
            version: ProtocolVersion(70015),
            services: PeerServices::NETWORK,
            timestamp: 0,
            address_recv: (PeerServices::NETWORK, "198.51.100.9:8333".parse().unwrap()),
            address_from: (PeerServices::NETWORK, "203.0.113.1:8333".parse().unwrap()),
            nonce: Nonce(9999),
            user_agent: "/test:0.0.0/".to_string(),
            best_block: Height(0),
            relay: true,
        }));
        session.receive(b"").await.unwrap();

        queue.lock().unwrap().push(Message::Verack);
        session.receive(b"").await.unwrap();

        assert_eq!(session.state(), State::Ready);
    }

    #[tokio::test]
    async fn self_connect_nonce_is_rejected_and_destroys_session() {
        let queue = Arc::new(StdMutex::new(Vec::new()));
        let (session, transport) = build_session(queue.clone());
        session.start().await;

        queue.lock().unwrap().push(Message::Version(Version {
            version: ProtocolVersion(70015),
            services: PeerServices::NETWORK,
            timestamp: 0,
            address_recv: (PeerServices::NETWORK, "198.51.100.9:8333".parse().unwrap()),
            address_from: (PeerServices::NETWORK, "203.0.113.1:8333".parse().unwrap()),
            nonce: Nonce(1234), // matches our own local nonce
            user_agent: "/test:0.0.0/".to_string(),
            best_block: Height(0),
            relay: true,
        }));
        session.receive(b"").await.unwrap();

        assert_eq!(session.state(), State::Closed);
        assert!(*transport.destroyed.lock().unwrap());
    }

    #[tokio::test]
    async fn destroy_is_idempotent() {
        let queue = Arc::new(StdMutex::new(Vec::new()));
        let (session, transport) = build_session(queue);
        session.destroy().await;
        session.destroy().await;
        assert!(*transport.destroyed.lock().unwrap());
    }

    /// Scenario 4 (spec.md §8): a pong whose nonce matches the outstanding
    /// ping clears the challenge and records the round-trip as `minPing`,
    /// treating the no-sample state as +infinity (spec.md §9 Open Question).
    #[tokio::test]
    async fn matching_pong_clears_challenge_and_updates_min_ping() {
        let queue = Arc::new(StdMutex::new(Vec::new()));
        let (session, _transport) = build_session(queue);
        assert_eq!(session.min_ping(), None);

        let nonce = Nonce(42);
        *session.last_ping.lock().await = Some((nonce, tokio::time::Instant::now()));
        session.observe_pong(nonce).await;

        assert!(session.last_ping.lock().await.is_none());
        let observed = session.min_ping().expect("a sample should now be recorded");
        assert!(observed < Duration::from_secs(1));
    }

    /// A pong with a non-matching nonce leaves the challenge outstanding and
    /// does not disturb `minPing` (spec.md §8: "any other pong keeps the
    /// challenge").
    #[tokio::test]
    async fn mismatched_pong_does_not_clear_challenge() {
        let queue = Arc::new(StdMutex::new(Vec::new()));
        let (session, _transport) = build_session(queue);

        let nonce = Nonce(7);
        *session.last_ping.lock().await = Some((nonce, tokio::time::Instant::now()));
        session.observe_pong(Nonce(999)).await;

        assert!(session.last_ping.lock().await.is_some());
        assert_eq!(session.min_ping(), None);
    }
}
