pub mod controller;
/// Necessary queues for the connection.
pub mod queue;
pub mod state;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::error::ConnectionError;
use crate::protocol::ack::{decode_ack, ACK, NACK};
use crate::protocol::frame::{Frame, FramePacket};
use crate::protocol::io::{ByteReader, ByteWriter, CodecError};
use crate::protocol::mcpe::GAME_PACKET;
use crate::protocol::packet::offline::{OfflinePacket, OpenConnectReply, SessionInfoReply};
use crate::protocol::packet::online::{
    system_address_template, ConnectedPing, ConnectedPong, ConnectionAccept, Disconnect,
    OnlinePacket,
};
use crate::protocol::reliability::Reliability;
use crate::server::event::ServerEvent;
use crate::server::Datagram;
use crate::util::{current_epoch, hex_dump, to_address_token, BufferPool};

use self::queue::{RecvQueue, SendQueue};
use self::state::ConnectionState;

/// Capacity of every inter-task queue in the core. Full queues apply
/// backpressure to their producers.
pub(crate) const CHANNEL_CAPACITY: usize = 256;

/// Flush cadence for pending ACK/NACK sets and recovery checks.
const TICK_MS: u64 = 100;
/// Cadence of the receive-window garbage collection.
const WINDOW_TICK_MS: u64 = 500;
/// Liveness timeout before the handshake completes.
const TIMEOUT_PENDING_MS: u64 = 1_500;
/// Liveness timeout once the session is established.
const TIMEOUT_CONNECTED_MS: u64 = 2_000;
/// How often an unanswered ping may fire before the session closes.
const MAX_PING_TRIES: u32 = 3;

/// State shared between the reader and sender tasks. Everything here is
/// either written once during the handshake or atomic.
#[derive(Debug)]
pub(crate) struct ConnMeta {
    address: SocketAddr,
    server_id: u64,
    status: AtomicU8,
    client_id: AtomicU64,
}

impl ConnMeta {
    fn new(address: SocketAddr, server_id: u64) -> Self {
        Self {
            address,
            server_id,
            status: AtomicU8::new(ConnectionState::Listen as u8),
            client_id: AtomicU64::new(0),
        }
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::from_byte(self.status.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnectionState) {
        self.status.store(state as u8, Ordering::Release);
    }
}

/// The close signal for one session.
///
/// Closing is idempotent: the first call wins, flips the watch channel
/// both tasks select on with priority, and reports the eviction to the
/// listener's supervisor.
#[derive(Debug)]
pub(crate) struct Closer {
    address: SocketAddr,
    fired: AtomicBool,
    signal: watch::Sender<bool>,
    evict: mpsc::Sender<(SocketAddr, String)>,
}

impl Closer {
    fn new(
        address: SocketAddr,
        evict: mpsc::Sender<(SocketAddr, String)>,
    ) -> (Arc<Self>, watch::Receiver<bool>) {
        let (signal, subscription) = watch::channel(false);
        (
            Arc::new(Self {
                address,
                fired: AtomicBool::new(false),
                signal,
                evict,
            }),
            subscription,
        )
    }

    pub(crate) async fn close(&self, reason: &str) {
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(
            "[{}] session closed: {}",
            to_address_token(self.address),
            reason
        );
        let _ = self.signal.send(true);
        let _ = self.evict.send((self.address, reason.to_string())).await;
    }
}

/// Notices the reader posts to the sender. This is the only channel
/// between the two session tasks; the sender owns every send-side field.
#[derive(Debug)]
enum SendNotice {
    /// An encoded online packet to wrap into an unreliable frame and
    /// transmit (handshake replies, pongs).
    Packet(Vec<u8>),
    /// Sequences to acknowledge on the next tick.
    QueueAck(Vec<u32>),
    /// Sequences to report missing on the next tick.
    QueueNack(Vec<u32>),
    /// The peer acknowledged these sequences.
    AckSeen(Vec<u32>),
    /// The peer reported these sequences missing.
    NackSeen(Vec<u32>),
    /// A liveness-relevant datagram arrived; push the timeout out.
    Activity,
    /// A pong for our keepalive ping arrived.
    PongSeen,
}

/// One per-peer session, owned by the listener.
///
/// The session itself runs as two cooperative tasks: a *reader* that
/// consumes inbound datagrams (windows, reorder, splits, handshake) and a
/// *sender* that consumes outbound payloads and timers (encapsulation,
/// ACK/NACK flush, retransmission, keepalive). The handle only carries
/// the channels into those tasks.
pub struct Connection {
    pub address: SocketAddr,
    inbound: mpsc::Sender<Vec<u8>>,
    outbound: mpsc::Sender<(Vec<u8>, Reliability, u8)>,
    closer: Arc<Closer>,
    #[allow(dead_code)]
    tasks: Vec<JoinHandle<()>>,
}

impl Connection {
    pub(crate) fn new(
        address: SocketAddr,
        server_id: u64,
        router_tx: mpsc::Sender<Datagram>,
        event_tx: mpsc::Sender<ServerEvent>,
        evict_tx: mpsc::Sender<(SocketAddr, String)>,
        pool: Arc<BufferPool>,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (notice_tx, notice_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (closer, closed) = Closer::new(address, evict_tx);

        let meta = Arc::new(ConnMeta::new(address, server_id));
        let mtu = Arc::new(AtomicU16::new(0));

        let reader = Reader {
            meta: meta.clone(),
            mtu: mtu.clone(),
            closer: closer.clone(),
            pool,
            recv: RecvQueue::new(),
            notice_tx,
            router_tx: router_tx.clone(),
            event_tx,
        };
        let sender = Sender {
            meta,
            closer: closer.clone(),
            queue: SendQueue::new(mtu),
            router_tx,
        };

        let reader_task = tokio::spawn(reader.run(inbound_rx, closed.clone()));
        let sender_task = tokio::spawn(sender.run(notice_rx, outbound_rx, closed));

        let tasks = vec![
            guard_task(reader_task, closer.clone()),
            guard_task(sender_task, closer.clone()),
        ];

        Self {
            address,
            inbound: inbound_tx,
            outbound: outbound_tx,
            closer,
            tasks,
        }
    }

    /// Hands an inbound datagram to the reader task. Applies backpressure
    /// when the session is flooded.
    pub(crate) async fn forward(&self, datagram: Vec<u8>) {
        if self.inbound.send(datagram).await.is_err() {
            trace!(
                "[{}] dropped datagram for closing session",
                to_address_token(self.address)
            );
        }
    }

    /// Queues an application payload for encapsulation and transmission.
    pub(crate) async fn send(
        &self,
        payload: Vec<u8>,
        reliability: Reliability,
        channel: u8,
    ) -> Result<(), ConnectionError> {
        self.outbound
            .send((payload, reliability, channel))
            .await
            .map_err(|_| ConnectionError::Closed)
    }

    pub(crate) async fn close(&self, reason: &str) {
        self.closer.close(reason).await;
    }
}

/// Wraps a session task so a panic is caught, logged and turned into a
/// session close instead of a silent leak.
fn guard_task(task: JoinHandle<()>, closer: Arc<Closer>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(err) = task.await {
            if err.is_panic() {
                error!(
                    "[{}] session task panicked: {err}",
                    to_address_token(closer.address)
                );
            }
            closer.close("internal error").await;
        }
    })
}

/// The reader task: sole owner of the receive-side session state.
struct Reader {
    meta: Arc<ConnMeta>,
    mtu: Arc<AtomicU16>,
    closer: Arc<Closer>,
    pool: Arc<BufferPool>,
    recv: RecvQueue,
    notice_tx: mpsc::Sender<SendNotice>,
    router_tx: mpsc::Sender<Datagram>,
    event_tx: mpsc::Sender<ServerEvent>,
}

impl Reader {
    async fn run(mut self, mut inbound: mpsc::Receiver<Vec<u8>>, mut closed: watch::Receiver<bool>) {
        let mut window_tick = interval(Duration::from_millis(WINDOW_TICK_MS));
        loop {
            tokio::select! {
                biased;
                _ = closed.changed() => break,
                _ = window_tick.tick() => self.recv.prune_window(),
                next = inbound.recv() => match next {
                    Some(datagram) => {
                        self.handle_datagram(&datagram).await;
                        self.pool.release(datagram);
                    }
                    None => {
                        // the listener dropped this session's handle
                        self.closer.close("listener shutdown").await;
                        break;
                    }
                },
            }
        }
        // drain whatever queued up while closing, without processing
        while inbound.try_recv().is_ok() {}
    }

    async fn handle_datagram(&mut self, datagram: &[u8]) {
        let Some(&head) = datagram.first() else {
            return;
        };
        if head != ACK && head != NACK {
            let _ = self.notice_tx.send(SendNotice::Activity).await;
        }

        let mut buf = ByteReader::new(&datagram[1..]);
        let result = match head {
            // the low nibble flags datapacket variants this core ignores
            0x80..=0x8f => self.handle_datapacket(&mut buf).await,
            ACK => self.handle_ack(&mut buf).await,
            NACK => self.handle_nack(&mut buf).await,
            _ => self.handle_offline(head, &mut buf).await,
        };

        if let Err(err) = result {
            warn!(
                "[{}] discarding datagram ({err}): {}",
                to_address_token(self.meta.address),
                hex_dump(datagram)
            );
        }
    }

    async fn handle_datapacket(&mut self, buf: &mut ByteReader<'_>) -> Result<(), CodecError> {
        let pk = FramePacket::read(buf)?;
        let connected = self.meta.state().is_connected();

        if !self.recv.insert(pk, connected) {
            trace!(
                "[{}] datapacket outside the receive window",
                to_address_token(self.meta.address)
            );
            return Ok(());
        }

        let acks = self.recv.ack_flush();
        if !acks.is_empty() {
            let _ = self.notice_tx.send(SendNotice::QueueAck(acks)).await;
        }
        let nacks = self.recv.nack_flush();
        if !nacks.is_empty() {
            let _ = self.notice_tx.send(SendNotice::QueueNack(nacks)).await;
        }

        for frame in self.recv.flush_ready() {
            self.dispatch_frame(frame).await?;
        }
        Ok(())
    }

    async fn handle_ack(&mut self, buf: &mut ByteReader<'_>) -> Result<(), CodecError> {
        let seqs = decode_ack(buf)?;
        let _ = self.notice_tx.send(SendNotice::AckSeen(seqs)).await;
        Ok(())
    }

    async fn handle_nack(&mut self, buf: &mut ByteReader<'_>) -> Result<(), CodecError> {
        let seqs = decode_ack(buf)?;
        let _ = self.notice_tx.send(SendNotice::NackSeen(seqs)).await;
        Ok(())
    }

    /// Dispatches one in-order, reassembled frame by its payload id.
    async fn dispatch_frame(&mut self, frame: Frame) -> Result<(), CodecError> {
        let Some(&id) = frame.body.first() else {
            return Ok(());
        };

        if id == GAME_PACKET {
            if self.meta.state().is_connected() {
                // the leading byte stays on: the application re-parses it
                let _ = self
                    .event_tx
                    .send(ServerEvent::Packet(self.meta.address, frame.body))
                    .await;
            }
            return Ok(());
        }

        let mut buf = ByteReader::new(&frame.body[1..]);
        let Some(packet) = OnlinePacket::read(id, &mut buf)? else {
            trace!(
                "[{}] unhandled frame payload {id:#04x}",
                to_address_token(self.meta.address)
            );
            return Ok(());
        };

        match packet {
            OnlinePacket::ConnectedPing(ping) => {
                let pong = OnlinePacket::ConnectedPong(ConnectedPong {
                    ping_id: ping.ping_id,
                });
                self.reply_framed(&pong).await?;
            }
            OnlinePacket::ConnectedPong(_) => {
                let _ = self.notice_tx.send(SendNotice::PongSeen).await;
            }
            OnlinePacket::ConnectionRequest(request) => {
                if self.meta.state() != ConnectionState::Connecting {
                    return Ok(());
                }
                let accept = OnlinePacket::ConnectionAccept(ConnectionAccept {
                    client_address: self.meta.address,
                    system_addresses: system_address_template(),
                    send_ping: request.send_ping,
                    send_pong: request.send_ping + 1000,
                });
                self.reply_framed(&accept).await?;
            }
            OnlinePacket::ConnectionAccept(_) => {
                // client-bound, a server never consumes this
            }
            OnlinePacket::NewConnection(_) => {
                if self.meta.state() != ConnectionState::Connecting {
                    return Ok(());
                }
                self.meta.set_state(ConnectionState::Connected);
                info!(
                    "[{}] raknet connection established",
                    to_address_token(self.meta.address)
                );
                let _ = self
                    .event_tx
                    .send(ServerEvent::Connected(self.meta.address))
                    .await;
            }
            OnlinePacket::Disconnect(_) => {
                self.closer.close("client disconnect").await;
            }
        }
        Ok(())
    }

    /// Handles the offline half of the handshake. Out-of-state requests
    /// are dropped without a reply.
    async fn handle_offline(&mut self, id: u8, buf: &mut ByteReader<'_>) -> Result<(), CodecError> {
        let Some(packet) = OfflinePacket::read(id, buf)? else {
            trace!(
                "[{}] unknown datagram id {id:#04x}",
                to_address_token(self.meta.address)
            );
            return Ok(());
        };

        match packet {
            OfflinePacket::OpenConnectRequest(request) => {
                if self.meta.state() > ConnectionState::Initializing {
                    return Ok(());
                }
                debug!(
                    "[{}] open connection request: protocol {}, mtu {}",
                    to_address_token(self.meta.address),
                    request.protocol,
                    request.mtu_size
                );
                let reply = OfflinePacket::OpenConnectReply(OpenConnectReply {
                    server_id: self.meta.server_id,
                    mtu_size: request.mtu_size,
                });
                self.reply_raw(&reply).await?;
                self.meta.set_state(ConnectionState::Initializing);
            }
            OfflinePacket::SessionInfoRequest(request) => {
                if self.meta.state() != ConnectionState::Initializing {
                    return Ok(());
                }
                self.meta
                    .client_id
                    .store(request.client_id, Ordering::Release);
                self.mtu.store(request.mtu_size, Ordering::Release);
                let reply = OfflinePacket::SessionInfoReply(SessionInfoReply {
                    server_id: self.meta.server_id,
                    client_address: self.meta.address,
                    mtu_size: request.mtu_size,
                });
                self.reply_raw(&reply).await?;
                self.meta.set_state(ConnectionState::Connecting);
            }
            _ => {
                // pings are answered by the listener, replies are
                // client-bound
            }
        }
        Ok(())
    }

    /// Sends an offline packet as a plain datagram.
    async fn reply_raw(&mut self, packet: &OfflinePacket) -> Result<(), CodecError> {
        let mut buf = ByteWriter::new();
        packet.write(&mut buf)?;
        let _ = self
            .router_tx
            .send(Datagram::new(buf.into_vec(), self.meta.address))
            .await;
        Ok(())
    }

    /// Hands an online packet to the sender for encapsulation.
    async fn reply_framed(&mut self, packet: &OnlinePacket) -> Result<(), CodecError> {
        let mut buf = ByteWriter::new();
        packet.write(&mut buf)?;
        let _ = self
            .notice_tx
            .send(SendNotice::Packet(buf.into_vec()))
            .await;
        Ok(())
    }
}

/// The sender task: sole owner of the send-side session state and the
/// liveness timer.
struct Sender {
    meta: Arc<ConnMeta>,
    closer: Arc<Closer>,
    queue: SendQueue,
    router_tx: mpsc::Sender<Datagram>,
}

impl Sender {
    async fn run(
        mut self,
        mut notices: mpsc::Receiver<SendNotice>,
        mut outbound: mpsc::Receiver<(Vec<u8>, Reliability, u8)>,
        mut closed: watch::Receiver<bool>,
    ) {
        let mut tick = interval(Duration::from_millis(TICK_MS));
        let mut deadline = Instant::now() + Duration::from_millis(TIMEOUT_PENDING_MS);
        let mut ping_tries: u32 = 0;

        loop {
            tokio::select! {
                biased;
                _ = closed.changed() => break,
                Some(notice) = notices.recv() => {
                    self.handle_notice(notice, &mut deadline, &mut ping_tries).await;
                }
                Some((payload, reliability, channel)) = outbound.recv() => {
                    for datagram in self.queue.send_payload(payload, reliability, channel) {
                        self.transmit(datagram).await;
                    }
                }
                _ = tick.tick() => self.tick().await,
                _ = sleep_until(deadline) => {
                    self.liveness_fired(&mut deadline, &mut ping_tries).await;
                }
            }
        }

        // best-effort goodbye so a live peer stops retrying this session
        let mut buf = ByteWriter::new();
        if Disconnect.write(&mut buf).is_ok() {
            let datagram = self
                .queue
                .send_frame(Frame::new(Reliability::Unreliable, buf.into_vec()));
            self.transmit(datagram).await;
        }

        // drain pending queues without processing them
        while notices.try_recv().is_ok() {}
        while outbound.try_recv().is_ok() {}
    }

    async fn handle_notice(
        &mut self,
        notice: SendNotice,
        deadline: &mut Instant,
        ping_tries: &mut u32,
    ) {
        match notice {
            SendNotice::Packet(payload) => {
                let datagram = self
                    .queue
                    .send_frame(Frame::new(Reliability::Unreliable, payload));
                self.transmit(datagram).await;
            }
            SendNotice::QueueAck(seqs) => self.queue.queue_ack(&seqs),
            SendNotice::QueueNack(seqs) => self.queue.queue_nack(&seqs),
            SendNotice::AckSeen(seqs) => self.queue.ack_received(&seqs),
            SendNotice::NackSeen(seqs) => {
                for datagram in self.queue.nack_received(&seqs) {
                    self.transmit(datagram).await;
                }
            }
            SendNotice::Activity => {
                let timeout = if self.meta.state().is_connected() {
                    TIMEOUT_CONNECTED_MS
                } else {
                    TIMEOUT_PENDING_MS
                };
                *deadline = Instant::now() + Duration::from_millis(timeout);
            }
            SendNotice::PongSeen => {
                if *ping_tries > 0 {
                    *ping_tries = 0;
                    *deadline = Instant::now() + Duration::from_millis(TIMEOUT_CONNECTED_MS);
                }
            }
        }
    }

    /// The 100 ms flush tick: pending ACKs, pending NACKs, then stale
    /// recovery entries.
    async fn tick(&mut self) {
        if let Some(datagram) = self.queue.flush_acks() {
            self.transmit(datagram).await;
        }
        if let Some(datagram) = self.queue.flush_nacks() {
            self.transmit(datagram).await;
        }
        for datagram in self.queue.flush_stale(current_epoch()) {
            debug!(
                "[{}] retransmitting unacknowledged datapacket",
                to_address_token(self.meta.address)
            );
            self.transmit(datagram).await;
        }
    }

    async fn liveness_fired(&mut self, deadline: &mut Instant, ping_tries: &mut u32) {
        if !self.meta.state().is_connected() || *ping_tries >= MAX_PING_TRIES {
            self.closer.close("timeout").await;
            return;
        }

        let mut buf = ByteWriter::new();
        let ping = ConnectedPing {
            ping_id: rand::random::<u64>(),
        };
        if ping.write(&mut buf).is_ok() {
            let datagram = self
                .queue
                .send_frame(Frame::new(Reliability::Unreliable, buf.into_vec()));
            self.transmit(datagram).await;
        }
        *ping_tries += 1;
        *deadline = Instant::now() + Duration::from_millis(TIMEOUT_CONNECTED_MS);
    }

    async fn transmit(&mut self, datagram: Vec<u8>) {
        let _ = self
            .router_tx
            .send(Datagram::new(datagram, self.meta.address))
            .await;
    }
}
