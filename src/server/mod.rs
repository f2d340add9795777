pub mod event;

pub use event::ServerEvent;

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::connection::{Connection, CHANNEL_CAPACITY};
use crate::error::ServerError;
use crate::protocol::io::{ByteReader, ByteWriter};
use crate::protocol::mcpe::motd::Motd;
use crate::protocol::packet::offline::{UnconnectedPing, UnconnectedPong};
use crate::protocol::reliability::Reliability;
use crate::util::{hex_dump, to_address_token, BufferPool};

/// How long a just-closed address stays refused.
const BLOCK_COOLDOWN: Duration = Duration::from_millis(1_750);

/// The canned reply for datagrams from a blocklisted address: a
/// datapacket with sequence 0 carrying a lone disconnect frame.
const BLOCKED_DISCONNECT: [u8; 8] = [0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x08, 0x15];

/// Largest datagram the receive loop accepts.
const RECV_BUFFER_SIZE: usize = 4096;

/// Listener configuration. The defaults describe a stock MCPE server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// UDP port to listen on. 0 picks an ephemeral port.
    pub listen_port: u16,
    /// Server name shown in the server list.
    pub server_name: String,
    /// Advertised player cap.
    pub max_players: u32,
    /// MCPE network protocol version.
    pub mcpe_protocol: u32,
    /// Human readable game version.
    pub mcpe_version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_port: 19132,
            server_name: "HighMC".into(),
            max_players: 20,
            mcpe_protocol: 60,
            mcpe_version: "0.14.2".into(),
        }
    }
}

/// One UDP datagram on its way through the core.
#[derive(Debug)]
pub(crate) struct Datagram {
    pub buf: Vec<u8>,
    pub addr: SocketAddr,
}

impl Datagram {
    pub(crate) fn new(buf: Vec<u8>, addr: SocketAddr) -> Self {
        Self { buf, addr }
    }
}

/// Commands the application hands to the supervisor, which owns the
/// session map.
enum ListenerCommand {
    Send {
        to: SocketAddr,
        payload: Vec<u8>,
        reliability: Reliability,
        channel: u8,
    },
    Close {
        to: SocketAddr,
        reason: String,
    },
}

/// Channel ends stashed between `bind` and `start`.
struct Wiring {
    send_tx: mpsc::Sender<Datagram>,
    send_rx: mpsc::Receiver<Datagram>,
    dispatch_tx: mpsc::Sender<Datagram>,
    dispatch_rx: mpsc::Receiver<Datagram>,
    evict_tx: mpsc::Sender<(SocketAddr, String)>,
    evict_rx: mpsc::Receiver<(SocketAddr, String)>,
    event_tx: mpsc::Sender<ServerEvent>,
    cmd_rx: mpsc::Receiver<ListenerCommand>,
}

/// The RakNet listener: owns the UDP socket, routes datagrams to
/// per-peer sessions and surfaces [`ServerEvent`]s to the application.
///
/// ```no_run
/// use highrak::server::{Listener, ServerConfig, ServerEvent};
///
/// #[tokio::main]
/// async fn main() {
///     let mut listener = Listener::bind(ServerConfig::default()).await.unwrap();
///     listener.start().await.unwrap();
///
///     while let Some(event) = listener.recv().await {
///         match event {
///             ServerEvent::Connected(addr) => println!("{addr} connected"),
///             ServerEvent::Packet(addr, payload) => {
///                 // echo game packets back
///                 let _ = listener.send(addr, payload).await;
///             }
///             ServerEvent::Disconnected(addr, reason) => {
///                 println!("{addr} left: {reason}");
///             }
///         }
///     }
/// }
/// ```
pub struct Listener {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    server_id: u64,
    motd: Arc<RwLock<Motd>>,
    pool: Arc<BufferPool>,
    event_rx: mpsc::Receiver<ServerEvent>,
    cmd_tx: mpsc::Sender<ListenerCommand>,
    /// Dropping the listener drops this sender; every router task
    /// observes the closure and unwinds.
    shutdown: watch::Sender<bool>,
    wiring: Option<Wiring>,
    started: bool,
}

impl Listener {
    /// Binds the UDP socket and prepares the listener. Nothing is
    /// processed until [`start`](Self::start) is called.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let bind_addr = SocketAddr::V4(SocketAddrV4::new(
            Ipv4Addr::UNSPECIFIED,
            config.listen_port,
        ));
        let socket = UdpSocket::bind(bind_addr).await.map_err(ServerError::Bind)?;
        let local_addr = socket.local_addr().map_err(ServerError::Bind)?;

        let motd = Motd::new(
            config.server_name,
            config.mcpe_protocol,
            config.mcpe_version,
            config.max_players,
        );

        let (send_tx, send_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (dispatch_tx, dispatch_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (evict_tx, evict_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            socket: Arc::new(socket),
            local_addr,
            server_id: rand::random::<u64>(),
            motd: Arc::new(RwLock::new(motd)),
            pool: Arc::new(BufferPool::new()),
            event_rx,
            cmd_tx,
            shutdown,
            wiring: Some(Wiring {
                send_tx,
                send_rx,
                dispatch_tx,
                dispatch_rx,
                evict_tx,
                evict_rx,
                event_tx,
                cmd_rx,
            }),
            started: false,
        })
    }

    /// Spawns the receive, supervisor and send tasks.
    pub async fn start(&mut self) -> Result<(), ServerError> {
        let wiring = self.wiring.take().ok_or(ServerError::AlreadyStarted)?;
        info!(
            "listening on {} (server id {:x})",
            to_address_token(self.local_addr),
            self.server_id
        );

        tokio::spawn(receive_loop(
            self.socket.clone(),
            self.pool.clone(),
            self.motd.clone(),
            self.server_id,
            wiring.send_tx.clone(),
            wiring.dispatch_tx,
            self.shutdown.subscribe(),
        ));
        tokio::spawn(supervisor_loop(
            wiring.dispatch_rx,
            wiring.evict_rx,
            wiring.cmd_rx,
            wiring.send_tx,
            wiring.evict_tx,
            wiring.event_tx,
            self.pool.clone(),
            self.server_id,
            self.shutdown.subscribe(),
        ));
        tokio::spawn(send_loop(
            self.socket.clone(),
            wiring.send_rx,
            self.pool.clone(),
            self.shutdown.subscribe(),
        ));

        self.started = true;
        Ok(())
    }

    /// Receives the next event from any session. Returns `None` once the
    /// listener has shut down.
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        self.event_rx.recv().await
    }

    /// Sends an application payload to an established session with the
    /// default guarantees (reliable, unordered, channel 0).
    pub async fn send(&self, to: SocketAddr, payload: Vec<u8>) -> Result<(), ServerError> {
        self.send_with(to, payload, Reliability::default(), 0).await
    }

    /// Sends an application payload with explicit reliability and order
    /// channel. Unknown addresses are dropped by the supervisor.
    pub async fn send_with(
        &self,
        to: SocketAddr,
        payload: Vec<u8>,
        reliability: Reliability,
        channel: u8,
    ) -> Result<(), ServerError> {
        if !self.started {
            return Err(ServerError::NotListening);
        }
        self.cmd_tx
            .send(ListenerCommand::Send {
                to,
                payload,
                reliability,
                channel,
            })
            .await
            .map_err(|_| ServerError::NotListening)
    }

    /// Closes a session. The peer address lands on the blocklist the same
    /// way a timeout or client disconnect would put it there.
    pub async fn close(&self, to: SocketAddr, reason: &str) -> Result<(), ServerError> {
        if !self.started {
            return Err(ServerError::NotListening);
        }
        self.cmd_tx
            .send(ListenerCommand::Close {
                to,
                reason: reason.to_string(),
            })
            .await
            .map_err(|_| ServerError::NotListening)
    }

    /// The bound socket address; useful when binding port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The random GUID this listener identifies itself with.
    pub fn server_id(&self) -> u64 {
        self.server_id
    }

    /// A snapshot of the advertised status.
    pub fn motd(&self) -> Motd {
        self.motd.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Replaces the advertised status, e.g. to update player counts.
    pub fn set_motd(&self, motd: Motd) {
        *self.motd.write().unwrap_or_else(|e| e.into_inner()) = motd;
    }
}

/// Reads datagrams off the socket. Unconnected pings are answered right
/// here without touching any session state; everything else goes to the
/// supervisor for routing.
async fn receive_loop(
    socket: Arc<UdpSocket>,
    pool: Arc<BufferPool>,
    motd: Arc<RwLock<Motd>>,
    server_id: u64,
    send_tx: mpsc::Sender<Datagram>,
    dispatch_tx: mpsc::Sender<Datagram>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut scratch = vec![0u8; RECV_BUFFER_SIZE];
    loop {
        let received = tokio::select! {
            biased;
            _ = shutdown.changed() => return,
            received = socket.recv_from(&mut scratch) => received,
        };
        let (len, addr) = match received {
            Ok(received) => received,
            Err(err) => {
                error!("udp read failed: {err}");
                continue;
            }
        };
        if len == 0 {
            continue;
        }

        let datagram = pool.acquire(&scratch[..len]);
        if datagram[0] == UnconnectedPing::ID {
            match UnconnectedPing::read(&mut ByteReader::new(&datagram[1..])) {
                Ok(ping) => {
                    let status = motd.read().unwrap_or_else(|e| e.into_inner()).write();
                    let pong = UnconnectedPong {
                        ping_id: ping.ping_id,
                        server_id,
                        motd: status,
                    };
                    let mut buf = ByteWriter::new();
                    if pong.write(&mut buf).is_ok()
                        && send_tx
                            .send(Datagram::new(buf.into_vec(), addr))
                            .await
                            .is_err()
                    {
                        return;
                    }
                }
                Err(err) => {
                    warn!(
                        "[{}] discarding unconnected ping ({err}): {}",
                        to_address_token(addr),
                        hex_dump(&datagram)
                    );
                }
            }
            pool.release(datagram);
            continue;
        }

        if dispatch_tx.send(Datagram::new(datagram, addr)).await.is_err() {
            // supervisor is gone, the listener is shutting down
            return;
        }
    }
}

/// Owns the session map and the blocklist. The sole task that touches
/// either.
#[allow(clippy::too_many_arguments)]
async fn supervisor_loop(
    mut dispatch_rx: mpsc::Receiver<Datagram>,
    mut evict_rx: mpsc::Receiver<(SocketAddr, String)>,
    mut cmd_rx: mpsc::Receiver<ListenerCommand>,
    send_tx: mpsc::Sender<Datagram>,
    evict_tx: mpsc::Sender<(SocketAddr, String)>,
    event_tx: mpsc::Sender<ServerEvent>,
    pool: Arc<BufferPool>,
    server_id: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut sessions: HashMap<SocketAddr, Connection> = HashMap::new();
    let mut blocklist: HashMap<SocketAddr, Instant> = HashMap::new();

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            Some((addr, reason)) = evict_rx.recv() => {
                if sessions.remove(&addr).is_some() {
                    blocklist.insert(addr, Instant::now() + BLOCK_COOLDOWN);
                    let _ = event_tx
                        .send(ServerEvent::Disconnected(addr, reason))
                        .await;
                }
            }
            Some(datagram) = dispatch_rx.recv() => {
                if let Some(until) = blocklist.get(&datagram.addr) {
                    if *until > Instant::now() {
                        let _ = send_tx
                            .send(Datagram::new(BLOCKED_DISCONNECT.to_vec(), datagram.addr))
                            .await;
                        pool.release(datagram.buf);
                        continue;
                    }
                    blocklist.remove(&datagram.addr);
                }

                let session = sessions.entry(datagram.addr).or_insert_with(|| {
                    info!("[{}] new session", to_address_token(datagram.addr));
                    Connection::new(
                        datagram.addr,
                        server_id,
                        send_tx.clone(),
                        event_tx.clone(),
                        evict_tx.clone(),
                        pool.clone(),
                    )
                });
                session.forward(datagram.buf).await;
            }
            Some(command) = cmd_rx.recv() => match command {
                ListenerCommand::Send { to, payload, reliability, channel } => {
                    match sessions.get(&to) {
                        Some(session) => {
                            if session.send(payload, reliability, channel).await.is_err() {
                                debug!("[{}] send to closing session dropped", to_address_token(to));
                            }
                        }
                        None => debug!("[{}] send to unknown session dropped", to_address_token(to)),
                    }
                }
                ListenerCommand::Close { to, reason } => {
                    if let Some(session) = sessions.get(&to) {
                        session.close(&reason).await;
                    }
                }
            },
            else => break,
        }
    }
}

/// Drains outbound datagrams from every session onto the socket. Socket
/// errors are logged, never fatal.
async fn send_loop(
    socket: Arc<UdpSocket>,
    mut send_rx: mpsc::Receiver<Datagram>,
    pool: Arc<BufferPool>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let datagram = tokio::select! {
            biased;
            _ = shutdown.changed() => return,
            next = send_rx.recv() => match next {
                Some(datagram) => datagram,
                None => return,
            },
        };
        if let Err(err) = socket.send_to(&datagram.buf, datagram.addr).await {
            error!(
                "[{}] udp write failed: {err}",
                to_address_token(datagram.addr)
            );
        }
        // the write completed (or failed) before the buffer is recycled
        pool.release(datagram.buf);
    }
}
