use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};

use crate::codec::{self, Message, Packet};
use crate::error::TransportError;

const RECV_TIMEOUT: Duration = Duration::from_millis(50);
const MAX_DATAGRAM: usize = 65_535;

/// Where to send and where to listen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub host: String,
    pub send_port: u16,
    /// Local UDP port for replies. 0 picks an ephemeral port.
    pub receive_port: u16,
    pub reuse_address: bool,
    pub broadcast: bool,
    /// Open the transport as soon as the owning session is built.
    pub auto_start: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            send_port: 57110,
            receive_port: 57130,
            reuse_address: true,
            broadcast: true,
            auto_start: true,
        }
    }
}

impl TransportConfig {
    pub fn new(host: impl Into<String>, send_port: u16, receive_port: u16) -> Self {
        Self {
            host: host.into(),
            send_port,
            receive_port,
            ..Self::default()
        }
    }
}

/// Bidirectional UDP endpoint to one server.
///
/// One socket bound to `receive_port` both listens and sends, so replies come
/// back to the port the server sees as our source. A background thread named
/// `osc-receive` decodes inbound datagrams into a queue drained with
/// [`Transport::try_receive`] or [`Transport::drain`].
pub struct Transport {
    config: TransportConfig,
    live: Option<Listener>,
}

struct Listener {
    socket: UdpSocket,
    remote: SocketAddr,
    inbound: Receiver<Message>,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Transport {
    /// A closed transport. Call [`Transport::open`] to bind and start receiving.
    pub fn new(config: TransportConfig) -> Self {
        Self { config, live: None }
    }

    /// Builds and opens in one step.
    pub fn connect(config: TransportConfig) -> Result<Self, TransportError> {
        let mut transport = Self::new(config);
        transport.open()?;
        Ok(transport)
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.live.is_some()
    }

    /// Address of the bound listen socket.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.live.as_ref().and_then(|l| l.socket.local_addr().ok())
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.live.as_ref().map(|l| l.remote)
    }

    /// Resolves the host, binds the listener and starts the receive thread.
    /// Either everything comes up or the transport stays closed.
    pub fn open(&mut self) -> Result<(), TransportError> {
        self.close();
        let remote = resolve(&self.config.host, self.config.send_port)?;
        let socket = bind_listener(&self.config)?;
        let port = self.config.receive_port;
        let recv_socket = socket
            .try_clone()
            .map_err(|source| TransportError::Bind { port, source })?;
        recv_socket
            .set_read_timeout(Some(RECV_TIMEOUT))
            .map_err(|source| TransportError::Bind { port, source })?;

        let (tx, rx) = crossbeam_channel::unbounded();
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);
        let thread = thread::Builder::new()
            .name("osc-receive".into())
            .spawn(move || receive_loop(recv_socket, tx, flag))
            .map_err(TransportError::Spawn)?;

        info!(
            target: "osc::transport",
            "listening on {}, sending to {remote}",
            socket.local_addr().map(|a| a.to_string()).unwrap_or_default()
        );
        self.live = Some(Listener {
            socket,
            remote,
            inbound: rx,
            shutdown,
            thread: Some(thread),
        });
        Ok(())
    }

    /// Stops the receive thread and waits for it. Queued messages are dropped.
    pub fn close(&mut self) {
        let Some(mut listener) = self.live.take() else {
            return;
        };
        listener.shutdown.store(true, Ordering::Release);
        if let Some(handle) = listener.thread.take() {
            if handle.join().is_err() {
                warn!(target: "osc::transport", "receive thread panicked");
            }
        }
        debug!(target: "osc::transport", "closed listener for {}", listener.remote);
    }

    /// Sends raw bytes as one datagram.
    pub fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let live = self.live.as_ref().ok_or(TransportError::NotOpen)?;
        live.socket.send_to(bytes, live.remote)?;
        Ok(())
    }

    pub fn send_packet(&self, packet: &Packet) -> Result<(), TransportError> {
        let bytes = codec::encode(packet)?;
        self.send(&bytes)
    }

    pub fn send_message(&self, msg: &Message) -> Result<(), TransportError> {
        let bytes = codec::encode_message(msg)?;
        self.send(&bytes)
    }

    /// Next received message, if any. Never blocks.
    pub fn try_receive(&self) -> Option<Message> {
        self.live.as_ref()?.inbound.try_recv().ok()
    }

    /// Every message received so far, in arrival order.
    pub fn drain(&self) -> Vec<Message> {
        match &self.live {
            Some(live) => live.inbound.try_iter().collect(),
            None => Vec::new(),
        }
    }
}

/// Clones copy the configuration only; the clone starts closed.
impl Clone for Transport {
    fn clone(&self) -> Self {
        Self::new(self.config.clone())
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, TransportError> {
    if host.trim().is_empty() {
        return Err(TransportError::EmptyHost);
    }
    let invalid = |reason: String| TransportError::InvalidHost {
        host: host.to_string(),
        reason,
    };
    (host, port)
        .to_socket_addrs()
        .map_err(|e| invalid(e.to_string()))?
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| invalid("no IPv4 address".to_string()))
}

fn bind_listener(config: &TransportConfig) -> Result<UdpSocket, TransportError> {
    let port = config.receive_port;
    let bind_err = |source| TransportError::Bind { port, source };
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(bind_err)?;
    if config.reuse_address {
        socket.set_reuse_address(true).map_err(bind_err)?;
    }
    if config.broadcast {
        socket.set_broadcast(true).map_err(bind_err)?;
    }
    let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
    socket.bind(&addr.into()).map_err(bind_err)?;
    Ok(socket.into())
}

fn receive_loop(socket: UdpSocket, queue: Sender<Message>, shutdown: Arc<AtomicBool>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    while !shutdown.load(Ordering::Acquire) {
        match socket.recv_from(&mut buf) {
            Ok((n, sender)) => match codec::decode(&buf[..n]) {
                Ok(packet) => {
                    for mut msg in packet.into_messages() {
                        msg.sender = Some(sender);
                        if queue.send(msg).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => {
                    warn!(target: "osc::transport", "dropping datagram from {sender}: {e}");
                }
            },
            Err(ref e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                continue
            }
            // ICMP port-unreachable from an earlier send surfaces here on some platforms
            Err(ref e)
                if matches!(e.kind(), ErrorKind::ConnectionReset | ErrorKind::ConnectionRefused) =>
            {
                continue
            }
            Err(e) => {
                warn!(target: "osc::transport", "receive loop stopping: {e}");
                break;
            }
        }
    }
    debug!(target: "osc::transport", "receive loop exited");
}
