//! The UDP reader.
//!
//! Binds a socket with `SO_REUSEADDR` (several receivers may share a
//! multicast group on one host), requests the configured `SO_RCVBUF`, and
//! joins the multicast group when the bind address is one. Each datagram
//! becomes exactly one packet; anything larger than the configured maximum
//! is dropped rather than truncated.
//!
//! For deployments past what the kernel path can sustain there is the
//! kernel-bypass contract: a raw-packet queue pair with a
//! destination-only flow rule (ethernet + IPv4 + UDP, all-ones masks) and
//! receive work-requests fed from the memory pool. Such a reader attaches
//! through the same closer/worker pair as this one; no binding to it is
//! linked here.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use log::{info, trace, warn};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::select;

use crate::rx::stream::StreamShared;

/// Options for one UDP reader.
#[derive(Debug, Clone)]
pub struct UdpReaderConfig {
    bind: SocketAddr,
    interface: Option<Ipv4Addr>,
    buffer_size: usize,
    max_size: usize,
}

impl UdpReaderConfig {
    /// Maximum accepted datagram size, if none is configured: enough for
    /// jumbo frames.
    pub const DEFAULT_MAX_SIZE: usize = 9200;
    /// Requested socket receive buffer, if none is configured.
    pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024 * 1024;

    /// Receive on `bind`; join it as a multicast group if it is one.
    pub fn new(bind: SocketAddr) -> Self {
        Self {
            bind,
            interface: None,
            buffer_size: Self::DEFAULT_BUFFER_SIZE,
            max_size: Self::DEFAULT_MAX_SIZE,
        }
    }

    /// Interface address for the multicast join (IPv4).
    pub fn with_interface(mut self, interface: Ipv4Addr) -> Self {
        self.interface = Some(interface);
        self
    }

    /// Requested `SO_RCVBUF` size. The OS may clamp it; a warning is
    /// logged when less than requested is granted.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Largest datagram accepted. Larger ones are dropped with a warning.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }
}

fn make_socket(config: &UdpReaderConfig) -> io::Result<std::net::UdpSocket> {
    let domain = match config.bind {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    if let Err(err) = socket.set_recv_buffer_size(config.buffer_size) {
        warn!(
            "could not set socket buffer to {} bytes: {err}",
            config.buffer_size
        );
    } else if let Ok(actual) = socket.recv_buffer_size() {
        if actual < config.buffer_size {
            warn!(
                "requested {} bytes of socket buffer, granted {actual}",
                config.buffer_size
            );
        }
    }
    socket.bind(&config.bind.into())?;
    match config.bind.ip() {
        IpAddr::V4(group) if group.is_multicast() => {
            let interface = config.interface.unwrap_or(Ipv4Addr::UNSPECIFIED);
            socket.join_multicast_v4(&group, &interface)?;
        }
        IpAddr::V6(group) if group.is_multicast() => {
            socket.join_multicast_v6(&group, 0)?;
        }
        _ => {}
    }
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Build the socket and attach a receive worker to the stream. Returns
/// the bound local address, which is how callers learn an ephemeral port.
pub(crate) fn spawn(shared: Arc<StreamShared>, config: UdpReaderConfig) -> io::Result<SocketAddr> {
    let std_socket = make_socket(&config)?;
    let local_addr = std_socket.local_addr()?;
    let runtime = shared.runtime();
    let _enter = runtime.enter();
    let socket = UdpSocket::from_std(std_socket)?;
    let worker = RxWorker {
        shared: shared.clone(),
        socket,
        max_size: config.max_size,
    };
    if !shared.spawn_reader(worker.run()) {
        return Err(io::Error::new(
            io::ErrorKind::NotConnected,
            "stream already stopped",
        ));
    }
    Ok(local_addr)
}

struct RxWorker {
    shared: Arc<StreamShared>,
    socket: UdpSocket,
    max_size: usize,
}

impl RxWorker {
    async fn run(self) {
        info!(
            "started udp reader on {}",
            self.socket
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "<unknown>".into())
        );
        if let Err(err) = self.run_inner().await {
            // The reader stops; other readers of the stream continue.
            warn!("udp reader stopped: {err}");
        }
        self.shared.reader_finished().await;
        info!("finished udp reader");
    }

    async fn run_inner(&self) -> io::Result<()> {
        // One extra byte so an oversized datagram shows up as oversized
        // instead of silently clipped to max_size.
        let mut buf = vec![0u8; self.max_size + 1];
        loop {
            let received = {
                let read = self.socket.recv_from(&mut buf);
                let closed = self.shared.closer().wait();
                select! {
                    r = read => r?,
                    _ = closed => return Ok(()),
                }
            };
            let (ct, peer) = received;
            if ct > self.max_size {
                warn!("dropping {ct}-byte datagram from {peer}: larger than max packet size");
                continue;
            }
            trace!("received {ct} bytes from {peer}");
            self.shared.add_packet(&buf[..ct]).await;
        }
    }
}
