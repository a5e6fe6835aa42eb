//! UDP transport for network communication
//!
//! Operates in "server" mode: listens on a port and tracks the address
//! of the host that last sent a command. Replies and forwarded frames go
//! to that host.
//!
//! Uses async tokio tasks for I/O:
//! - RX task: receives datagrams, tracks peer address, sends to channel
//! - TX task: receives from channel, sends to last known peer address

use super::{Transport, TransportChannels};
use crate::constants::{
    CHANNEL_CAPACITY, MAX_SOCKET_RETRY_ATTEMPTS, READ_BUFFER_SIZE, RETRY_BASE_DELAY_MS,
    SHUTDOWN_POLL_MS,
};
use crate::error::{BridgeError, Result};
use bytes::Bytes;
use parking_lot::RwLock;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, trace};

pub struct UdpTransport {
    addr: SocketAddr,
}

impl UdpTransport {
    /// Create a new UDP transport listening on `bind:port`
    pub fn new(bind: IpAddr, port: u16) -> Self {
        Self {
            addr: SocketAddr::new(bind, port),
        }
    }
}

impl Transport for UdpTransport {
    fn describe(&self) -> String {
        format!("udp {}", self.addr)
    }

    fn spawn(self, shutdown: Arc<AtomicBool>) -> Result<TransportChannels> {
        let (in_tx, in_rx) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);
        let (out_tx, mut out_rx) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);

        // SO_REUSEADDR for quick rebind
        let socket = create_reusable_udp_socket(self.addr)?;

        // Last peer that sent a datagram
        let peer_addr: Arc<RwLock<Option<SocketAddr>>> = Arc::new(RwLock::new(None));
        let poll = Duration::from_millis(SHUTDOWN_POLL_MS);

        // RX task (async)
        let socket_rx = socket.clone();
        let addr_store = peer_addr.clone();
        let shutdown_rx = shutdown.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; READ_BUFFER_SIZE];

            while !shutdown_rx.load(Ordering::Relaxed) {
                match tokio::time::timeout(poll, socket_rx.recv_from(&mut buf)).await {
                    Ok(Ok((len, addr))) => {
                        let previous = addr_store.write().replace(addr);
                        if previous != Some(addr) {
                            debug!(peer = %addr, "UDP peer attached");
                        }

                        if in_tx
                            .send(Bytes::copy_from_slice(&buf[..len]))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Ok(Err(e)) => {
                        trace!(error = %e, "UDP receive error");
                    }
                    Err(_) => {
                        // Timeout - allows checking shutdown flag
                    }
                }
            }
        });

        // TX task (async)
        let socket_tx = socket;
        let addr_read = peer_addr;
        let shutdown_tx = shutdown;
        tokio::spawn(async move {
            while !shutdown_tx.load(Ordering::Relaxed) {
                match tokio::time::timeout(poll, out_rx.recv()).await {
                    Ok(Some(data)) => {
                        // Copy the address out, the lock must not be held across await
                        let addr_opt = *addr_read.read();
                        if let Some(addr) = addr_opt {
                            let _ = socket_tx.send_to(&data, addr).await;
                        }
                    }
                    Ok(None) => break,
                    Err(_) => {}
                }
            }
        });

        Ok(TransportChannels {
            rx: in_rx,
            tx: out_tx,
        })
    }
}

/// Create a UDP socket with SO_REUSEADDR for quick rebind after restart
///
/// Retries a few times if the address is still in use.
fn create_reusable_udp_socket(addr: SocketAddr) -> Result<Arc<UdpSocket>> {
    let port = addr.port();
    let map_err = |e| BridgeError::UdpBind { port, source: e };

    for attempt in 0..MAX_SOCKET_RETRY_ATTEMPTS {
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
            .map_err(map_err)?;
        socket.set_reuse_address(true).map_err(map_err)?;
        socket.set_nonblocking(true).map_err(map_err)?;

        match socket.bind(&addr.into()) {
            Ok(_) => {
                let std_socket: std::net::UdpSocket = socket.into();
                let tokio_socket = UdpSocket::from_std(std_socket).map_err(map_err)?;
                return Ok(Arc::new(tokio_socket));
            }
            Err(_) if attempt < MAX_SOCKET_RETRY_ATTEMPTS - 1 => {
                // Exponential backoff: 200ms, 400ms, 800ms, 1600ms
                std::thread::sleep(Duration::from_millis(RETRY_BASE_DELAY_MS * (1 << attempt)));
            }
            Err(e) => return Err(map_err(e)),
        }
    }

    Err(BridgeError::UdpBind {
        port,
        source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "failed after retries"),
    })
}
