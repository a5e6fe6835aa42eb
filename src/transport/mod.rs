//! Transport abstraction for byte-level I/O
//!
//! Separates I/O concerns from protocol logic:
//! - **Transport**: How bytes flow (serial line, UDP datagrams)
//! - **SLCAN engine**: What the bytes mean (handled by the bridge session)
//!
//! Each transport manages its own execution model internally:
//! - Serial: blocking threads for low latency
//! - UDP: async tokio tasks

pub mod serial;
pub mod udp;

pub use serial::SerialTransport;
pub use udp::UdpTransport;

use bytes::Bytes;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::Result;

/// Channels for bidirectional communication with a transport
///
/// The transport owns the underlying I/O (socket, serial port)
/// and communicates via these channels. When the transport stops
/// (shutdown or error), it closes the channels.
pub struct TransportChannels {
    /// Inbound byte chunks from the host
    ///
    /// Returns `None` when the transport has stopped.
    pub rx: mpsc::Receiver<Bytes>,

    /// Outbound bytes; each chunk is written and flushed
    pub tx: mpsc::Sender<Bytes>,
}

/// Trait for spawnable transports
///
/// A transport handles opening the port, moving raw bytes and its own
/// threading model. Line framing, logging of traffic and reconnection are
/// the bridge's job.
///
/// # Lifecycle
///
/// 1. Create transport with configuration
/// 2. Call `spawn()` to start I/O in background
/// 3. Use returned channels for communication
/// 4. Transport runs until `shutdown` is set or a fatal error occurs
///    (disconnect, write failure)
/// 5. Transport closes channels when stopping
pub trait Transport: Send + 'static {
    /// Human readable endpoint, used in logs
    fn describe(&self) -> String;

    /// Spawn the transport in background
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be initialized
    /// (e.g., port not found, bind failed).
    fn spawn(self, shutdown: Arc<AtomicBool>) -> Result<TransportChannels>;
}
