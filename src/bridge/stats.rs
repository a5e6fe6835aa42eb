//! Traffic statistics for the bridge
//!
//! Thread-safe counters shared by the inbound sessions and the forwarder.
//! Uses lock-free atomics for all operations.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Stats {
    /// Bytes received from the host
    rx_total: AtomicU64,
    /// Bytes sent to the host (replies and forwarded frames)
    tx_total: AtomicU64,
    /// Command lines executed
    commands: AtomicU64,
    /// Command lines answered with NACK
    rejected: AtomicU64,
    /// CAN frames delivered to a transport
    forwarded: AtomicU64,
    /// CAN frames dropped (no session attached or transport congested)
    dropped: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add bytes received from the host
    #[inline]
    pub fn add_rx(&self, bytes: usize) {
        self.rx_total.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Add bytes sent to the host
    #[inline]
    pub fn add_tx(&self, bytes: usize) {
        self.tx_total.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_command(&self, accepted: bool) {
        self.commands.fetch_add(1, Ordering::Relaxed);
        if !accepted {
            self.rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_forwarded(&self, bytes: usize) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
        self.add_tx(bytes);
    }

    #[inline]
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rx_bytes(&self) -> u64 {
        self.rx_total.load(Ordering::Relaxed)
    }

    pub fn tx_bytes(&self) -> u64 {
        self.tx_total.load(Ordering::Relaxed)
    }

    pub fn commands(&self) -> u64 {
        self.commands.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rx {} B, tx {} B, {} commands ({} rejected), {} frames forwarded, {} dropped",
            self.rx_bytes(),
            self.tx_bytes(),
            self.commands(),
            self.rejected(),
            self.forwarded(),
            self.dropped()
        )
    }
}
