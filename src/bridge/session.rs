//! SLCAN session - inbound command path for one transport connection
//!
//! The session handles:
//! - Line framing of inbound bytes
//! - Command dispatch and reply write-back
//! - Attaching the transport to the outbound sink for forwarded frames
//! - Statistics and traffic tracing
//!
//! The session does NOT handle:
//! - Transport lifecycle (that's the caller's responsibility)
//! - Reconnection logic (handled by the runner)
//!
//! Every inbound chunk is processed to completion on a blocking worker:
//! driver calls wait up to their fixed timeouts, never on the async runtime.

use super::sink::OutboundSink;
use super::stats::Stats;
use crate::can::CanDriver;
use crate::error::{BridgeError, Result};
use crate::slcan::{Dispatcher, Line, LineFramer};
use crate::transport::TransportChannels;
use bytes::{Bytes, BytesMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

pub struct SlcanSession<D: CanDriver> {
    channels: TransportChannels,
    dispatcher: Arc<Dispatcher<D>>,
    sink: OutboundSink,
    stats: Arc<Stats>,
}

impl<D: CanDriver> SlcanSession<D> {
    pub fn new(
        channels: TransportChannels,
        dispatcher: Arc<Dispatcher<D>>,
        sink: OutboundSink,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            channels,
            dispatcher,
            sink,
            stats,
        }
    }

    /// Run the session until shutdown or transport disconnect
    ///
    /// Returns `Ok(())` on clean shutdown or transport disconnect.
    /// The caller should check the shutdown flag to determine if
    /// reconnection should be attempted.
    pub async fn run(self, shutdown: Arc<AtomicBool>) -> Result<()> {
        let TransportChannels { rx, tx } = self.channels;
        self.sink.attach(tx.clone());

        let worker = {
            let tx = tx.clone();
            let dispatcher = self.dispatcher;
            let stats = self.stats;
            tokio::task::spawn_blocking(move || inbound_loop(rx, tx, &dispatcher, &stats, &shutdown))
        };
        let result = worker.await;

        self.sink.detach(&tx);
        debug!("SLCAN session ended");

        result.map_err(|e| BridgeError::TaskFailed {
            task: "Session",
            reason: e.to_string(),
        })
    }
}

/// Framer → dispatcher → reply, until the transport closes or shutdown
fn inbound_loop<D: CanDriver>(
    mut rx: mpsc::Receiver<Bytes>,
    tx: mpsc::Sender<Bytes>,
    dispatcher: &Dispatcher<D>,
    stats: &Stats,
    shutdown: &AtomicBool,
) {
    let mut framer = LineFramer::new();
    let mut reply = BytesMut::new();

    while let Some(data) = rx.blocking_recv() {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        stats.add_rx(data.len());
        trace!(data = %data.escape_ascii(), "SLCAN in");

        framer.feed(&data, |line| {
            let accepted = match line {
                Line::Complete(line) => dispatcher.dispatch(line, &mut reply).is_ok(),
                Line::Overflow => {
                    dispatcher.overflow(&mut reply);
                    false
                }
            };
            stats.record_command(accepted);
        });

        if reply.is_empty() {
            continue;
        }
        let out = reply.split().freeze();
        trace!(data = %out.escape_ascii(), "SLCAN out");
        stats.add_tx(out.len());
        if tx.blocking_send(out).is_err() {
            // Transport writer gone
            break;
        }
    }
}
