//! Frame forwarding loop
//!
//! Drains the CAN channel and emits one ASCII line per received frame.
//! Runs on its own blocking worker for the whole bridge run, concurrently
//! with the command path.

use super::ascii::frame_to_ascii;
use super::channel::Channel;
use super::indicator::{IndicatorEvent, StatusIndicator};
use crate::can::CanDriver;
use crate::constants::{CAN_RECEIVE_TIMEOUT, FORWARD_IDLE_INTERVAL, MAX_FRAME_LINE_LEN};
use bytes::{Bytes, BytesMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Destination of forwarded frame lines
pub trait FrameSink: Send + Sync {
    /// Queue one line; `false` if it was dropped
    fn write(&self, line: Bytes) -> bool;
}

pub struct Forwarder<D: CanDriver> {
    channel: Arc<Channel<D>>,
    indicator: Arc<dyn StatusIndicator>,
    timestamps: Arc<AtomicBool>,
}

impl<D: CanDriver> Forwarder<D> {
    /// `timestamps` is the flag the dispatcher toggles with `Z`
    pub fn new(
        channel: Arc<Channel<D>>,
        indicator: Arc<dyn StatusIndicator>,
        timestamps: Arc<AtomicBool>,
    ) -> Self {
        Self {
            channel,
            indicator,
            timestamps,
        }
    }

    /// Forward frames to `sink` until `shutdown` is set
    ///
    /// Blocking; every wait is bounded so shutdown is observed within one
    /// receive timeout.
    pub fn run(&self, sink: &dyn FrameSink, shutdown: &AtomicBool) {
        debug!("Frame forwarder started");
        let mut buf = BytesMut::with_capacity(MAX_FRAME_LINE_LEN);

        while !shutdown.load(Ordering::Relaxed) {
            if !self.channel.is_running() {
                self.indicator.signal(IndicatorEvent::Waiting);
                std::thread::sleep(FORWARD_IDLE_INTERVAL);
                continue;
            }

            let Some(frame) = self.channel.receive(CAN_RECEIVE_TIMEOUT) else {
                continue;
            };

            buf.reserve(MAX_FRAME_LINE_LEN);
            frame_to_ascii(&frame, self.timestamps.load(Ordering::Relaxed), &mut buf);
            let line = buf.split().freeze();
            trace!(%frame, line = %line.escape_ascii(), "Forwarding CAN frame");

            if !sink.write(line) {
                trace!(%frame, "Forwarded frame dropped");
            }
        }

        debug!("Frame forwarder stopped");
    }
}
