//! Outbound sink for forwarded frames
//!
//! The forwarder outlives transport sessions. Each session attaches its
//! outbound sender on start and detaches it on exit; lines produced while
//! nothing is attached are dropped and counted.

use super::stats::Stats;
use crate::slcan::FrameSink;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

#[derive(Clone)]
pub struct OutboundSink {
    tx: Arc<Mutex<Option<mpsc::Sender<Bytes>>>>,
    stats: Arc<Stats>,
}

impl OutboundSink {
    pub fn new(stats: Arc<Stats>) -> Self {
        Self {
            tx: Arc::new(Mutex::new(None)),
            stats,
        }
    }

    /// Route forwarded frames to `tx`, replacing any previous session
    pub fn attach(&self, tx: mpsc::Sender<Bytes>) {
        *self.tx.lock() = Some(tx);
        debug!("Outbound sink attached");
    }

    /// Stop routing to `tx`; no-op if another session has attached since
    pub fn detach(&self, tx: &mpsc::Sender<Bytes>) {
        let mut current = self.tx.lock();
        if current.as_ref().is_some_and(|c| c.same_channel(tx)) {
            *current = None;
            debug!("Outbound sink detached");
        }
    }

    pub fn is_attached(&self) -> bool {
        self.tx.lock().is_some()
    }
}

impl FrameSink for OutboundSink {
    fn write(&self, line: Bytes) -> bool {
        let len = line.len();
        let mut current = self.tx.lock();
        let Some(tx) = current.as_ref() else {
            self.stats.record_dropped();
            return false;
        };

        match tx.try_send(line) {
            Ok(()) => {
                self.stats.record_forwarded(len);
                true
            }
            Err(TrySendError::Full(_)) => {
                self.stats.record_dropped();
                false
            }
            Err(TrySendError::Closed(_)) => {
                *current = None;
                self.stats.record_dropped();
                false
            }
        }
    }
}
