//! Status indicator collaborator
//!
//! The engine only signals semantic events; how they are rendered (LED
//! colour, pulse pattern, log line) belongs to the implementation.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::info;

/// Semantic indicator events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorEvent {
    Error,
    Waiting,
    Idle,
}

impl fmt::Display for IndicatorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Waiting => write!(f, "waiting"),
            Self::Idle => write!(f, "idle"),
        }
    }
}

/// Receiver of indicator events
///
/// Called from both the inbound path and the forwarding loop.
pub trait StatusIndicator: Send + Sync {
    fn signal(&self, event: IndicatorEvent);
}

/// Indicator that logs transitions through `tracing`
///
/// Repeated events (the forwarding loop signals `waiting` every idle tick)
/// are collapsed so only changes reach the log.
pub struct TracingIndicator {
    last: AtomicU8,
}

const NONE: u8 = 0;

impl TracingIndicator {
    pub fn new() -> Self {
        Self {
            last: AtomicU8::new(NONE),
        }
    }

    fn encode(event: IndicatorEvent) -> u8 {
        match event {
            IndicatorEvent::Error => 1,
            IndicatorEvent::Waiting => 2,
            IndicatorEvent::Idle => 3,
        }
    }
}

impl Default for TracingIndicator {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusIndicator for TracingIndicator {
    fn signal(&self, event: IndicatorEvent) {
        let code = Self::encode(event);
        if self.last.swap(code, Ordering::Relaxed) != code {
            info!(indicator = %event, "Status indicator changed");
        }
    }
}
