//! Protocol-level errors
//!
//! Every variant is local to one command line: it is answered with a NACK
//! and mapped to an indicator event, never propagated further.

use super::channel::{ChannelOp, ChannelState};
use super::indicator::IndicatorEvent;
use crate::can::{DriverError, DriverOp};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlcanError {
    /// Unknown leading character, or a field is missing or out of range
    MalformedCommand { reason: &'static str },
    /// Length digit greater than 8
    FrameTooLong { length: u8 },
    /// `S` selector outside `0-8`, or the driver refused the bitrate
    UnsupportedBitrate {
        selector: u8,
        source: Option<DriverError>,
    },
    /// `O`/`l`/`L` before any `S` command
    BitrateNotConfigured,
    /// Operation not allowed in the current channel state
    IllegalStateTransition { op: ChannelOp, state: ChannelState },
    /// The CAN driver reported a failure
    DriverFailure(DriverError),
    /// Command line longer than the line buffer
    FramingOverflow,
}

impl SlcanError {
    /// Indicator event raised alongside the NACK
    pub fn indicator(&self) -> IndicatorEvent {
        match self {
            Self::IllegalStateTransition {
                op: ChannelOp::Close,
                ..
            } => IndicatorEvent::Waiting,
            Self::DriverFailure(DriverError {
                op: DriverOp::Close,
                ..
            }) => IndicatorEvent::Waiting,
            _ => IndicatorEvent::Error,
        }
    }
}

impl std::error::Error for SlcanError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::UnsupportedBitrate {
                source: Some(source),
                ..
            } => Some(source),
            Self::DriverFailure(source) => Some(source),
            _ => None,
        }
    }
}

impl fmt::Display for SlcanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedCommand { reason } => write!(f, "Malformed command: {}", reason),
            Self::FrameTooLong { length } => write!(f, "Frame length {} exceeds 8", length),
            Self::UnsupportedBitrate {
                selector,
                source: None,
            } => write!(f, "Unsupported bitrate selector '{}'", selector.escape_ascii()),
            Self::UnsupportedBitrate {
                selector,
                source: Some(e),
            } => write!(f, "Bitrate S{} rejected: {}", selector.escape_ascii(), e),
            Self::BitrateNotConfigured => write!(f, "Bitrate not configured"),
            Self::IllegalStateTransition { op, state } => {
                write!(f, "Cannot {} while channel is {}", op, state)
            }
            Self::DriverFailure(e) => write!(f, "Driver failure: {}", e),
            Self::FramingOverflow => write!(f, "Command line too long"),
        }
    }
}
