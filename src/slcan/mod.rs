//! SLCAN protocol engine
//!
//! Byte-level pipeline, leaves first:
//! - [`hex`]: fixed-width hex fields
//! - [`frame`]: CAN frame, controller mode, status flags
//! - [`ascii`]: frame ⇄ protocol line
//! - [`bitrate`]: `S` selector table
//! - [`channel`]: Closed/Open/Closing lifecycle over a [`CanDriver`](crate::can::CanDriver)
//! - [`framer`]: inbound bytes → command lines
//! - [`dispatcher`]: command line → action + reply
//! - [`forwarder`]: received frames → outbound lines

pub mod ascii;
pub mod bitrate;
pub mod channel;
pub mod dispatcher;
pub mod error;
pub mod forwarder;
pub mod frame;
pub mod framer;
pub mod hex;
pub mod indicator;

pub use bitrate::{Bitrate, BITRATE_TABLE};
pub use channel::{Channel, ChannelOp, ChannelState};
pub use dispatcher::{DeviceInfo, Dispatcher};
pub use error::SlcanError;
pub use forwarder::{FrameSink, Forwarder};
pub use frame::{CanFrame, CanMode, StatusFlags};
pub use framer::{Line, LineFramer};
pub use indicator::{IndicatorEvent, StatusIndicator, TracingIndicator};
