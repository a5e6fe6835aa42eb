//! SLCAN serial-line CAN adapter
//!
//! Speaks the Lawicel/SLCAN ASCII protocol to a host over a serial line or
//! UDP socket and drives a CAN controller through [`can::CanDriver`].
//!
//! - [`slcan`]: protocol engine (codec, channel state machine, dispatcher,
//!   frame forwarder)
//! - [`can`]: controller backends
//! - [`transport`]: host-facing byte streams
//! - [`bridge`]: wiring, sessions and reconnection

pub mod bridge;
pub mod can;
pub mod cli;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod slcan;
pub mod transport;
