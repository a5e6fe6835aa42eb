//! Application-wide constants
//!
//! Centralized constants to avoid duplication and ensure consistency.

use std::time::Duration;

// =============================================================================
// Protocol
// =============================================================================

/// Success terminator (ACK)
pub const CR: u8 = b'\r';

/// Failure terminator (NACK)
pub const BELL: u8 = b'\x07';

/// Ends the command text early; the rest of the line is ignored
pub const NUL: u8 = 0;

/// Hex digits in a standard (11-bit) identifier field
pub const STD_ID_LEN: usize = 3;

/// Hex digits in an extended (29-bit) identifier field
pub const EXT_ID_LEN: usize = 8;

/// Hex digits in the optional timestamp suffix
pub const TIMESTAMP_LEN: usize = 4;

/// Maximum payload bytes in a classic CAN frame
pub const MAX_DATA_LEN: usize = 8;

/// Longest legal command line without its terminator:
/// `T` + 8 id digits + 1 length digit + 16 data digits + 4 timestamp digits
pub const MAX_LINE_LEN: usize = 1 + EXT_ID_LEN + 1 + MAX_DATA_LEN * 2 + TIMESTAMP_LEN;

/// Longest encoded frame line, terminator included
pub const MAX_FRAME_LINE_LEN: usize = MAX_LINE_LEN + 1;

// =============================================================================
// Timing - CAN channel
// =============================================================================

/// Bounded wait for a driver transmit
pub const CAN_SEND_TIMEOUT: Duration = Duration::from_millis(100);

/// Bounded wait for a driver receive
pub const CAN_RECEIVE_TIMEOUT: Duration = Duration::from_millis(100);

/// Bounded wait for the driver alert poll
pub const CAN_ALERT_TIMEOUT: Duration = Duration::from_millis(100);

/// Settle delay between publishing `Closing` and tearing the driver down
pub const CLOSE_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Forwarding loop idle interval while the channel is not running
pub const FORWARD_IDLE_INTERVAL: Duration = Duration::from_millis(100);

// =============================================================================
// Timing - Reconnection
// =============================================================================

/// Delay between serial reconnection attempts (seconds)
pub const RECONNECT_DELAY_SECS: u64 = 2;

/// Shutdown flag poll interval for session loops (milliseconds)
pub const SHUTDOWN_POLL_MS: u64 = 100;

// =============================================================================
// Network
// =============================================================================

/// Default UDP port for SLCAN-over-UDP
pub const DEFAULT_UDP_PORT: u16 = 9100;

/// Maximum socket bind retry attempts
pub const MAX_SOCKET_RETRY_ATTEMPTS: u32 = 5;

/// Base delay between retry attempts (milliseconds)
pub const RETRY_BASE_DELAY_MS: u64 = 200;

// =============================================================================
// Buffers
// =============================================================================

/// Transport read buffer size
pub const READ_BUFFER_SIZE: usize = 4096;

/// Channel capacity for async message passing
pub const CHANNEL_CAPACITY: usize = 256;

/// Frames queued by the virtual CAN bus before new frames are dropped
pub const VIRTUAL_RX_QUEUE_LEN: usize = 64;

// =============================================================================
// Serial
// =============================================================================

/// Default baud rate (ignored by USB CDC, used by real UARTs)
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Consecutive zero-byte reads before assuming port disconnected
pub const SERIAL_DISCONNECT_THRESHOLD: u32 = 10;

/// Reads between two line-state (DSR/CTS) polls
pub const LINE_STATE_POLL_READS: u32 = 50;
