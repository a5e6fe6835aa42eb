//! Frame model: CAN frames, controller modes and status flags

use crate::constants::MAX_DATA_LEN;
use std::fmt;

/// One classic CAN frame
///
/// Bytes past `len()` are always zero, so two frames compare equal exactly
/// when their wire representation is the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CanFrame {
    id: u32,
    extended: bool,
    remote: bool,
    length: u8,
    data: [u8; MAX_DATA_LEN],
    timestamp: u16,
}

impl CanFrame {
    /// Largest 11-bit identifier
    pub const MAX_STANDARD_ID: u32 = 0x7FF;
    /// Largest 29-bit identifier
    pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;

    /// Data frame. `None` if the id does not fit or `data` exceeds 8 bytes.
    pub fn new(id: u32, extended: bool, data: &[u8]) -> Option<Self> {
        if data.len() > MAX_DATA_LEN || !id_fits(id, extended) {
            return None;
        }
        let mut buf = [0u8; MAX_DATA_LEN];
        buf[..data.len()].copy_from_slice(data);
        Some(Self {
            id,
            extended,
            remote: false,
            length: data.len() as u8,
            data: buf,
            timestamp: 0,
        })
    }

    /// Remote (RTR) frame requesting `length` bytes
    pub fn new_remote(id: u32, extended: bool, length: u8) -> Option<Self> {
        if usize::from(length) > MAX_DATA_LEN || !id_fits(id, extended) {
            return None;
        }
        Some(Self {
            id,
            extended,
            remote: true,
            length,
            data: [0; MAX_DATA_LEN],
            timestamp: 0,
        })
    }

    /// Same frame carrying a 16-bit timestamp
    pub fn with_timestamp(mut self, timestamp: u16) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_extended(&self) -> bool {
        self.extended
    }

    pub fn is_remote(&self) -> bool {
        self.remote
    }

    /// Data length code (0..=8)
    pub fn len(&self) -> usize {
        usize::from(self.length)
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Payload; empty for remote frames
    pub fn data(&self) -> &[u8] {
        if self.remote {
            &[]
        } else {
            &self.data[..self.len()]
        }
    }

    pub fn timestamp(&self) -> u16 {
        self.timestamp
    }
}

impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.extended {
            write!(f, "{:08X}", self.id)?;
        } else {
            write!(f, "{:03X}", self.id)?;
        }
        if self.remote {
            return write!(f, " [{}] remote", self.length);
        }
        write!(f, " [{}]", self.length)?;
        for b in self.data() {
            write!(f, " {:02X}", b)?;
        }
        Ok(())
    }
}

fn id_fits(id: u32, extended: bool) -> bool {
    if extended {
        id <= CanFrame::MAX_EXTENDED_ID
    } else {
        id <= CanFrame::MAX_STANDARD_ID
    }
}

/// Controller mode requested when opening the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanMode {
    /// Normal operation (`O`)
    Normal,
    /// Internal loopback, transmitted frames are received back (`l`)
    Loopback,
    /// Listen-only, no ACK and no transmit (`L`)
    Silent,
}

impl fmt::Display for CanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Loopback => write!(f, "loopback"),
            Self::Silent => write!(f, "silent"),
        }
    }
}

bitflags::bitflags! {
    /// Status byte reported by the `F` command
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StatusFlags: u8 {
        const RX_QUEUE_FULL = 1 << 0;
        const TX_FAILED = 1 << 1;
        const ERROR_WARNING = 1 << 2;
        const RX_OVERRUN = 1 << 3;
        const RESERVED = 1 << 4;
        const ERROR_PASSIVE = 1 << 5;
        const ARBITRATION_LOST = 1 << 6;
        const BUS_ERROR = 1 << 7;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_data_frame() {
        let frame = CanFrame::new(0x123, false, &[0xAA, 0xBB]).unwrap();
        assert_eq!(frame.id(), 0x123);
        assert!(!frame.is_extended());
        assert!(!frame.is_remote());
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.data(), &[0xAA, 0xBB]);
        assert_eq!(frame.timestamp(), 0);
    }

    #[test]
    fn test_new_rejects_oversized_payload() {
        assert!(CanFrame::new(0x1, false, &[0; 9]).is_none());
    }

    #[test]
    fn test_new_rejects_id_out_of_range() {
        assert!(CanFrame::new(0x800, false, &[]).is_none());
        assert!(CanFrame::new(0x800, true, &[]).is_some());
        assert!(CanFrame::new(0x2000_0000, true, &[]).is_none());
    }

    #[test]
    fn test_remote_frame_has_no_payload() {
        let frame = CanFrame::new_remote(0x7FF, false, 4).unwrap();
        assert!(frame.is_remote());
        assert_eq!(frame.len(), 4);
        assert!(frame.data().is_empty());
        assert!(CanFrame::new_remote(0x7FF, false, 9).is_none());
    }

    #[test]
    fn test_display() {
        let frame = CanFrame::new(0x1ABCDEF, true, &[1, 2]).unwrap();
        assert_eq!(frame.to_string(), "01ABCDEF [2] 01 02");
        let frame = CanFrame::new_remote(0x12, false, 3).unwrap();
        assert_eq!(frame.to_string(), "012 [3] remote");
    }

    #[test]
    fn test_status_flags_bit_positions() {
        assert_eq!(StatusFlags::RX_QUEUE_FULL.bits(), 0x01);
        assert_eq!(StatusFlags::ERROR_PASSIVE.bits(), 0x20);
        assert_eq!(StatusFlags::BUS_ERROR.bits(), 0x80);
    }
}
