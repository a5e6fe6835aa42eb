//! Standard bus speed table for the `S` command

use std::fmt;

/// One of the nine standard SLCAN bus speeds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bitrate {
    Kbit10,
    Kbit20,
    Kbit50,
    Kbit100,
    Kbit125,
    Kbit250,
    Kbit500,
    Kbit800,
    Mbit1,
}

/// Table order matches selectors `'0'..='8'`
pub const BITRATE_TABLE: [Bitrate; 9] = [
    Bitrate::Kbit10,
    Bitrate::Kbit20,
    Bitrate::Kbit50,
    Bitrate::Kbit100,
    Bitrate::Kbit125,
    Bitrate::Kbit250,
    Bitrate::Kbit500,
    Bitrate::Kbit800,
    Bitrate::Mbit1,
];

impl Bitrate {
    /// Look up an ASCII selector digit; anything outside `'0'..='8'` is `None`
    pub fn lookup(selector: u8) -> Option<Self> {
        match selector {
            b'0'..=b'8' => Some(BITRATE_TABLE[usize::from(selector - b'0')]),
            _ => None,
        }
    }

    /// Bits per second
    pub fn bps(&self) -> u32 {
        match self {
            Self::Kbit10 => 10_000,
            Self::Kbit20 => 20_000,
            Self::Kbit50 => 50_000,
            Self::Kbit100 => 100_000,
            Self::Kbit125 => 125_000,
            Self::Kbit250 => 250_000,
            Self::Kbit500 => 500_000,
            Self::Kbit800 => 800_000,
            Self::Mbit1 => 1_000_000,
        }
    }

    /// ASCII selector digit for this speed
    pub fn selector(&self) -> u8 {
        let index = BITRATE_TABLE
            .iter()
            .position(|b| b == self)
            .unwrap_or_default();
        b'0' + index as u8
    }
}

impl fmt::Display for Bitrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.bps() {
            bps if bps >= 1_000_000 => write!(f, "{} Mbit/s", bps / 1_000_000),
            bps => write!(f, "{} kbit/s", bps / 1_000),
        }
    }
}
