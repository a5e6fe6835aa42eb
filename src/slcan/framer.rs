//! Line framer
//!
//! Accumulates inbound bytes into command lines. CR or BELL ends a line.
//! A line longer than [`MAX_LINE_LEN`] is reported once as
//! [`Line::Overflow`]; everything up to the next terminator is dropped and
//! framing resumes after it.
//!
//! A NUL byte ends the command text: whatever follows it on the same line
//! is ignored, so `\0\r` is an empty line.

use crate::constants::{BELL, CR, MAX_LINE_LEN, NUL};

/// Framing event
#[derive(Debug, PartialEq, Eq)]
pub enum Line<'a> {
    /// Complete line, terminator stripped
    Complete(&'a [u8]),
    /// Line exceeded the buffer and was discarded
    Overflow,
}

/// Per-session line accumulator
pub struct LineFramer {
    buffer: Vec<u8>,
    discarding: bool,
}

impl LineFramer {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MAX_LINE_LEN),
            discarding: false,
        }
    }

    /// Bytes of the line currently being accumulated
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Feed raw bytes, calling `on_line` for every line event
    pub fn feed(&mut self, data: &[u8], mut on_line: impl FnMut(Line<'_>)) {
        for &byte in data {
            if byte == CR || byte == BELL {
                if self.discarding {
                    self.discarding = false;
                } else {
                    let end = self
                        .buffer
                        .iter()
                        .position(|&b| b == NUL)
                        .unwrap_or(self.buffer.len());
                    on_line(Line::Complete(&self.buffer[..end]));
                }
                self.buffer.clear();
                continue;
            }

            if self.discarding {
                continue;
            }

            if self.buffer.len() == MAX_LINE_LEN {
                self.buffer.clear();
                self.discarding = true;
                on_line(Line::Overflow);
                continue;
            }

            self.buffer.push(byte);
        }
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}
