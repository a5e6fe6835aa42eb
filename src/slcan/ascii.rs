//! Frame ⇄ ASCII codec
//!
//! Line layout: `<type><id><dlc>[data][timestamp]\r`
//!
//! | type | frame                  | id digits |
//! |------|------------------------|-----------|
//! | `t`  | standard data          | 3         |
//! | `T`  | extended data          | 8         |
//! | `r`  | standard remote        | 3         |
//! | `R`  | extended remote        | 8         |
//!
//! Data is omitted for remote frames; the 4-digit timestamp is optional.

use super::error::SlcanError;
use super::frame::CanFrame;
use super::hex;
use crate::constants::{CR, EXT_ID_LEN, MAX_DATA_LEN, STD_ID_LEN, TIMESTAMP_LEN};
use bytes::{BufMut, BytesMut};

/// Type character for a frame
fn type_char(frame: &CanFrame) -> u8 {
    match (frame.is_remote(), frame.is_extended()) {
        (false, false) => b't',
        (false, true) => b'T',
        (true, false) => b'r',
        (true, true) => b'R',
    }
}

/// Append one frame line (terminator included) to `out`
///
/// Returns the number of bytes written.
pub fn frame_to_ascii(frame: &CanFrame, timestamp: bool, out: &mut BytesMut) -> usize {
    let start = out.len();

    out.put_u8(type_char(frame));

    if frame.is_extended() {
        hex::u32_to_hex(frame.id() & CanFrame::MAX_EXTENDED_ID, EXT_ID_LEN, out);
    } else {
        hex::u32_to_hex(frame.id() & CanFrame::MAX_STANDARD_ID, STD_ID_LEN, out);
    }

    out.put_u8(hex::digit(frame.len() as u8));

    if !frame.is_remote() {
        hex::bytes_to_hex(frame.data(), out);
    }

    if timestamp {
        hex::u32_to_hex(u32::from(frame.timestamp()), TIMESTAMP_LEN, out);
    }

    out.put_u8(CR);
    out.len() - start
}

/// Parse a `t`/`T`/`r`/`R` line (terminator already stripped)
///
/// A trailing 4-digit group after the data is read as the timestamp; any
/// other trailing characters are ignored.
pub fn ascii_to_frame(line: &[u8]) -> Result<CanFrame, SlcanError> {
    let (&kind, rest) = line.split_first().ok_or(SlcanError::MalformedCommand {
        reason: "empty frame line",
    })?;

    let (extended, remote) = match kind {
        b't' => (false, false),
        b'T' => (true, false),
        b'r' => (false, true),
        b'R' => (true, true),
        _ => {
            return Err(SlcanError::MalformedCommand {
                reason: "unknown frame type",
            })
        }
    };

    let id_len = if extended { EXT_ID_LEN } else { STD_ID_LEN };
    let id = hex::hex_to_u32(rest, id_len).ok_or(SlcanError::MalformedCommand {
        reason: "identifier truncated",
    })?;
    let rest = &rest[id_len..];

    let (&dlc, rest) = rest.split_first().ok_or(SlcanError::MalformedCommand {
        reason: "length digit missing",
    })?;
    let length = hex::value(dlc);
    if usize::from(length) > MAX_DATA_LEN {
        return Err(SlcanError::FrameTooLong { length });
    }

    let (frame, rest) = if remote {
        let frame = CanFrame::new_remote(id, extended, length);
        (frame, rest)
    } else {
        let mut data = [0u8; MAX_DATA_LEN];
        let payload = &mut data[..usize::from(length)];
        hex::hex_to_bytes(rest, payload).ok_or(SlcanError::MalformedCommand {
            reason: "data truncated",
        })?;
        let frame = CanFrame::new(id, extended, payload);
        (frame, &rest[payload.len() * 2..])
    };

    let frame = frame.ok_or(SlcanError::MalformedCommand {
        reason: "identifier out of range",
    })?;

    if rest.len() == TIMESTAMP_LEN {
        if let Some(ts) = hex::hex_to_u32(rest, TIMESTAMP_LEN) {
            return Ok(frame.with_timestamp(ts as u16));
        }
    }

    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn encode(frame: &CanFrame, timestamp: bool) -> Vec<u8> {
        let mut out = BytesMut::new();
        frame_to_ascii(frame, timestamp, &mut out);
        out.to_vec()
    }

    #[test]
    fn test_encode_standard_data() {
        let frame = CanFrame::new(0x123, false, &[0xAA]).unwrap();
        assert_eq!(encode(&frame, false), b"t1231aa\r");
    }

    #[test]
    fn test_encode_extended_data() {
        let frame = CanFrame::new(0x1234_5678, true, &[0x11, 0x22, 0x33]).unwrap();
        assert_eq!(encode(&frame, false), b"T123456783112233\r");
    }

    #[test]
    fn test_encode_remote_omits_data() {
        let frame = CanFrame::new_remote(0x7FF, false, 8).unwrap();
        assert_eq!(encode(&frame, false), b"r7ff8\r");
        let frame = CanFrame::new_remote(0x1, true, 0).unwrap();
        assert_eq!(encode(&frame, false), b"R000000010\r");
    }

    #[test]
    fn test_encode_with_timestamp() {
        let frame = CanFrame::new(0x010, false, &[])
            .unwrap()
            .with_timestamp(0xEA5F);
        assert_eq!(encode(&frame, true), b"t0100ea5f\r");
    }

    #[test]
    fn test_encode_worst_case_fits_line_buffer() {
        let frame = CanFrame::new(0x1FFF_FFFF, true, &[0xFF; 8])
            .unwrap()
            .with_timestamp(0xFFFF);
        let line = encode(&frame, true);
        assert_eq!(line.len(), crate::constants::MAX_FRAME_LINE_LEN);
    }

    #[test]
    fn test_decode_standard_data() {
        let frame = ascii_to_frame(b"t1231AA").unwrap();
        assert_eq!(frame, CanFrame::new(0x123, false, &[0xAA]).unwrap());
    }

    #[test]
    fn test_decode_extended_remote() {
        let frame = ascii_to_frame(b"R01ABCDEF2").unwrap();
        assert_eq!(frame, CanFrame::new_remote(0x1AB_CDEF, true, 2).unwrap());
    }

    #[test]
    fn test_decode_length_over_eight() {
        assert_eq!(
            ascii_to_frame(b"t123F"),
            Err(SlcanError::FrameTooLong { length: 15 })
        );
        assert_eq!(
            ascii_to_frame(b"t1239"),
            Err(SlcanError::FrameTooLong { length: 9 })
        );
    }

    #[test]
    fn test_decode_truncated_fields() {
        assert!(matches!(
            ascii_to_frame(b"t12"),
            Err(SlcanError::MalformedCommand { .. })
        ));
        assert!(matches!(
            ascii_to_frame(b"t123"),
            Err(SlcanError::MalformedCommand { .. })
        ));
        assert!(matches!(
            ascii_to_frame(b"t1232AA"),
            Err(SlcanError::MalformedCommand { .. })
        ));
    }

    #[test]
    fn test_decode_standard_id_out_of_range() {
        assert!(matches!(
            ascii_to_frame(b"t8000"),
            Err(SlcanError::MalformedCommand { .. })
        ));
    }

    #[test]
    fn test_decode_ignores_unexpected_trailer() {
        let frame = ascii_to_frame(b"t1231AAxy").unwrap();
        assert_eq!(frame.timestamp(), 0);
        assert_eq!(frame.data(), &[0xAA]);
    }

    #[test]
    fn test_decode_timestamp_suffix() {
        let frame = ascii_to_frame(b"t1231AA1234").unwrap();
        assert_eq!(frame.timestamp(), 0x1234);
    }

    fn arb_frame() -> impl Strategy<Value = CanFrame> {
        (
            any::<bool>(),
            any::<bool>(),
            0u32..=CanFrame::MAX_EXTENDED_ID,
            proptest::collection::vec(any::<u8>(), 0..=8),
            any::<u16>(),
        )
            .prop_map(|(extended, remote, id, data, ts)| {
                let id = if extended {
                    id
                } else {
                    id & CanFrame::MAX_STANDARD_ID
                };
                let frame = if remote {
                    CanFrame::new_remote(id, extended, data.len() as u8)
                } else {
                    CanFrame::new(id, extended, &data)
                };
                frame.unwrap().with_timestamp(ts)
            })
    }

    proptest! {
        #[test]
        fn prop_roundtrip_without_timestamp(frame in arb_frame()) {
            let line = encode(&frame, false);
            let decoded = ascii_to_frame(&line[..line.len() - 1]).unwrap();
            prop_assert_eq!(decoded, frame.with_timestamp(0));
        }

        #[test]
        fn prop_roundtrip_with_timestamp(frame in arb_frame()) {
            let line = encode(&frame, true);
            let decoded = ascii_to_frame(&line[..line.len() - 1]).unwrap();
            prop_assert_eq!(decoded, frame);
        }
    }
}
