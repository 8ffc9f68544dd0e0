//! Byte-level primitives shared by every packet codec: variable-length
//! integers, length-prefixed UTF-8 strings and binary fields, packet
//! identifiers, and the outbound packet buffer.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::CodecError;
use crate::packet_id::IdWidth;

/// MQTT caps the remaining length at 0x0FFFFFFF (268,435,455).
pub const MAX_REMAINING_LENGTH: u32 = 268_435_455;

pub(crate) fn read_u8(buf: &mut Bytes) -> Result<u8, CodecError> {
    if buf.remaining() < 1 {
        return Err(CodecError::Truncated);
    }
    Ok(buf.get_u8())
}

pub(crate) fn read_u16(buf: &mut Bytes) -> Result<u16, CodecError> {
    if buf.remaining() < 2 {
        return Err(CodecError::Truncated);
    }
    Ok(buf.get_u16())
}

pub(crate) fn read_u32(buf: &mut Bytes) -> Result<u32, CodecError> {
    if buf.remaining() < 4 {
        return Err(CodecError::Truncated);
    }
    Ok(buf.get_u32())
}

/// Reads an MQTT variable-length integer: 7-bit groups, continuation bit,
/// at most four bytes.
pub(crate) fn read_variable_length(buf: &mut Bytes) -> Result<u32, CodecError> {
    let mut multiplier = 1u32;
    let mut value = 0u32;

    loop {
        if buf.remaining() < 1 {
            return Err(CodecError::Truncated);
        }
        let byte = buf.get_u8();
        value += (byte & 0x7F) as u32 * multiplier;

        if value > MAX_REMAINING_LENGTH {
            return Err(CodecError::MalformedRemainingLength);
        }
        if (byte & 0x80) == 0 {
            return Ok(value);
        }
        if multiplier == 128 * 128 * 128 {
            // This was the fourth byte and it still set the continuation bit.
            return Err(CodecError::MalformedRemainingLength);
        }
        multiplier *= 128;
    }
}

/// Number of bytes `write_variable_length` will emit.
pub(crate) const fn variable_length_len(value: u32) -> usize {
    if value < 128 {
        1
    } else if value < 16_384 {
        2
    } else if value < 2_097_152 {
        3
    } else {
        4
    }
}

pub(crate) fn write_variable_length(buf: &mut BytesMut, value: u32) {
    debug_assert!(value <= MAX_REMAINING_LENGTH);
    let mut encoded = value;
    loop {
        let mut byte = (encoded & 0x7F) as u8;
        encoded >>= 7;
        if encoded > 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if encoded == 0 {
            return;
        }
    }
}

/// Rejects strings the wire format cannot carry: longer than 65,535 bytes or
/// containing U+0000. Unpaired surrogates cannot occur in a Rust `str`.
pub(crate) fn validate_string(s: &str) -> Result<(), CodecError> {
    if s.len() > u16::MAX as usize {
        return Err(CodecError::StringTooLong { length: s.len() });
    }
    if s.contains('\u{0000}') {
        return Err(CodecError::ProhibitedCodePoint);
    }
    Ok(())
}

pub(crate) fn read_string(buf: &mut Bytes) -> Result<String, CodecError> {
    let len = read_u16(buf)? as usize;
    if buf.remaining() < len {
        return Err(CodecError::Truncated);
    }
    let raw = buf.split_to(len);
    let s = core::str::from_utf8(&raw).map_err(|_| CodecError::InvalidUtf8)?;
    if s.contains('\u{0000}') {
        return Err(CodecError::ProhibitedCodePoint);
    }
    Ok(s.to_owned())
}

pub(crate) fn write_string(buf: &mut BytesMut, s: &str) -> Result<(), CodecError> {
    validate_string(s)?;
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
    Ok(())
}

pub(crate) fn read_binary(buf: &mut Bytes) -> Result<Bytes, CodecError> {
    let len = read_u16(buf)? as usize;
    if buf.remaining() < len {
        return Err(CodecError::Truncated);
    }
    Ok(buf.split_to(len))
}

pub(crate) fn write_binary(buf: &mut BytesMut, data: &[u8]) -> Result<(), CodecError> {
    if data.len() > u16::MAX as usize {
        return Err(CodecError::StringTooLong { length: data.len() });
    }
    buf.put_u16(data.len() as u16);
    buf.put_slice(data);
    Ok(())
}

/// Reads a packet identifier at the session's configured width and rejects
/// the reserved value zero.
pub(crate) fn read_packet_id(buf: &mut Bytes, width: IdWidth) -> Result<u32, CodecError> {
    let id = match width {
        IdWidth::Sixteen => read_u16(buf)? as u32,
        IdWidth::ThirtyTwo => read_u32(buf)?,
    };
    if id == 0 {
        return Err(CodecError::ZeroPacketId);
    }
    Ok(id)
}

pub(crate) fn write_packet_id(
    buf: &mut BytesMut,
    id: u32,
    width: IdWidth,
) -> Result<(), CodecError> {
    if id == 0 || id > width.max_id() {
        return Err(CodecError::PacketIdOutOfRange { id });
    }
    match width {
        IdWidth::Sixteen => buf.put_u16(id as u16),
        IdWidth::ThirtyTwo => buf.put_u32(id),
    }
    Ok(())
}

/// Outbound packet assembly buffer.
///
/// Five bytes are reserved in front of the payload (one for the fixed header,
/// up to four for the remaining-length integer). `finalize` writes the fixed
/// header immediately before the payload and hands back one contiguous
/// buffer, so the whole packet goes out in a single write and a cached
/// in-flight image can later be retransmitted by flipping the DUP bit of
/// byte zero in place.
pub(crate) struct SendBuffer {
    buf: BytesMut,
}

const HEADER_RESERVE: usize = 5;

impl SendBuffer {
    pub(crate) fn new() -> Self {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_bytes(0, HEADER_RESERVE);
        SendBuffer { buf }
    }

    pub(crate) fn with_capacity(payload_hint: usize) -> Self {
        let mut buf = BytesMut::with_capacity(HEADER_RESERVE + payload_hint);
        buf.put_bytes(0, HEADER_RESERVE);
        SendBuffer { buf }
    }

    pub(crate) fn buf(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Stamps the fixed header and remaining length in front of the payload
    /// and returns the finished packet.
    pub(crate) fn finalize(mut self, fixed_header: u8) -> Result<BytesMut, CodecError> {
        let remaining = (self.buf.len() - HEADER_RESERVE) as u64;
        if remaining > MAX_REMAINING_LENGTH as u64 {
            return Err(CodecError::PacketTooLarge {
                size: remaining.min(u32::MAX as u64) as u32,
                limit: MAX_REMAINING_LENGTH,
            });
        }
        let remaining = remaining as u32;

        let mut length = BytesMut::with_capacity(4);
        write_variable_length(&mut length, remaining);

        let start = HEADER_RESERVE - 1 - length.len();
        self.buf[start] = fixed_header;
        self.buf[start + 1..start + 1 + length.len()].copy_from_slice(&length);
        Ok(self.buf.split_off(start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_vli(value: u32, expected_len: usize) {
        let mut buf = BytesMut::new();
        write_variable_length(&mut buf, value);
        assert_eq!(buf.len(), expected_len);
        assert_eq!(variable_length_len(value), expected_len);
        let mut bytes = buf.freeze();
        assert_eq!(read_variable_length(&mut bytes), Ok(value));
        assert!(bytes.is_empty());
    }

    #[test]
    fn variable_length_boundaries() {
        roundtrip_vli(0, 1);
        roundtrip_vli(127, 1);
        roundtrip_vli(128, 2);
        roundtrip_vli(16_383, 2);
        roundtrip_vli(16_384, 3);
        roundtrip_vli(2_097_151, 3);
        roundtrip_vli(2_097_152, 4);
        roundtrip_vli(MAX_REMAINING_LENGTH, 4);
    }

    #[test]
    fn five_byte_variable_length_rejected() {
        let mut bytes = Bytes::from_static(&[0xFF, 0xFF, 0xFF, 0xFF, 0x7F]);
        assert_eq!(
            read_variable_length(&mut bytes),
            Err(CodecError::MalformedRemainingLength)
        );
    }

    #[test]
    fn variable_length_overflow_rejected() {
        // 0xFF 0xFF 0xFF 0x80 would encode a value above the cap.
        let mut bytes = Bytes::from_static(&[0xFF, 0xFF, 0xFF, 0x80]);
        assert_eq!(
            read_variable_length(&mut bytes),
            Err(CodecError::MalformedRemainingLength)
        );
    }

    #[test]
    fn string_roundtrip() {
        let mut buf = BytesMut::new();
        write_string(&mut buf, "sensors/temp").unwrap();
        let mut bytes = buf.freeze();
        assert_eq!(read_string(&mut bytes).unwrap(), "sensors/temp");
    }

    #[test]
    fn string_with_null_rejected() {
        let mut buf = BytesMut::new();
        assert_eq!(
            write_string(&mut buf, "a\u{0000}b"),
            Err(CodecError::ProhibitedCodePoint)
        );

        let mut bytes = Bytes::from_static(&[0x00, 0x01, 0x00]);
        assert_eq!(read_string(&mut bytes), Err(CodecError::ProhibitedCodePoint));
    }

    #[test]
    fn oversized_string_rejected() {
        let long = "x".repeat(65_536);
        let mut buf = BytesMut::new();
        assert_eq!(
            write_string(&mut buf, &long),
            Err(CodecError::StringTooLong { length: 65_536 })
        );
    }

    #[test]
    fn truncated_string_rejected() {
        let mut bytes = Bytes::from_static(&[0x00, 0x05, b'a', b'b']);
        assert_eq!(read_string(&mut bytes), Err(CodecError::Truncated));
    }

    #[test]
    fn packet_id_zero_rejected() {
        let mut bytes = Bytes::from_static(&[0x00, 0x00]);
        assert_eq!(
            read_packet_id(&mut bytes, IdWidth::Sixteen),
            Err(CodecError::ZeroPacketId)
        );
    }

    #[test]
    fn packet_id_width_enforced_on_encode() {
        let mut buf = BytesMut::new();
        assert_eq!(
            write_packet_id(&mut buf, 0x1_0000, IdWidth::Sixteen),
            Err(CodecError::PacketIdOutOfRange { id: 0x1_0000 })
        );
        assert!(write_packet_id(&mut buf, 0x1_0000, IdWidth::ThirtyTwo).is_ok());
    }

    #[test]
    fn send_buffer_prefixes_header_and_length() {
        let mut sb = SendBuffer::new();
        sb.buf().put_slice(b"hello");
        let out = sb.finalize(0x30).unwrap();
        assert_eq!(&out[..], &[0x30, 0x05, b'h', b'e', b'l', b'l', b'o']);
    }

    #[test]
    fn send_buffer_handles_multi_byte_length() {
        let mut sb = SendBuffer::with_capacity(200);
        sb.buf().put_bytes(0xAB, 200);
        let out = sb.finalize(0x30).unwrap();
        assert_eq!(out[0], 0x30);
        assert_eq!(&out[1..3], &[0xC8, 0x01]);
        assert_eq!(out.len(), 3 + 200);
    }
}
