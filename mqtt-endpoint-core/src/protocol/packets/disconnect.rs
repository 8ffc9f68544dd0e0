use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::CodecError;
use crate::protocol::codec::SendBuffer;
use crate::protocol::packets::expect_empty;
use crate::protocol::properties::{self, Property};
use crate::protocol::reason_code::ReasonCode;
use crate::protocol::{Codec, PacketType, Protocol};

/// Disconnect notification. v3.1.1 bodies are always empty; v5 may carry a
/// reason code and properties, and the shortest legal encoding is emitted
/// for a plain normal disconnection.
#[derive(Debug, Clone, PartialEq)]
pub struct Disconnect {
    pub reason: ReasonCode,
    pub properties: Vec<Property>,
}

impl Disconnect {
    pub fn normal() -> Self {
        Disconnect {
            reason: ReasonCode::NORMAL_DISCONNECTION,
            properties: Vec::new(),
        }
    }

    pub fn with_reason(reason: ReasonCode) -> Self {
        Disconnect {
            reason,
            properties: Vec::new(),
        }
    }

    pub(crate) fn decode_body(mut body: Bytes, ctx: Codec) -> Result<Self, CodecError> {
        if ctx.version == Protocol::V311 {
            expect_empty(&body)?;
            return Ok(Disconnect::normal());
        }
        if body.is_empty() {
            return Ok(Disconnect::normal());
        }
        let reason = ReasonCode(body.get_u8());
        if body.is_empty() {
            return Ok(Disconnect {
                reason,
                properties: Vec::new(),
            });
        }
        let properties = properties::decode_block(&mut body)?;
        expect_empty(&body)?;
        Ok(Disconnect { reason, properties })
    }

    pub(crate) fn encode(&self, ctx: Codec) -> Result<BytesMut, CodecError> {
        let mut sb = SendBuffer::new();
        if ctx.version == Protocol::V5
            && (self.reason != ReasonCode::NORMAL_DISCONNECTION || !self.properties.is_empty())
        {
            sb.buf().put_u8(self.reason.0);
            if !self.properties.is_empty() {
                properties::encode_block(sb.buf(), &self.properties)?;
            }
        }
        sb.finalize(PacketType::Disconnect.header_byte())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packets::Packet;

    #[test]
    fn v311_is_empty() {
        let bytes: &[u8] = &[0xE0, 0x00];
        let mut wire = Bytes::from_static(bytes);
        let packet = Packet::from_bytes(&mut wire, Codec::v311()).unwrap();
        assert_eq!(packet, Packet::Disconnect(Disconnect::normal()));
        assert_eq!(&packet.encode(Codec::v311()).unwrap()[..], bytes);
    }

    #[test]
    fn v311_with_body_rejected() {
        let mut wire = Bytes::from_static(&[0xE0, 0x01, 0x00]);
        assert_eq!(
            Packet::from_bytes(&mut wire, Codec::v311()),
            Err(CodecError::TrailingBytes)
        );
    }

    #[test]
    fn v5_reason_roundtrip() {
        let disconnect = Disconnect::with_reason(ReasonCode::DISCONNECT_WITH_WILL);
        let encoded = Packet::Disconnect(disconnect.clone())
            .encode(Codec::v5())
            .unwrap();
        assert_eq!(&encoded[..], &[0xE0, 0x01, 0x04]);
        let mut wire = encoded.freeze();
        assert_eq!(
            Packet::from_bytes(&mut wire, Codec::v5()).unwrap(),
            Packet::Disconnect(disconnect)
        );
    }

    #[test]
    fn v5_empty_body_means_normal() {
        let mut wire = Bytes::from_static(&[0xE0, 0x00]);
        assert_eq!(
            Packet::from_bytes(&mut wire, Codec::v5()).unwrap(),
            Packet::Disconnect(Disconnect::normal())
        );
    }
}
