use bytes::{Bytes, BytesMut};

use crate::error::CodecError;
use crate::protocol::codec::{self, SendBuffer};
use crate::protocol::properties::{self, Property};
use crate::protocol::{Codec, PacketType, Protocol};

#[derive(Debug, Clone, PartialEq)]
pub struct Unsubscribe {
    pub packet_id: u32,
    pub filters: Vec<String>,
    pub properties: Vec<Property>,
}

impl Unsubscribe {
    pub(crate) fn decode_body(mut body: Bytes, ctx: Codec) -> Result<Self, CodecError> {
        let packet_id = codec::read_packet_id(&mut body, ctx.id_width)?;
        let properties = if ctx.version == Protocol::V5 {
            properties::decode_block(&mut body)?
        } else {
            Vec::new()
        };

        let mut filters = Vec::new();
        while !body.is_empty() {
            filters.push(codec::read_string(&mut body)?);
        }
        if filters.is_empty() {
            return Err(CodecError::NoEntries);
        }

        Ok(Unsubscribe {
            packet_id,
            filters,
            properties,
        })
    }

    pub(crate) fn encode(&self, ctx: Codec) -> Result<BytesMut, CodecError> {
        if self.filters.is_empty() {
            return Err(CodecError::NoEntries);
        }
        let mut sb = SendBuffer::new();
        codec::write_packet_id(sb.buf(), self.packet_id, ctx.id_width)?;
        if ctx.version == Protocol::V5 {
            properties::encode_block(sb.buf(), &self.properties)?;
        }
        for filter in &self.filters {
            codec::write_string(sb.buf(), filter)?;
        }
        sb.finalize(PacketType::Unsubscribe.header_byte())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packets::Packet;

    #[test]
    fn v311_roundtrip() {
        let bytes: &[u8] = &[
            0xA2, 0x0C, 0x00, 0x05, 0x00, 0x03, b'a', b'/', b'b', 0x00, 0x03, b'c', b'/',
            b'd',
        ];
        let mut wire = Bytes::from_static(bytes);
        let packet = Packet::from_bytes(&mut wire, Codec::v311()).unwrap();
        match &packet {
            Packet::Unsubscribe(u) => {
                assert_eq!(u.packet_id, 5);
                assert_eq!(u.filters, vec!["a/b".to_owned(), "c/d".to_owned()]);
            }
            other => panic!("expected UNSUBSCRIBE, got {:?}", other),
        }
        assert_eq!(&packet.encode(Codec::v311()).unwrap()[..], bytes);
    }

    #[test]
    fn fixed_flags_must_be_0010() {
        let mut wire = Bytes::from_static(&[0xA0, 0x07, 0x00, 0x05, 0x00, 0x03, b'a', b'/', b'b']);
        assert!(matches!(
            Packet::from_bytes(&mut wire, Codec::v311()),
            Err(CodecError::InvalidFlags { .. })
        ));
    }
}
