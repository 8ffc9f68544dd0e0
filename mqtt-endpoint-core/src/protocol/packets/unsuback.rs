use bytes::{BufMut, Bytes, BytesMut};

use crate::error::CodecError;
use crate::protocol::codec::{self, SendBuffer};
use crate::protocol::packets::expect_empty;
use crate::protocol::properties::{self, Property};
use crate::protocol::{Codec, PacketType, Protocol};

/// Unsubscribe acknowledgement. v3.1.1 carries only the packet identifier;
/// v5 adds one reason code per requested filter.
#[derive(Debug, Clone, PartialEq)]
pub struct UnsubAck {
    pub packet_id: u32,
    pub codes: Vec<u8>,
    pub properties: Vec<Property>,
}

impl UnsubAck {
    pub fn new(packet_id: u32) -> Self {
        UnsubAck {
            packet_id,
            codes: Vec::new(),
            properties: Vec::new(),
        }
    }

    pub(crate) fn decode_body(mut body: Bytes, ctx: Codec) -> Result<Self, CodecError> {
        let packet_id = codec::read_packet_id(&mut body, ctx.id_width)?;
        if ctx.version == Protocol::V311 {
            expect_empty(&body)?;
            return Ok(UnsubAck::new(packet_id));
        }
        let properties = properties::decode_block(&mut body)?;
        let codes = body.to_vec();
        Ok(UnsubAck {
            packet_id,
            codes,
            properties,
        })
    }

    pub(crate) fn encode(&self, ctx: Codec) -> Result<BytesMut, CodecError> {
        let mut sb = SendBuffer::new();
        codec::write_packet_id(sb.buf(), self.packet_id, ctx.id_width)?;
        if ctx.version == Protocol::V5 {
            properties::encode_block(sb.buf(), &self.properties)?;
            sb.buf().put_slice(&self.codes);
        }
        sb.finalize(PacketType::UnsubAck.header_byte())
    }
}
