use bytes::{BufMut, Bytes, BytesMut};

use crate::error::CodecError;
use crate::protocol::codec::{self, SendBuffer};
use crate::protocol::properties::{self, Property};
use crate::protocol::{Codec, PacketType, Protocol};

/// Subscribe acknowledgement. One code per requested filter, in request
/// order: the granted QoS, or an error code at or above 0x80.
#[derive(Debug, Clone, PartialEq)]
pub struct SubAck {
    pub packet_id: u32,
    pub codes: Vec<u8>,
    pub properties: Vec<Property>,
}

impl SubAck {
    pub fn new(packet_id: u32, codes: Vec<u8>) -> Self {
        SubAck {
            packet_id,
            codes,
            properties: Vec::new(),
        }
    }

    pub(crate) fn decode_body(mut body: Bytes, ctx: Codec) -> Result<Self, CodecError> {
        let packet_id = codec::read_packet_id(&mut body, ctx.id_width)?;
        let properties = if ctx.version == Protocol::V5 {
            properties::decode_block(&mut body)?
        } else {
            Vec::new()
        };
        if body.is_empty() {
            return Err(CodecError::NoEntries);
        }
        let codes = body.to_vec();
        Ok(SubAck {
            packet_id,
            codes,
            properties,
        })
    }

    pub(crate) fn encode(&self, ctx: Codec) -> Result<BytesMut, CodecError> {
        if self.codes.is_empty() {
            return Err(CodecError::NoEntries);
        }
        let mut sb = SendBuffer::new();
        codec::write_packet_id(sb.buf(), self.packet_id, ctx.id_width)?;
        if ctx.version == Protocol::V5 {
            properties::encode_block(sb.buf(), &self.properties)?;
        }
        sb.buf().put_slice(&self.codes);
        sb.finalize(PacketType::SubAck.header_byte())
    }
}
