use bytes::{BufMut, Bytes, BytesMut};

use crate::error::CodecError;
use crate::protocol::codec::{self, SendBuffer};
use crate::protocol::packets::expect_empty;
use crate::protocol::properties::{self, Property};
use crate::protocol::{Codec, PacketType, Protocol};

#[derive(Debug, Clone, PartialEq)]
pub struct ConnAck {
    pub session_present: bool,
    /// Connect return code (v3.1.1) or connect reason code (v5). Zero means
    /// accepted in both revisions.
    pub code: u8,
    pub properties: Vec<Property>,
}

impl ConnAck {
    pub fn accepted(session_present: bool) -> Self {
        ConnAck {
            session_present,
            code: 0,
            properties: Vec::new(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.code == 0
    }

    pub(crate) fn decode_body(mut body: Bytes, ctx: Codec) -> Result<Self, CodecError> {
        let ack_flags = codec::read_u8(&mut body)?;
        if ack_flags & 0b1111_1110 != 0 {
            return Err(CodecError::InvalidFlags {
                packet_type: PacketType::ConnAck,
                flags: ack_flags,
            });
        }
        let code = codec::read_u8(&mut body)?;
        let properties = if ctx.version == Protocol::V5 {
            properties::decode_block(&mut body)?
        } else {
            Vec::new()
        };
        expect_empty(&body)?;
        Ok(ConnAck {
            session_present: ack_flags & 0x01 != 0,
            code,
            properties,
        })
    }

    pub(crate) fn encode(&self, ctx: Codec) -> Result<BytesMut, CodecError> {
        let mut sb = SendBuffer::new();
        sb.buf().put_u8(self.session_present as u8);
        sb.buf().put_u8(self.code);
        if ctx.version == Protocol::V5 {
            properties::encode_block(sb.buf(), &self.properties)?;
        }
        sb.finalize(PacketType::ConnAck.header_byte())
    }
}
