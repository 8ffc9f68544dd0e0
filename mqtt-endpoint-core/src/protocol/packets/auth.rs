use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::CodecError;
use crate::protocol::codec::SendBuffer;
use crate::protocol::packets::expect_empty;
use crate::protocol::properties::{self, Property};
use crate::protocol::reason_code::ReasonCode;
use crate::protocol::{Codec, PacketType};

/// v5 enhanced authentication exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct Auth {
    pub reason: ReasonCode,
    pub properties: Vec<Property>,
}

impl Auth {
    pub(crate) fn decode_body(mut body: Bytes, _ctx: Codec) -> Result<Self, CodecError> {
        if body.is_empty() {
            return Ok(Auth {
                reason: ReasonCode::SUCCESS,
                properties: Vec::new(),
            });
        }
        let reason = ReasonCode(body.get_u8());
        if body.is_empty() {
            return Ok(Auth {
                reason,
                properties: Vec::new(),
            });
        }
        let properties = properties::decode_block(&mut body)?;
        expect_empty(&body)?;
        Ok(Auth { reason, properties })
    }

    pub(crate) fn encode(&self, _ctx: Codec) -> Result<BytesMut, CodecError> {
        let mut sb = SendBuffer::new();
        if self.reason != ReasonCode::SUCCESS || !self.properties.is_empty() {
            sb.buf().put_u8(self.reason.0);
            if !self.properties.is_empty() {
                properties::encode_block(sb.buf(), &self.properties)?;
            }
        }
        sb.finalize(PacketType::Auth.header_byte())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packets::Packet;

    #[test]
    fn continue_authentication_roundtrip() {
        let auth = Auth {
            reason: ReasonCode::CONTINUE_AUTHENTICATION,
            properties: vec![Property::AuthenticationMethod("SCRAM-SHA-1".to_owned())],
        };
        let encoded = Packet::Auth(auth.clone()).encode(Codec::v5()).unwrap();
        let mut wire = encoded.freeze();
        assert_eq!(
            Packet::from_bytes(&mut wire, Codec::v5()).unwrap(),
            Packet::Auth(auth)
        );
    }
}
