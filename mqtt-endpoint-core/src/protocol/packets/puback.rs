use bytes::{Bytes, BytesMut};

use crate::error::CodecError;
use crate::protocol::packets::{decode_ack_body, encode_ack};
use crate::protocol::properties::Property;
use crate::protocol::reason_code::ReasonCode;
use crate::protocol::{Codec, PacketType};

/// QoS 1 acknowledgement: terminates the handshake opened by a PUBLISH.
#[derive(Debug, Clone, PartialEq)]
pub struct PubAck {
    pub packet_id: u32,
    pub reason: ReasonCode,
    pub properties: Vec<Property>,
}

impl PubAck {
    pub fn new(packet_id: u32) -> Self {
        PubAck {
            packet_id,
            reason: ReasonCode::SUCCESS,
            properties: Vec::new(),
        }
    }

    pub(crate) fn decode_body(body: Bytes, ctx: Codec) -> Result<Self, CodecError> {
        let (packet_id, reason, properties) = decode_ack_body(body, ctx)?;
        Ok(PubAck {
            packet_id,
            reason,
            properties,
        })
    }

    pub(crate) fn encode(&self, ctx: Codec) -> Result<BytesMut, CodecError> {
        encode_ack(
            PacketType::PubAck.header_byte(),
            self.packet_id,
            self.reason,
            &self.properties,
            ctx,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packets::Packet;

    #[test]
    fn v311_roundtrip() {
        let bytes: &[u8] = &[0x40, 0x02, 0x12, 0x34];
        let mut wire = Bytes::from_static(bytes);
        let packet = Packet::from_bytes(&mut wire, Codec::v311()).unwrap();
        assert_eq!(
            packet,
            Packet::PubAck(PubAck::new(0x1234))
        );
        assert_eq!(&packet.encode(Codec::v311()).unwrap()[..], bytes);
    }

    #[test]
    fn v5_success_stays_two_bytes() {
        let bytes = PubAck::new(7).encode(Codec::v5()).unwrap();
        assert_eq!(&bytes[..], &[0x40, 0x02, 0x00, 0x07]);
    }

    #[test]
    fn v5_reason_roundtrip() {
        let puback = PubAck {
            packet_id: 7,
            reason: ReasonCode::NO_MATCHING_SUBSCRIBERS,
            properties: vec![Property::ReasonString("nobody".to_owned())],
        };
        let encoded = Packet::PubAck(puback.clone()).encode(Codec::v5()).unwrap();
        let mut wire = encoded.freeze();
        assert_eq!(
            Packet::from_bytes(&mut wire, Codec::v5()).unwrap(),
            Packet::PubAck(puback)
        );
    }

    #[test]
    fn v311_extra_bytes_rejected() {
        let mut wire = Bytes::from_static(&[0x40, 0x03, 0x00, 0x01, 0x00]);
        assert_eq!(
            Packet::from_bytes(&mut wire, Codec::v311()),
            Err(CodecError::TrailingBytes)
        );
    }
}
