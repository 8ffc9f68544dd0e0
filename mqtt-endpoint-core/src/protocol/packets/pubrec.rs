use bytes::{Bytes, BytesMut};

use crate::error::CodecError;
use crate::protocol::packets::{decode_ack_body, encode_ack};
use crate::protocol::properties::Property;
use crate::protocol::reason_code::ReasonCode;
use crate::protocol::{Codec, PacketType};

/// Assured delivery part 1: the receiver has taken responsibility for a
/// QoS 2 PUBLISH.
#[derive(Debug, Clone, PartialEq)]
pub struct PubRec {
    pub packet_id: u32,
    pub reason: ReasonCode,
    pub properties: Vec<Property>,
}

impl PubRec {
    pub fn new(packet_id: u32) -> Self {
        PubRec {
            packet_id,
            reason: ReasonCode::SUCCESS,
            properties: Vec::new(),
        }
    }

    pub(crate) fn decode_body(body: Bytes, ctx: Codec) -> Result<Self, CodecError> {
        let (packet_id, reason, properties) = decode_ack_body(body, ctx)?;
        Ok(PubRec {
            packet_id,
            reason,
            properties,
        })
    }

    pub(crate) fn encode(&self, ctx: Codec) -> Result<BytesMut, CodecError> {
        encode_ack(
            PacketType::PubRec.header_byte(),
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
        let bytes: &[u8] = &[0x50, 0x02, 0x00, 0x07];
        let mut wire = Bytes::from_static(bytes);
        let packet = Packet::from_bytes(&mut wire, Codec::v311()).unwrap();
        assert_eq!(packet, Packet::PubRec(PubRec::new(7)));
        assert_eq!(&packet.encode(Codec::v311()).unwrap()[..], bytes);
    }
}
