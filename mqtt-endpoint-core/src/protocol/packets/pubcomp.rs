use bytes::{Bytes, BytesMut};

use crate::error::CodecError;
use crate::protocol::packets::{decode_ack_body, encode_ack};
use crate::protocol::properties::Property;
use crate::protocol::reason_code::ReasonCode;
use crate::protocol::{Codec, PacketType};

/// Assured delivery part 3: terminates the QoS 2 handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct PubComp {
    pub packet_id: u32,
    pub reason: ReasonCode,
    pub properties: Vec<Property>,
}

impl PubComp {
    pub fn new(packet_id: u32) -> Self {
        PubComp {
            packet_id,
            reason: ReasonCode::SUCCESS,
            properties: Vec::new(),
        }
    }

    pub(crate) fn decode_body(body: Bytes, ctx: Codec) -> Result<Self, CodecError> {
        let (packet_id, reason, properties) = decode_ack_body(body, ctx)?;
        Ok(PubComp {
            packet_id,
            reason,
            properties,
        })
    }

    pub(crate) fn encode(&self, ctx: Codec) -> Result<BytesMut, CodecError> {
        encode_ack(
            PacketType::PubComp.header_byte(),
            self.packet_id,
            self.reason,
            &self.properties,
            ctx,
        )
    }
}
