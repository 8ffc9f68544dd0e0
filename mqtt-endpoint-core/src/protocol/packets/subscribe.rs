use bytes::{BufMut, Bytes, BytesMut};

use crate::error::CodecError;
use crate::protocol::codec::{self, SendBuffer};
use crate::protocol::properties::{self, Property};
use crate::protocol::{Codec, PacketType, Protocol};
use crate::subscription::SubscribeOptions;

#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeEntry {
    pub filter: String,
    pub options: SubscribeOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subscribe {
    pub packet_id: u32,
    pub entries: Vec<SubscribeEntry>,
    pub properties: Vec<Property>,
}

impl Subscribe {
    pub(crate) fn decode_body(mut body: Bytes, ctx: Codec) -> Result<Self, CodecError> {
        let packet_id = codec::read_packet_id(&mut body, ctx.id_width)?;
        let properties = if ctx.version == Protocol::V5 {
            properties::decode_block(&mut body)?
        } else {
            Vec::new()
        };

        let mut entries = Vec::new();
        while !body.is_empty() {
            let filter = codec::read_string(&mut body)?;
            let options = SubscribeOptions::from_byte(codec::read_u8(&mut body)?, ctx.version)?;
            entries.push(SubscribeEntry { filter, options });
        }
        if entries.is_empty() {
            return Err(CodecError::NoEntries);
        }

        Ok(Subscribe {
            packet_id,
            entries,
            properties,
        })
    }

    pub(crate) fn encode(&self, ctx: Codec) -> Result<BytesMut, CodecError> {
        if self.entries.is_empty() {
            return Err(CodecError::NoEntries);
        }
        let mut sb = SendBuffer::new();
        codec::write_packet_id(sb.buf(), self.packet_id, ctx.id_width)?;
        if ctx.version == Protocol::V5 {
            properties::encode_block(sb.buf(), &self.properties)?;
        }
        for entry in &self.entries {
            codec::write_string(sb.buf(), &entry.filter)?;
            sb.buf().put_u8(entry.options.to_byte(ctx.version));
        }
        sb.finalize(PacketType::Subscribe.header_byte())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::packets::Packet;
    use crate::protocol::QoS;
    use crate::subscription::RetainHandling;

    fn roundtrip(bytes: &'static [u8], ctx: Codec) -> Subscribe {
        let mut wire = Bytes::from_static(bytes);
        let packet = Packet::from_bytes(&mut wire, ctx).unwrap();
        assert_eq!(&packet.encode(ctx).unwrap()[..], bytes);
        match packet {
            Packet::Subscribe(s) => s,
            other => panic!("expected SUBSCRIBE, got {:?}", other),
        }
    }

    #[test]
    fn v311_single_entry() {
        let subscribe = roundtrip(
            &[0x82, 0x0B, 0x00, 0x01, 0x00, 0x06, b't', b'o', b'p', b'i', b'c', b'1', 0x00],
            Codec::v311(),
        );
        assert_eq!(subscribe.packet_id, 1);
        assert_eq!(subscribe.entries.len(), 1);
        assert_eq!(subscribe.entries[0].filter, "topic1");
        assert_eq!(subscribe.entries[0].options.qos, QoS::AtMostOnce);
    }

    #[test]
    fn v311_multiple_entries() {
        let subscribe = roundtrip(
            &[
                0x82, 0x0E, 0x00, 0x02, 0x00, 0x03, b'a', b'/', b'b', 0x01, 0x00, 0x03,
                b'c', b'/', b'd', 0x02,
            ],
            Codec::v311(),
        );
        assert_eq!(subscribe.entries.len(), 2);
        assert_eq!(subscribe.entries[0].options.qos, QoS::AtLeastOnce);
        assert_eq!(subscribe.entries[1].options.qos, QoS::ExactlyOnce);
    }

    #[test]
    fn v311_reserved_option_bits_rejected() {
        let mut wire =
            Bytes::from_static(&[0x82, 0x08, 0x00, 0x01, 0x00, 0x03, b'a', b'/', b'b', 0x04]);
        assert!(matches!(
            Packet::from_bytes(&mut wire, Codec::v311()),
            Err(CodecError::InvalidFlags { .. })
        ));
    }

    #[test]
    fn v5_full_options() {
        let subscribe = roundtrip(
            &[
                0x82, 0x09, 0x00, 0x01, 0x00, // empty properties
                0x00, 0x03, b'a', b'/', b'b', 0b0001_1110,
            ],
            Codec::v5(),
        );
        let options = subscribe.entries[0].options;
        assert_eq!(options.qos, QoS::ExactlyOnce);
        assert!(options.no_local);
        assert!(options.retain_as_published);
        assert_eq!(options.retain_handling, RetainHandling::SendIfNew);
    }

    #[test]
    fn empty_subscribe_rejected() {
        let mut wire = Bytes::from_static(&[0x82, 0x02, 0x00, 0x01]);
        assert_eq!(
            Packet::from_bytes(&mut wire, Codec::v311()),
            Err(CodecError::NoEntries)
        );
    }
}
