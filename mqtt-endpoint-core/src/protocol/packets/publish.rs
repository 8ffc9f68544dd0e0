use bytes::{BufMut, Bytes, BytesMut};

use crate::error::CodecError;
use crate::protocol::codec::{self, SendBuffer};
use crate::protocol::properties::{self, Property};
use crate::protocol::qos::QoS;
use crate::protocol::{Codec, PacketType, Protocol};

#[derive(Debug, Clone, PartialEq)]
pub struct Publish {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
    /// Present exactly when `qos > 0`.
    pub packet_id: Option<u32>,
    pub properties: Vec<Property>,
}

impl Publish {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, qos: QoS) -> Self {
        Publish {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain: false,
            dup: false,
            packet_id: None,
            properties: Vec::new(),
        }
    }

    pub(crate) fn flags_nibble(&self) -> u8 {
        let dup = if self.dup { 1u8 } else { 0u8 };
        let retain = if self.retain { 1u8 } else { 0u8 };
        (dup << 3) | ((self.qos as u8) << 1) | retain
    }

    pub(crate) fn header_byte(&self) -> u8 {
        ((PacketType::Publish as u8) << 4) | (self.flags_nibble() & 0x0F)
    }

    pub(crate) fn decode_body(flags: u8, mut body: Bytes, ctx: Codec) -> Result<Self, CodecError> {
        let qos = QoS::try_from((flags >> 1) & 0b11)?;
        let dup = flags & 0b1000 != 0;
        let retain = flags & 0b0001 != 0;
        if dup && qos == QoS::AtMostOnce {
            return Err(CodecError::InvalidFlags {
                packet_type: PacketType::Publish,
                flags,
            });
        }

        let topic = codec::read_string(&mut body)?;
        let packet_id = if qos.needs_packet_id() {
            Some(codec::read_packet_id(&mut body, ctx.id_width)?)
        } else {
            None
        };
        let properties = if ctx.version == Protocol::V5 {
            properties::decode_block(&mut body)?
        } else {
            Vec::new()
        };

        Ok(Publish {
            topic,
            payload: body,
            qos,
            retain,
            dup,
            packet_id,
            properties,
        })
    }

    pub(crate) fn encode(&self, ctx: Codec) -> Result<BytesMut, CodecError> {
        if self.dup && self.qos == QoS::AtMostOnce {
            return Err(CodecError::InvalidFlags {
                packet_type: PacketType::Publish,
                flags: self.flags_nibble(),
            });
        }

        let mut sb = SendBuffer::with_capacity(2 + self.topic.len() + 4 + self.payload.len());
        codec::write_string(sb.buf(), &self.topic)?;
        if self.qos.needs_packet_id() {
            let id = self.packet_id.ok_or(CodecError::MissingPacketId)?;
            codec::write_packet_id(sb.buf(), id, ctx.id_width)?;
        }
        if ctx.version == Protocol::V5 {
            properties::encode_block(sb.buf(), &self.properties)?;
        }
        sb.buf().put_slice(&self.payload);
        sb.finalize(self.header_byte())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet_id::IdWidth;
    use crate::protocol::packets::Packet;

    fn roundtrip(bytes: &[u8], ctx: Codec) -> Publish {
        let mut wire = Bytes::copy_from_slice(bytes);
        let packet = Packet::from_bytes(&mut wire, ctx).unwrap();
        assert!(wire.is_empty());
        let encoded = packet.encode(ctx).unwrap();
        assert_eq!(&encoded[..], bytes, "re-encoding is not canonical");
        match packet {
            Packet::Publish(p) => p,
            other => panic!("expected PUBLISH, got {:?}", other),
        }
    }

    #[test]
    fn qos0_minimal() {
        let publish = roundtrip(&[0x30, 0x03, 0x00, 0x01, b'a'], Codec::v311());
        assert_eq!(publish.topic, "a");
        assert_eq!(publish.qos, QoS::AtMostOnce);
        assert_eq!(publish.packet_id, None);
        assert!(publish.payload.is_empty());
    }

    #[test]
    fn qos0_with_payload() {
        let publish = roundtrip(
            &[
                0x30, 0x12, 0x00, 0x0B, b's', b'e', b'n', b's', b'o', b'r', b'/', b't', b'e',
                b'm', b'p', b'h', b'e', b'l', b'l', b'o',
            ],
            Codec::v311(),
        );
        assert_eq!(publish.topic, "sensor/temp");
        assert_eq!(&publish.payload[..], b"hello");
    }

    #[test]
    fn qos1_carries_packet_id() {
        let publish = roundtrip(
            &[0x32, 0x14, 0x00, 0x0C, b's', b'e', b'n', b's', b'o', b'r', b's', b'/', b't',
              b'e', b'm', b'p', 0x00, 0x0A, b'2', b'2', b'.', b'5'],
            Codec::v311(),
        );
        assert_eq!(publish.qos, QoS::AtLeastOnce);
        assert_eq!(publish.packet_id, Some(0x000A));
        assert_eq!(&publish.payload[..], b"22.5");
    }

    #[test]
    fn qos2_retain_dup_flags() {
        let publish = roundtrip(
            &[0x3D, 0x07, 0x00, 0x01, b't', 0x12, 0x34, b'h', b'i'],
            Codec::v311(),
        );
        assert_eq!(publish.qos, QoS::ExactlyOnce);
        assert!(publish.dup);
        assert!(publish.retain);
        assert_eq!(publish.packet_id, Some(0x1234));
    }

    #[test]
    fn dup_with_qos0_rejected() {
        let mut wire = Bytes::from_static(&[0x38, 0x03, 0x00, 0x01, b'a']);
        assert!(matches!(
            Packet::from_bytes(&mut wire, Codec::v311()),
            Err(CodecError::InvalidFlags { .. })
        ));
    }

    #[test]
    fn qos3_rejected() {
        let mut wire = Bytes::from_static(&[0x36, 0x05, 0x00, 0x01, b'a', 0x00, 0x01]);
        assert_eq!(
            Packet::from_bytes(&mut wire, Codec::v311()),
            Err(CodecError::InvalidQos { level: 3 })
        );
    }

    #[test]
    fn zero_packet_id_rejected() {
        let mut wire = Bytes::from_static(&[0x32, 0x05, 0x00, 0x01, b'a', 0x00, 0x00]);
        assert_eq!(
            Packet::from_bytes(&mut wire, Codec::v311()),
            Err(CodecError::ZeroPacketId)
        );
    }

    #[test]
    fn missing_packet_id_on_encode() {
        let publish = Publish::new("t", Bytes::new(), QoS::AtLeastOnce);
        assert_eq!(
            publish.encode(Codec::v311()),
            Err(CodecError::MissingPacketId)
        );
    }

    #[test]
    fn v5_publish_with_properties() {
        let bytes: &[u8] = &[
            0x30, 0x0A, 0x00, 0x01, b't', 0x02, 0x01, 0x01, // payload format 1
            b'j', b's', b'o', b'n',
        ];
        let publish = roundtrip(bytes, Codec::v5());
        assert_eq!(publish.properties, vec![Property::PayloadFormatIndicator(1)]);
        assert_eq!(&publish.payload[..], b"json");
    }

    #[test]
    fn wide_packet_id_roundtrip() {
        let ctx = Codec {
            version: Protocol::V311,
            id_width: IdWidth::ThirtyTwo,
        };
        let publish = roundtrip(
            &[0x32, 0x07, 0x00, 0x01, b'a', 0x00, 0x01, 0x00, 0x00],
            ctx,
        );
        assert_eq!(publish.packet_id, Some(0x0001_0000));
    }

    #[test]
    fn payload_sizes_across_length_boundaries() {
        for &size in &[0usize, 127, 128, 16_383, 16_384, 2_097_151, 2_097_152] {
            let publish = Publish::new("t", vec![0xA5u8; size], QoS::AtMostOnce);
            let encoded = publish.encode(Codec::v311()).unwrap();
            let mut wire = encoded.freeze();
            let decoded = match Packet::from_bytes(&mut wire, Codec::v311()).unwrap() {
                Packet::Publish(p) => p,
                other => panic!("expected PUBLISH, got {:?}", other),
            };
            assert_eq!(decoded.payload.len(), size, "payload size {}", size);
            assert_eq!(decoded, publish);
        }
    }
}
