mod auth;
mod connack;
mod connect;
mod disconnect;
mod puback;
mod pubcomp;
mod publish;
mod pubrec;
mod pubrel;
mod suback;
mod subscribe;
mod unsuback;
mod unsubscribe;

pub use auth::Auth;
pub use connack::ConnAck;
pub use connect::{Connect, Will};
pub use disconnect::Disconnect;
pub use puback::PubAck;
pub use pubcomp::PubComp;
pub use publish::Publish;
pub use pubrec::PubRec;
pub use pubrel::PubRel;
pub use suback::SubAck;
pub use subscribe::{Subscribe, SubscribeEntry};
pub use unsuback::UnsubAck;
pub use unsubscribe::Unsubscribe;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::CodecError;
use crate::protocol::codec::{self, SendBuffer};
use crate::protocol::properties::{self, Property};
use crate::protocol::reason_code::ReasonCode;
use crate::protocol::{Codec, PacketType, Protocol};

/// One decoded MQTT control packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Connect(Connect),
    ConnAck(ConnAck),
    Publish(Publish),
    PubAck(PubAck),
    PubRec(PubRec),
    PubRel(PubRel),
    PubComp(PubComp),
    Subscribe(Subscribe),
    SubAck(SubAck),
    Unsubscribe(Unsubscribe),
    UnsubAck(UnsubAck),
    PingReq,
    PingResp,
    Disconnect(Disconnect),
    Auth(Auth),
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect(_) => PacketType::Connect,
            Packet::ConnAck(_) => PacketType::ConnAck,
            Packet::Publish(_) => PacketType::Publish,
            Packet::PubAck(_) => PacketType::PubAck,
            Packet::PubRec(_) => PacketType::PubRec,
            Packet::PubRel(_) => PacketType::PubRel,
            Packet::PubComp(_) => PacketType::PubComp,
            Packet::Subscribe(_) => PacketType::Subscribe,
            Packet::SubAck(_) => PacketType::SubAck,
            Packet::Unsubscribe(_) => PacketType::Unsubscribe,
            Packet::UnsubAck(_) => PacketType::UnsubAck,
            Packet::PingReq => PacketType::PingReq,
            Packet::PingResp => PacketType::PingResp,
            Packet::Disconnect(_) => PacketType::Disconnect,
            Packet::Auth(_) => PacketType::Auth,
        }
    }

    /// Decodes a packet from its fixed-header byte and variable part, as
    /// produced by the frame reader.
    pub fn decode(header: u8, body: Bytes, ctx: Codec) -> Result<Self, CodecError> {
        let packet_type =
            PacketType::from_header(header).ok_or(CodecError::InvalidPacketType {
                packet_type: header,
            })?;
        packet_type.validate_flags(header)?;

        let packet = match packet_type {
            PacketType::Connect => Packet::Connect(Connect::decode_body(body, ctx)?),
            PacketType::ConnAck => Packet::ConnAck(ConnAck::decode_body(body, ctx)?),
            PacketType::Publish => {
                Packet::Publish(Publish::decode_body(header & 0x0F, body, ctx)?)
            }
            PacketType::PubAck => Packet::PubAck(PubAck::decode_body(body, ctx)?),
            PacketType::PubRec => Packet::PubRec(PubRec::decode_body(body, ctx)?),
            PacketType::PubRel => Packet::PubRel(PubRel::decode_body(body, ctx)?),
            PacketType::PubComp => Packet::PubComp(PubComp::decode_body(body, ctx)?),
            PacketType::Subscribe => {
                Packet::Subscribe(Subscribe::decode_body(body, ctx)?)
            }
            PacketType::SubAck => Packet::SubAck(SubAck::decode_body(body, ctx)?),
            PacketType::Unsubscribe => {
                Packet::Unsubscribe(Unsubscribe::decode_body(body, ctx)?)
            }
            PacketType::UnsubAck => Packet::UnsubAck(UnsubAck::decode_body(body, ctx)?),
            PacketType::PingReq => {
                expect_empty(&body)?;
                Packet::PingReq
            }
            PacketType::PingResp => {
                expect_empty(&body)?;
                Packet::PingResp
            }
            PacketType::Disconnect => {
                Packet::Disconnect(Disconnect::decode_body(body, ctx)?)
            }
            PacketType::Auth => {
                if ctx.version == Protocol::V311 {
                    return Err(CodecError::InvalidPacketType {
                        packet_type: header,
                    });
                }
                Packet::Auth(Auth::decode_body(body, ctx)?)
            }
        };
        Ok(packet)
    }

    /// Encodes the whole packet, fixed header included, into one contiguous
    /// buffer.
    pub fn encode(&self, ctx: Codec) -> Result<BytesMut, CodecError> {
        match self {
            Packet::Connect(p) => p.encode(ctx),
            Packet::ConnAck(p) => p.encode(ctx),
            Packet::Publish(p) => p.encode(ctx),
            Packet::PubAck(p) => p.encode(ctx),
            Packet::PubRec(p) => p.encode(ctx),
            Packet::PubRel(p) => p.encode(ctx),
            Packet::PubComp(p) => p.encode(ctx),
            Packet::Subscribe(p) => p.encode(ctx),
            Packet::SubAck(p) => p.encode(ctx),
            Packet::Unsubscribe(p) => p.encode(ctx),
            Packet::UnsubAck(p) => p.encode(ctx),
            Packet::PingReq => SendBuffer::new().finalize(PacketType::PingReq.header_byte()),
            Packet::PingResp => {
                SendBuffer::new().finalize(PacketType::PingResp.header_byte())
            }
            Packet::Disconnect(p) => p.encode(ctx),
            Packet::Auth(p) => p.encode(ctx),
        }
    }

    /// Parses one complete packet from the front of `buf`. Mostly useful in
    /// tests and adapters; the endpoint itself goes through the frame
    /// reader.
    pub fn from_bytes(buf: &mut Bytes, ctx: Codec) -> Result<Self, CodecError> {
        let header = codec::read_u8(buf)?;
        let remaining = codec::read_variable_length(buf)? as usize;
        if buf.remaining() < remaining {
            return Err(CodecError::Truncated);
        }
        let body = buf.split_to(remaining);
        Packet::decode(header, body, ctx)
    }
}

pub(crate) fn expect_empty(body: &Bytes) -> Result<(), CodecError> {
    if body.is_empty() {
        Ok(())
    } else {
        Err(CodecError::TrailingBytes)
    }
}

/// Shared body codec for the PUBACK / PUBREC / PUBREL / PUBCOMP family.
///
/// v3.1.1 bodies are exactly the packet identifier. v5 appends an optional
/// reason code and property block; the shortest legal form is always emitted
/// so a success acknowledgement stays two bytes.
pub(crate) fn decode_ack_body(
    mut body: Bytes,
    ctx: Codec,
) -> Result<(u32, ReasonCode, Vec<Property>), CodecError> {
    let packet_id = codec::read_packet_id(&mut body, ctx.id_width)?;
    if ctx.version == Protocol::V311 {
        expect_empty(&body)?;
        return Ok((packet_id, ReasonCode::SUCCESS, Vec::new()));
    }
    if body.is_empty() {
        return Ok((packet_id, ReasonCode::SUCCESS, Vec::new()));
    }
    let reason = ReasonCode(body.get_u8());
    if body.is_empty() {
        return Ok((packet_id, reason, Vec::new()));
    }
    let props = properties::decode_block(&mut body)?;
    expect_empty(&body)?;
    Ok((packet_id, reason, props))
}

pub(crate) fn encode_ack(
    header: u8,
    packet_id: u32,
    reason: ReasonCode,
    props: &[Property],
    ctx: Codec,
) -> Result<BytesMut, CodecError> {
    let mut sb = SendBuffer::new();
    codec::write_packet_id(sb.buf(), packet_id, ctx.id_width)?;
    if ctx.version == Protocol::V5 && (reason != ReasonCode::SUCCESS || !props.is_empty()) {
        sb.buf().put_u8(reason.0);
        if !props.is_empty() {
            properties::encode_block(sb.buf(), props)?;
        }
    }
    sb.finalize(header)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_rejects_bad_fixed_flags() {
        // PUBREL with flags 0000 instead of 0010.
        let err = Packet::decode(0x60, Bytes::from_static(&[0x00, 0x01]), Codec::v311());
        assert_eq!(
            err,
            Err(CodecError::InvalidFlags {
                packet_type: PacketType::PubRel,
                flags: 0,
            })
        );
    }

    #[test]
    fn pingreq_roundtrip() {
        let bytes = Packet::PingReq.encode(Codec::v311()).unwrap();
        assert_eq!(&bytes[..], &[0xC0, 0x00]);
        let mut wire = bytes.freeze();
        let packet = Packet::from_bytes(&mut wire, Codec::v311()).unwrap();
        assert_eq!(packet, Packet::PingReq);
    }

    #[test]
    fn pingresp_with_body_rejected() {
        let err = Packet::decode(0xD0, Bytes::from_static(&[0x00]), Codec::v311());
        assert_eq!(err, Err(CodecError::TrailingBytes));
    }

    #[test]
    fn auth_is_v5_only() {
        let err = Packet::decode(0xF0, Bytes::new(), Codec::v311());
        assert_eq!(
            err,
            Err(CodecError::InvalidPacketType { packet_type: 0xF0 })
        );
        assert!(Packet::decode(0xF0, Bytes::new(), Codec::v5()).is_ok());
    }
}
