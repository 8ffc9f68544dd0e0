use bytes::{BufMut, Bytes, BytesMut};

use crate::error::CodecError;
use crate::protocol::codec::{self, SendBuffer};
use crate::protocol::packets::expect_empty;
use crate::protocol::properties::{self, Property};
use crate::protocol::qos::QoS;
use crate::protocol::{Codec, PacketType, Protocol};

mod connect_flags {
    pub const CLEAN_SESSION: u8 = 0b0000_0010;
    pub const WILL_FLAG: u8 = 0b0000_0100;
    pub const WILL_QOS_SHIFT: u8 = 3;
    pub const WILL_RETAIN: u8 = 0b0010_0000;
    pub const PASSWORD: u8 = 0b0100_0000;
    pub const USER_NAME: u8 = 0b1000_0000;
    pub const RESERVED: u8 = 0b0000_0001;
}

/// The message the broker publishes on the client's behalf if the connection
/// ends without a graceful DISCONNECT.
#[derive(Debug, Clone, PartialEq)]
pub struct Will {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    /// v5 will properties (delay interval, payload format, and so on).
    pub properties: Vec<Property>,
}

impl Will {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Will {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
            properties: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Connect {
    /// Which revision the peer asked for. CONNECT is the one packet that
    /// announces its own protocol version, so it is kept here rather than
    /// taken from the connection codec.
    pub protocol: Protocol,
    pub client_id: String,
    pub clean_start: bool,
    pub keep_alive: u16,
    pub will: Option<Will>,
    pub username: Option<String>,
    pub password: Option<Bytes>,
    pub properties: Vec<Property>,
}

impl Connect {
    pub(crate) fn decode_body(mut body: Bytes, _ctx: Codec) -> Result<Self, CodecError> {
        let name = codec::read_string(&mut body)?;
        if name != "MQTT" {
            return Err(CodecError::UnsupportedProtocolName);
        }
        let level = codec::read_u8(&mut body)?;
        let protocol =
            Protocol::from_level(level).ok_or(CodecError::UnsupportedProtocolLevel { level })?;

        let flags = codec::read_u8(&mut body)?;
        if flags & connect_flags::RESERVED != 0 {
            return Err(CodecError::InvalidFlags {
                packet_type: PacketType::Connect,
                flags,
            });
        }
        let clean_start = flags & connect_flags::CLEAN_SESSION != 0;
        let will_flag = flags & connect_flags::WILL_FLAG != 0;
        let will_qos = (flags >> connect_flags::WILL_QOS_SHIFT) & 0b11;
        let will_retain = flags & connect_flags::WILL_RETAIN != 0;
        if !will_flag && (will_qos != 0 || will_retain) {
            return Err(CodecError::InvalidFlags {
                packet_type: PacketType::Connect,
                flags,
            });
        }

        let keep_alive = codec::read_u16(&mut body)?;

        let props = if protocol == Protocol::V5 {
            properties::decode_block(&mut body)?
        } else {
            Vec::new()
        };

        let client_id = codec::read_string(&mut body)?;

        let will = if will_flag {
            let will_props = if protocol == Protocol::V5 {
                properties::decode_block(&mut body)?
            } else {
                Vec::new()
            };
            let topic = codec::read_string(&mut body)?;
            let payload = codec::read_binary(&mut body)?;
            Some(Will {
                topic,
                payload,
                qos: QoS::try_from(will_qos)?,
                retain: will_retain,
                properties: will_props,
            })
        } else {
            None
        };

        let username = if flags & connect_flags::USER_NAME != 0 {
            Some(codec::read_string(&mut body)?)
        } else {
            None
        };
        let password = if flags & connect_flags::PASSWORD != 0 {
            Some(codec::read_binary(&mut body)?)
        } else {
            None
        };

        expect_empty(&body)?;

        Ok(Connect {
            protocol,
            client_id,
            clean_start,
            keep_alive,
            will,
            username,
            password,
            properties: props,
        })
    }

    pub(crate) fn encode(&self, _ctx: Codec) -> Result<BytesMut, CodecError> {
        let mut sb = SendBuffer::new();
        let buf = sb.buf();

        codec::write_string(buf, "MQTT")?;
        buf.put_u8(self.protocol.level());

        let mut flags = 0u8;
        if self.clean_start {
            flags |= connect_flags::CLEAN_SESSION;
        }
        if let Some(will) = &self.will {
            flags |= connect_flags::WILL_FLAG;
            flags |= (will.qos as u8) << connect_flags::WILL_QOS_SHIFT;
            if will.retain {
                flags |= connect_flags::WILL_RETAIN;
            }
        }
        if self.username.is_some() {
            flags |= connect_flags::USER_NAME;
        }
        if self.password.is_some() {
            flags |= connect_flags::PASSWORD;
        }
        buf.put_u8(flags);
        buf.put_u16(self.keep_alive);

        if self.protocol == Protocol::V5 {
            properties::encode_block(buf, &self.properties)?;
        }

        codec::write_string(buf, &self.client_id)?;

        if let Some(will) = &self.will {
            if self.protocol == Protocol::V5 {
                properties::encode_block(buf, &will.properties)?;
            }
            codec::write_string(buf, &will.topic)?;
            codec::write_binary(buf, &will.payload)?;
        }
        if let Some(username) = &self.username {
            codec::write_string(buf, username)?;
        }
        if let Some(password) = &self.password {
            codec::write_binary(buf, password)?;
        }

        sb.finalize(PacketType::Connect.header_byte())
    }
}
