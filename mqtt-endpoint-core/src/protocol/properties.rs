//! MQTT 5.0 property blocks.
//!
//! A property block is a variable-length-integer total length followed by
//! `(identifier, value)` pairs. Decoding preserves the order in which
//! properties appeared so that re-encoding reproduces the original bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::CodecError;
use crate::protocol::codec;

/// One MQTT 5.0 property.
///
/// `UserProperty` and `SubscriptionIdentifier` may appear multiple times in
/// a block; every other property must be unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Property {
    PayloadFormatIndicator(u8),
    MessageExpiryInterval(u32),
    ContentType(String),
    ResponseTopic(String),
    CorrelationData(Bytes),
    SubscriptionIdentifier(u32),
    SessionExpiryInterval(u32),
    AssignedClientIdentifier(String),
    ServerKeepAlive(u16),
    AuthenticationMethod(String),
    AuthenticationData(Bytes),
    RequestProblemInformation(u8),
    WillDelayInterval(u32),
    RequestResponseInformation(u8),
    ResponseInformation(String),
    ServerReference(String),
    ReasonString(String),
    ReceiveMaximum(u16),
    TopicAliasMaximum(u16),
    TopicAlias(u16),
    MaximumQos(u8),
    RetainAvailable(u8),
    UserProperty(String, String),
    MaximumPacketSize(u32),
    WildcardSubscriptionAvailable(u8),
    SubscriptionIdentifierAvailable(u8),
    SharedSubscriptionAvailable(u8),
}

impl Property {
    pub const fn id(&self) -> u8 {
        match self {
            Property::PayloadFormatIndicator(_) => 0x01,
            Property::MessageExpiryInterval(_) => 0x02,
            Property::ContentType(_) => 0x03,
            Property::ResponseTopic(_) => 0x08,
            Property::CorrelationData(_) => 0x09,
            Property::SubscriptionIdentifier(_) => 0x0B,
            Property::SessionExpiryInterval(_) => 0x11,
            Property::AssignedClientIdentifier(_) => 0x12,
            Property::ServerKeepAlive(_) => 0x13,
            Property::AuthenticationMethod(_) => 0x15,
            Property::AuthenticationData(_) => 0x16,
            Property::RequestProblemInformation(_) => 0x17,
            Property::WillDelayInterval(_) => 0x18,
            Property::RequestResponseInformation(_) => 0x19,
            Property::ResponseInformation(_) => 0x1A,
            Property::ServerReference(_) => 0x1C,
            Property::ReasonString(_) => 0x1F,
            Property::ReceiveMaximum(_) => 0x21,
            Property::TopicAliasMaximum(_) => 0x22,
            Property::TopicAlias(_) => 0x23,
            Property::MaximumQos(_) => 0x24,
            Property::RetainAvailable(_) => 0x25,
            Property::UserProperty(_, _) => 0x26,
            Property::MaximumPacketSize(_) => 0x27,
            Property::WildcardSubscriptionAvailable(_) => 0x28,
            Property::SubscriptionIdentifierAvailable(_) => 0x29,
            Property::SharedSubscriptionAvailable(_) => 0x2A,
        }
    }

    const fn repeatable(id: u8) -> bool {
        matches!(id, 0x0B | 0x26)
    }

    fn encoded_len(&self) -> usize {
        1 + match self {
            Property::PayloadFormatIndicator(_)
            | Property::RequestProblemInformation(_)
            | Property::RequestResponseInformation(_)
            | Property::MaximumQos(_)
            | Property::RetainAvailable(_)
            | Property::WildcardSubscriptionAvailable(_)
            | Property::SubscriptionIdentifierAvailable(_)
            | Property::SharedSubscriptionAvailable(_) => 1,
            Property::ServerKeepAlive(_)
            | Property::ReceiveMaximum(_)
            | Property::TopicAliasMaximum(_)
            | Property::TopicAlias(_) => 2,
            Property::MessageExpiryInterval(_)
            | Property::SessionExpiryInterval(_)
            | Property::WillDelayInterval(_)
            | Property::MaximumPacketSize(_) => 4,
            Property::SubscriptionIdentifier(v) => codec::variable_length_len(*v),
            Property::ContentType(s)
            | Property::ResponseTopic(s)
            | Property::AssignedClientIdentifier(s)
            | Property::AuthenticationMethod(s)
            | Property::ResponseInformation(s)
            | Property::ServerReference(s)
            | Property::ReasonString(s) => 2 + s.len(),
            Property::CorrelationData(b) | Property::AuthenticationData(b) => 2 + b.len(),
            Property::UserProperty(k, v) => 2 + k.len() + 2 + v.len(),
        }
    }

    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        buf.put_u8(self.id());
        match self {
            Property::PayloadFormatIndicator(v)
            | Property::RequestProblemInformation(v)
            | Property::RequestResponseInformation(v)
            | Property::MaximumQos(v)
            | Property::RetainAvailable(v)
            | Property::WildcardSubscriptionAvailable(v)
            | Property::SubscriptionIdentifierAvailable(v)
            | Property::SharedSubscriptionAvailable(v) => buf.put_u8(*v),
            Property::ServerKeepAlive(v)
            | Property::ReceiveMaximum(v)
            | Property::TopicAliasMaximum(v)
            | Property::TopicAlias(v) => buf.put_u16(*v),
            Property::MessageExpiryInterval(v)
            | Property::SessionExpiryInterval(v)
            | Property::WillDelayInterval(v)
            | Property::MaximumPacketSize(v) => buf.put_u32(*v),
            Property::SubscriptionIdentifier(v) => codec::write_variable_length(buf, *v),
            Property::ContentType(s)
            | Property::ResponseTopic(s)
            | Property::AssignedClientIdentifier(s)
            | Property::AuthenticationMethod(s)
            | Property::ResponseInformation(s)
            | Property::ServerReference(s)
            | Property::ReasonString(s) => codec::write_string(buf, s)?,
            Property::CorrelationData(b) | Property::AuthenticationData(b) => {
                codec::write_binary(buf, b)?
            }
            Property::UserProperty(k, v) => {
                codec::write_string(buf, k)?;
                codec::write_string(buf, v)?;
            }
        }
        Ok(())
    }

    fn decode(id: u8, buf: &mut Bytes) -> Result<Self, CodecError> {
        let prop = match id {
            0x01 => Property::PayloadFormatIndicator(codec::read_u8(buf)?),
            0x02 => Property::MessageExpiryInterval(codec::read_u32(buf)?),
            0x03 => Property::ContentType(codec::read_string(buf)?),
            0x08 => Property::ResponseTopic(codec::read_string(buf)?),
            0x09 => Property::CorrelationData(codec::read_binary(buf)?),
            0x0B => Property::SubscriptionIdentifier(codec::read_variable_length(buf)?),
            0x11 => Property::SessionExpiryInterval(codec::read_u32(buf)?),
            0x12 => Property::AssignedClientIdentifier(codec::read_string(buf)?),
            0x13 => Property::ServerKeepAlive(codec::read_u16(buf)?),
            0x15 => Property::AuthenticationMethod(codec::read_string(buf)?),
            0x16 => Property::AuthenticationData(codec::read_binary(buf)?),
            0x17 => Property::RequestProblemInformation(codec::read_u8(buf)?),
            0x18 => Property::WillDelayInterval(codec::read_u32(buf)?),
            0x19 => Property::RequestResponseInformation(codec::read_u8(buf)?),
            0x1A => Property::ResponseInformation(codec::read_string(buf)?),
            0x1C => Property::ServerReference(codec::read_string(buf)?),
            0x1F => Property::ReasonString(codec::read_string(buf)?),
            0x21 => Property::ReceiveMaximum(codec::read_u16(buf)?),
            0x22 => Property::TopicAliasMaximum(codec::read_u16(buf)?),
            0x23 => Property::TopicAlias(codec::read_u16(buf)?),
            0x24 => Property::MaximumQos(codec::read_u8(buf)?),
            0x25 => Property::RetainAvailable(codec::read_u8(buf)?),
            0x26 => {
                let key = codec::read_string(buf)?;
                let value = codec::read_string(buf)?;
                Property::UserProperty(key, value)
            }
            0x27 => Property::MaximumPacketSize(codec::read_u32(buf)?),
            0x28 => Property::WildcardSubscriptionAvailable(codec::read_u8(buf)?),
            0x29 => Property::SubscriptionIdentifierAvailable(codec::read_u8(buf)?),
            0x2A => Property::SharedSubscriptionAvailable(codec::read_u8(buf)?),
            other => return Err(CodecError::InvalidPropertyId { id: other }),
        };
        Ok(prop)
    }
}

/// Writes the block length followed by each property in order.
pub(crate) fn encode_block(buf: &mut BytesMut, props: &[Property]) -> Result<(), CodecError> {
    let body: usize = props.iter().map(Property::encoded_len).sum();
    codec::write_variable_length(buf, body as u32);
    for prop in props {
        prop.encode(buf)?;
    }
    Ok(())
}

/// Reads a property block, enforcing per-identifier uniqueness.
pub(crate) fn decode_block(buf: &mut Bytes) -> Result<Vec<Property>, CodecError> {
    let len = codec::read_variable_length(buf)? as usize;
    if buf.remaining() < len {
        return Err(CodecError::Truncated);
    }
    let mut block = buf.split_to(len);

    let mut props = Vec::new();
    let mut seen = 0u64;
    while block.has_remaining() {
        let id = block.get_u8();
        if !Property::repeatable(id) && id < 64 {
            let bit = 1u64 << id;
            if seen & bit != 0 {
                return Err(CodecError::DuplicateProperty { id });
            }
            seen |= bit;
        }
        props.push(Property::decode(id, &mut block)?);
    }
    Ok(props)
}
