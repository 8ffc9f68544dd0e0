use crate::error::CodecError;

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub enum PacketType {
    /// Client request to connect to Server
    /// Direction: Client to Server
    Connect = 1,

    /// Connect acknowledgment
    /// Direction: Server to Client
    ConnAck = 2,

    /// Publish message
    /// Direction: Client to Server or Server to Client
    Publish = 3,

    /// Publish acknowledgment
    /// Direction: Client to Server or Server to Client
    PubAck = 4,

    /// Publish received (assured delivery part 1)
    /// Direction: Client to Server or Server to Client
    PubRec = 5,

    /// Publish release (assured delivery part 2)
    /// Direction: Client to Server or Server to Client
    PubRel = 6,

    /// Publish complete (assured delivery part 3)
    /// Direction: Client to Server or Server to Client
    PubComp = 7,

    /// Client subscribe request
    /// Direction: Client to Server
    Subscribe = 8,

    /// Subscribe acknowledgment
    /// Direction: Server to Client
    SubAck = 9,

    /// Client unsubscribe request
    /// Direction: Client to Server
    Unsubscribe = 10,

    /// Unsubscribe acknowledgment
    /// Direction: Server to Client
    UnsubAck = 11,

    /// Ping request
    /// Direction: Client to Server
    PingReq = 12,

    /// Ping response
    /// Direction: Server to Client
    PingResp = 13,

    /// Disconnect notification
    /// Direction: Client to Server, or Server to Client (v5)
    Disconnect = 14,

    /// Authentication exchange (v5 only)
    /// Direction: Client to Server or Server to Client
    Auth = 15,
}

impl PacketType {
    /// Decodes the high nibble of the first fixed-header byte.
    pub const fn from_header(byte: u8) -> Option<Self> {
        match byte >> 4 {
            1 => Some(PacketType::Connect),
            2 => Some(PacketType::ConnAck),
            3 => Some(PacketType::Publish),
            4 => Some(PacketType::PubAck),
            5 => Some(PacketType::PubRec),
            6 => Some(PacketType::PubRel),
            7 => Some(PacketType::PubComp),
            8 => Some(PacketType::Subscribe),
            9 => Some(PacketType::SubAck),
            10 => Some(PacketType::Unsubscribe),
            11 => Some(PacketType::UnsubAck),
            12 => Some(PacketType::PingReq),
            13 => Some(PacketType::PingResp),
            14 => Some(PacketType::Disconnect),
            15 => Some(PacketType::Auth),
            _ => None,
        }
    }

    /// Fixed header flags for all packet types EXCEPT PUBLISH.
    /// (PUBLISH flags depend on DUP/QoS/RETAIN.)
    pub const fn fixed_flags(self) -> u8 {
        match self {
            PacketType::PubRel | PacketType::Subscribe | PacketType::Unsubscribe => 0b0010,
            _ => 0b0000,
        }
    }

    /// Builds the first fixed-header byte for non-PUBLISH packets.
    pub const fn header_byte(self) -> u8 {
        ((self as u8) << 4) | (self.fixed_flags() & 0x0F)
    }

    /// Rejects reserved flag-nibble values. PUBLISH flags are validated
    /// separately when the DUP/QoS/RETAIN bits are pulled apart.
    pub fn validate_flags(self, flags: u8) -> Result<(), CodecError> {
        let flags = flags & 0x0F;
        if self == PacketType::Publish || flags == self.fixed_flags() {
            Ok(())
        } else {
            Err(CodecError::InvalidFlags {
                packet_type: self,
                flags,
            })
        }
    }
}
