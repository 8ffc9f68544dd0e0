pub(crate) mod codec;
mod packet_type;
pub mod packets;
pub mod properties;
mod qos;
mod reason_code;

pub use packet_type::PacketType;
pub use properties::Property;
pub use qos::QoS;
pub use reason_code::{ConnectReturnCode, ReasonCode};

use crate::packet_id::IdWidth;

/// MQTT wire protocol revision this connection speaks.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum Protocol {
    #[default]
    V311,
    V5,
}

impl Protocol {
    /// The protocol level byte carried in CONNECT.
    pub(crate) const fn level(self) -> u8 {
        match self {
            Protocol::V311 => 4,
            Protocol::V5 => 5,
        }
    }

    pub(crate) const fn from_level(level: u8) -> Option<Self> {
        match level {
            4 => Some(Protocol::V311),
            5 => Some(Protocol::V5),
            _ => None,
        }
    }
}

/// Per-connection encode/decode parameters: the protocol revision and the
/// packet-identifier wire width.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Codec {
    pub version: Protocol,
    pub id_width: IdWidth,
}

impl Codec {
    pub const fn v311() -> Self {
        Codec {
            version: Protocol::V311,
            id_width: IdWidth::Sixteen,
        }
    }

    pub const fn v5() -> Self {
        Codec {
            version: Protocol::V5,
            id_width: IdWidth::Sixteen,
        }
    }
}
