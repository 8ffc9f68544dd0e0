use crate::protocol::PacketType;

/// Errors raised by the wire codec, both while decoding inbound bytes and
/// while encoding outbound packets.
///
/// Every variant maps to the `MalformedPacket` / `PacketTooLarge` classes of
/// the protocol specification; the extra detail is kept so that callers can
/// log something actionable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// A variable-length integer did not terminate within four bytes or
    /// exceeded 268,435,455.
    MalformedRemainingLength,

    /// Declared packet size exceeds the negotiated maximum.
    PacketTooLarge { size: u32, limit: u32 },

    /// The body ended before the declared field did.
    Truncated,

    /// Bytes were left over after the last declared field.
    TrailingBytes,

    /// The high nibble of the fixed header is reserved.
    InvalidPacketType { packet_type: u8 },

    /// The flag nibble does not match the fixed value for this packet type.
    InvalidFlags { packet_type: PacketType, flags: u8 },

    InvalidQos { level: u8 },

    /// A length-prefixed string was not valid UTF-8.
    InvalidUtf8,

    /// A string contained U+0000, which MQTT prohibits.
    ProhibitedCodePoint,

    /// A string or binary field exceeds the 65,535-byte wire limit.
    StringTooLong { length: usize },

    InvalidPropertyId { id: u8 },

    /// A non-repeatable property appeared twice in one property block.
    DuplicateProperty { id: u8 },

    /// A packet identifier field decoded to zero where a nonzero value is
    /// required.
    ZeroPacketId,

    /// QoS > 0 PUBLISH without a packet identifier.
    MissingPacketId,

    /// The identifier does not fit the session's configured width.
    PacketIdOutOfRange { id: u32 },

    /// CONNECT carried a protocol name other than "MQTT".
    UnsupportedProtocolName,

    UnsupportedProtocolLevel { level: u8 },

    InvalidRetainHandling { value: u8 },

    /// SUBSCRIBE / UNSUBSCRIBE with an empty entry list.
    NoEntries,
}

impl core::fmt::Display for CodecError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CodecError::MalformedRemainingLength => {
                write!(f, "malformed remaining length encoding")
            }
            CodecError::PacketTooLarge { size, limit } => {
                write!(f, "packet of {} bytes exceeds limit of {} bytes", size, limit)
            }
            CodecError::Truncated => write!(f, "packet body truncated"),
            CodecError::TrailingBytes => write!(f, "trailing bytes after packet body"),
            CodecError::InvalidPacketType { packet_type } => {
                write!(f, "invalid control packet type {:#04x}", packet_type)
            }
            CodecError::InvalidFlags { packet_type, flags } => {
                write!(f, "invalid flags {:#06b} for {:?}", flags, packet_type)
            }
            CodecError::InvalidQos { level } => write!(f, "invalid QoS level {}", level),
            CodecError::InvalidUtf8 => write!(f, "string is not valid UTF-8"),
            CodecError::ProhibitedCodePoint => {
                write!(f, "string contains a prohibited code point")
            }
            CodecError::StringTooLong { length } => {
                write!(f, "string of {} bytes exceeds 65535-byte limit", length)
            }
            CodecError::InvalidPropertyId { id } => {
                write!(f, "unknown property identifier {:#04x}", id)
            }
            CodecError::DuplicateProperty { id } => {
                write!(f, "property {:#04x} appears more than once", id)
            }
            CodecError::ZeroPacketId => write!(f, "packet identifier is zero"),
            CodecError::MissingPacketId => {
                write!(f, "QoS > 0 publish without a packet identifier")
            }
            CodecError::PacketIdOutOfRange { id } => {
                write!(f, "packet identifier {} does not fit the configured width", id)
            }
            CodecError::UnsupportedProtocolName => write!(f, "unsupported protocol name"),
            CodecError::UnsupportedProtocolLevel { level } => {
                write!(f, "unsupported protocol level {}", level)
            }
            CodecError::InvalidRetainHandling { value } => {
                write!(f, "invalid retain handling value {}", value)
            }
            CodecError::NoEntries => {
                write!(f, "subscribe or unsubscribe packet carries no entries")
            }
        }
    }
}

impl std::error::Error for CodecError {}

/// Failures of the byte stream underneath the endpoint.
///
/// Adapters map their native I/O errors into these variants; the engine only
/// distinguishes the cases that change dispatch behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The peer closed the stream cleanly.
    Eof,

    ConnectionReset,

    /// Any other stream failure, including TLS faults.
    Failed(String),
}

impl TransportError {
    /// True for terminations that should also surface through the close
    /// handler.
    pub fn is_disconnection(&self) -> bool {
        matches!(self, TransportError::Eof | TransportError::ConnectionReset)
    }
}

impl core::fmt::Display for TransportError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TransportError::Eof => write!(f, "connection closed by peer"),
            TransportError::ConnectionReset => write!(f, "connection reset by peer"),
            TransportError::Failed(msg) => write!(f, "transport failure: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

/// A well-formed packet that is not allowed in the current connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// A second CONNECT on an already-connected endpoint.
    DuplicateConnect,

    /// The first packet a server endpoint receives must be CONNECT.
    ConnectExpected,

    /// A packet arrived before the connection handshake finished, or one
    /// that this side of the connection can never legally receive.
    UnexpectedPacket { packet_type: PacketType },
}

impl core::fmt::Display for ProtocolViolation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ProtocolViolation::DuplicateConnect => write!(f, "duplicate CONNECT"),
            ProtocolViolation::ConnectExpected => {
                write!(f, "first packet was not CONNECT")
            }
            ProtocolViolation::UnexpectedPacket { packet_type } => {
                write!(f, "{:?} not allowed in the current state", packet_type)
            }
        }
    }
}

impl std::error::Error for ProtocolViolation {}

/// Which deadline fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// Server-side idle timeout: no packet within 1.5x the keep-alive.
    KeepAlive,

    /// The grace period given to `disconnect` elapsed before the peer
    /// closed the stream.
    Disconnect,
}

/// Top-level error type surfaced through `on_error` and returned by endpoint
/// operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointError {
    /// Codec-level violation: the bytes could not be a legal packet.
    Malformed(CodecError),

    /// The packet was legal but arrived at the wrong time.
    Protocol(ProtocolViolation),

    /// A packet exceeds the negotiated maximum packet size.
    PacketTooLarge { size: u32, limit: u32 },

    /// The server refused the client identifier.
    IdentifierRejected,

    /// CONNACK refused the connection with the given code.
    ConnectionRefused { code: u8 },

    Transport(TransportError),

    Timeout(TimeoutKind),

    /// An `acquired_*` operation named an identifier with a live handshake.
    PacketIdInUse { packet_id: u32 },

    /// Every identifier the configured width allows is in flight.
    PacketIdsExhausted,

    /// The operation requires a session / an established connection.
    NotConnected,
}

impl core::fmt::Display for EndpointError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            EndpointError::Malformed(e) => write!(f, "malformed packet: {}", e),
            EndpointError::PacketTooLarge { size, limit } => {
                write!(f, "packet of {} bytes exceeds limit of {} bytes", size, limit)
            }
            EndpointError::Protocol(v) => write!(f, "protocol violation: {}", v),
            EndpointError::IdentifierRejected => {
                write!(f, "client identifier rejected by server")
            }
            EndpointError::ConnectionRefused { code } => {
                write!(f, "connection refused with code {:#04x}", code)
            }
            EndpointError::Transport(e) => write!(f, "transport error: {}", e),
            EndpointError::Timeout(TimeoutKind::KeepAlive) => {
                write!(f, "keep-alive timeout expired")
            }
            EndpointError::Timeout(TimeoutKind::Disconnect) => {
                write!(f, "disconnect timeout expired")
            }
            EndpointError::PacketIdInUse { packet_id } => {
                write!(f, "packet identifier {} is already in use", packet_id)
            }
            EndpointError::PacketIdsExhausted => {
                write!(f, "no packet identifier available")
            }
            EndpointError::NotConnected => write!(f, "endpoint is not connected"),
        }
    }
}

impl std::error::Error for EndpointError {}

impl From<CodecError> for EndpointError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::PacketTooLarge { size, limit } => {
                EndpointError::PacketTooLarge { size, limit }
            }
            other => EndpointError::Malformed(other),
        }
    }
}

impl From<ProtocolViolation> for EndpointError {
    fn from(v: ProtocolViolation) -> Self {
        EndpointError::Protocol(v)
    }
}

impl From<TransportError> for EndpointError {
    fn from(e: TransportError) -> Self {
        EndpointError::Transport(e)
    }
}
