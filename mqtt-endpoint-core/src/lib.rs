//! # mqtt-endpoint-core
//!
//! Transport-agnostic MQTT 3.1.1 / 5.0 endpoint protocol engine.
//!
//! This library contains the client and server sides of the MQTT
//! control-packet protocol: the streaming wire codec, the QoS 0/1/2 publish
//! handshakes, per-endpoint subscription management, session state that
//! survives reconnects, keep-alive, and the in-flight store that drives
//! in-order retransmission. It is runtime-agnostic: byte streams and clocks
//! are traits, implemented by adapter crates such as `mqtt-endpoint-tokio`.
//!
//! ## What this crate does not do
//!
//! - Open sockets, resolve hostnames or perform TLS handshakes; the
//!   [`Transport`] trait consumes an established stream.
//! - Route messages between connections. A server endpoint manages exactly
//!   one connection; fan-out, retained messages and wildcard matching live
//!   behind the [`Router`] interface.
//! - Reconnect. The caller dials again and reuses the [`Session`]; the
//!   engine then replays unacknowledged work in its original order.

pub mod endpoint;
pub mod error;
pub mod frame;
pub mod packet_id;
pub mod protocol;
pub mod router;
pub mod session;
pub mod store;
pub mod subscription;
pub mod time;
pub mod transport;

// Convenience re-exports
pub use endpoint::{AckMode, Endpoint, EndpointState, Role};
pub use error::{CodecError, EndpointError, ProtocolViolation, TimeoutKind, TransportError};
pub use frame::{Frame, FrameReader};
pub use packet_id::{IdWidth, PacketIdAllocator};
pub use router::Router;
pub use session::{MemorySessionRegistry, Session, SessionRegistry};
pub use store::{AckKind, InFlightEntry, InFlightStore};
pub use subscription::{RetainHandling, SubscribeOptions, SubscriptionTable};
pub use time::Clock;
pub use transport::{HandshakeMode, TlsTransport, Transport};

// Protocol re-exports
pub use protocol::packets::{
    Auth, ConnAck, Connect, Disconnect, Packet, PubAck, PubComp, PubRec, PubRel, Publish,
    SubAck, Subscribe, SubscribeEntry, UnsubAck, Unsubscribe, Will,
};
pub use protocol::{
    Codec, ConnectReturnCode, PacketType, Property, Protocol, QoS, ReasonCode,
};
