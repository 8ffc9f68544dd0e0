//! Byte stream abstraction consumed by the endpoint.
//!
//! The engine never opens sockets, resolves names or performs TLS
//! handshakes; it reads and writes through these traits and leaves the rest
//! to an adapter crate.

use crate::error::TransportError;

/// A bidirectional byte stream.
///
/// `read` returning `Ok(0)` means the peer closed the stream cleanly.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    async fn write_all(&mut self, buf: &[u8]) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeMode {
    Client,
    Server,
}

/// A transport with a TLS-style handshake step that must complete before
/// MQTT bytes flow.
#[allow(async_fn_in_trait)]
pub trait TlsTransport: Transport {
    async fn handshake(&mut self, mode: HandshakeMode) -> Result<(), TransportError>;
}
