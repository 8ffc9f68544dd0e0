//! # mqtt-endpoint-tokio
//!
//! Tokio runtime support for `mqtt-endpoint-core`.
//!
//! This crate provides the byte-stream and clock implementations for the
//! Tokio runtime and re-exports all types from the core crate for
//! convenience. The endpoint itself is runtime-agnostic; everything here is
//! a thin wrapper.
//!
//! ## Example
//!
//! ```rust,no_run
//! use mqtt_endpoint_tokio::{connect_tcp, Endpoint, QoS, Session, TokioClock};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = connect_tcp("127.0.0.1:1883").await?;
//!     let mut session = Session::new("example-client");
//!     session.set_clean_session(true);
//!     session.set_keep_alive_sec(30);
//!
//!     let mut endpoint = Endpoint::client(transport, TokioClock::new(), session);
//!     endpoint.set_connack_handler(|ep, connack| {
//!         if connack.is_accepted() {
//!             ep.publish("greeting", &b"hello"[..], QoS::AtLeastOnce, false)
//!                 .unwrap();
//!         }
//!         true
//!     });
//!     endpoint.set_puback_handler(|ep, _| {
//!         ep.disconnect(Some(1_000)).unwrap();
//!         true
//!     });
//!
//!     endpoint.connect()?;
//!     endpoint.run().await?;
//!     Ok(())
//! }
//! ```

mod network;
mod time;

pub use network::{connect_tcp, TokioTransport};
pub use time::TokioClock;

// Re-export core for convenience
pub use mqtt_endpoint_core::*;

use tokio::net::TcpStream;

/// A client or server endpoint over a plain TCP stream.
pub type TcpEndpoint = Endpoint<TokioTransport<TcpStream>, TokioClock>;

/// Builds a client endpoint on an already-dialed stream.
pub fn make_client<S>(stream: S, session: Session) -> Endpoint<TokioTransport<S>, TokioClock>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    Endpoint::client(TokioTransport::new(stream), TokioClock::new(), session)
}

/// Builds a server-side endpoint for an accepted stream.
pub fn make_server_endpoint<S>(stream: S) -> Endpoint<TokioTransport<S>, TokioClock>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    Endpoint::server(TokioTransport::new(stream), TokioClock::new())
}
