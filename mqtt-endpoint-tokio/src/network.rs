//! Tokio byte-stream adapter.

use mqtt_endpoint_core::{Transport, TransportError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// Wraps any tokio `AsyncRead + AsyncWrite` stream (TCP, TLS, an in-memory
/// duplex) as an endpoint transport.
pub struct TokioTransport<S> {
    inner: S,
}

impl<S> TokioTransport<S> {
    pub fn new(inner: S) -> Self {
        TokioTransport { inner }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

fn map_io_error(error: std::io::Error) -> TransportError {
    use std::io::ErrorKind;
    match error.kind() {
        ErrorKind::UnexpectedEof => TransportError::Eof,
        ErrorKind::ConnectionReset | ErrorKind::BrokenPipe | ErrorKind::ConnectionAborted => {
            TransportError::ConnectionReset
        }
        _ => TransportError::Failed(error.to_string()),
    }
}

impl<S> Transport for TokioTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.inner.read(buf).await.map_err(map_io_error)
    }

    async fn write_all(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        self.inner.write_all(buf).await.map_err(map_io_error)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner.shutdown().await.map_err(map_io_error)
    }
}

/// Dials a TCP connection and wraps it as a transport.
pub async fn connect_tcp(addr: &str) -> Result<TokioTransport<TcpStream>, TransportError> {
    let stream = TcpStream::connect(addr).await.map_err(map_io_error)?;
    stream.set_nodelay(true).map_err(map_io_error)?;
    Ok(TokioTransport::new(stream))
}
