//! Streaming frame reader.
//!
//! Turns an inbound byte stream into whole control packets with a
//! three-state machine over an internal buffer, so a short transport read
//! never loses a byte and never consumes one twice. Dropping a pending
//! `next_frame` future between reads is safe for the same reason: already
//! buffered bytes stay buffered.

use bytes::{Bytes, BytesMut};

use crate::error::{CodecError, EndpointError, TransportError};
use crate::protocol::codec::{variable_length_len, MAX_REMAINING_LENGTH};
use crate::transport::Transport;

/// Upper bound on a whole packet when nothing smaller was negotiated:
/// the largest remaining length the wire format can express, plus the
/// five-byte fixed header that carries it.
pub const DEFAULT_MAX_PACKET_SIZE: u32 = MAX_REMAINING_LENGTH + 5;

const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    AwaitType,
    AwaitLength {
        header: u8,
        multiplier: u32,
        accum: u32,
    },
    AwaitBody {
        header: u8,
        remaining: usize,
    },
}

/// One whole control packet: the fixed-header byte and the variable part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: u8,
    pub body: Bytes,
}

#[derive(Debug)]
pub struct FrameReader {
    state: ReadState,
    buffer: BytesMut,
    max_packet_size: u32,
}

impl Default for FrameReader {
    fn default() -> Self {
        FrameReader::new()
    }
}

impl FrameReader {
    pub fn new() -> Self {
        FrameReader {
            state: ReadState::AwaitType,
            buffer: BytesMut::new(),
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }

    /// Applies a negotiated `maximum_packet_size`. The limit covers the
    /// whole packet including the fixed header.
    pub fn set_max_packet_size(&mut self, limit: u32) {
        self.max_packet_size = limit.min(DEFAULT_MAX_PACKET_SIZE);
    }

    /// True between packets: no byte of a partial packet is buffered or
    /// parsed.
    pub fn at_packet_boundary(&self) -> bool {
        self.state == ReadState::AwaitType && self.buffer.is_empty()
    }

    /// Makes `bytes` available to the state machine.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Advances the state machine as far as the buffered bytes allow.
    /// Returns a whole packet as soon as one is complete.
    pub fn poll_frame(&mut self) -> Result<Option<Frame>, CodecError> {
        loop {
            match self.state {
                ReadState::AwaitType => {
                    if self.buffer.is_empty() {
                        return Ok(None);
                    }
                    let header = self.buffer.split_to(1)[0];
                    self.state = ReadState::AwaitLength {
                        header,
                        multiplier: 1,
                        accum: 0,
                    };
                }
                ReadState::AwaitLength {
                    header,
                    mut multiplier,
                    mut accum,
                } => {
                    if self.buffer.is_empty() {
                        return Ok(None);
                    }
                    let byte = self.buffer.split_to(1)[0];
                    accum += (byte & 0x7F) as u32 * multiplier;
                    if accum > MAX_REMAINING_LENGTH {
                        return Err(CodecError::MalformedRemainingLength);
                    }
                    if byte & 0x80 != 0 {
                        if multiplier == 128 * 128 * 128 {
                            return Err(CodecError::MalformedRemainingLength);
                        }
                        multiplier *= 128;
                        self.state = ReadState::AwaitLength {
                            header,
                            multiplier,
                            accum,
                        };
                        continue;
                    }

                    let total = 1 + variable_length_len(accum) as u32 + accum;
                    if total > self.max_packet_size {
                        return Err(CodecError::PacketTooLarge {
                            size: total,
                            limit: self.max_packet_size,
                        });
                    }
                    if accum == 0 {
                        self.state = ReadState::AwaitType;
                        return Ok(Some(Frame {
                            header,
                            body: Bytes::new(),
                        }));
                    }
                    self.state = ReadState::AwaitBody {
                        header,
                        remaining: accum as usize,
                    };
                }
                ReadState::AwaitBody { header, remaining } => {
                    if self.buffer.len() < remaining {
                        return Ok(None);
                    }
                    let body = self.buffer.split_to(remaining).freeze();
                    self.state = ReadState::AwaitType;
                    return Ok(Some(Frame { header, body }));
                }
            }
        }
    }

    /// Reads from the transport until one whole packet is available.
    pub async fn next_frame<T: Transport>(
        &mut self,
        transport: &mut T,
    ) -> Result<Frame, EndpointError> {
        loop {
            if let Some(frame) = self.poll_frame()? {
                return Ok(frame);
            }
            let mut chunk = [0u8; READ_CHUNK];
            let n = transport.read(&mut chunk).await?;
            if n == 0 {
                return Err(EndpointError::Transport(TransportError::Eof));
            }
            self.feed(&chunk[..n]);
        }
    }
}
