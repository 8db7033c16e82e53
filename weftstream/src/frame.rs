//! Wire frames and the pluggable framer bundle.
//!
//! The byte format of the multiplexing protocol is known only here. The
//! handler depends on the [`Framer`] trait: format hooks produce the bytes
//! queued on the transport, the feed hooks parse one frame at a time off the
//! receive buffer, and the handshake parsers consume the role-specific hello
//! messages. [`WireFramer`] is the default deployment format.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, WeftStreamError};

/// Type alias for stream identifiers.
pub type StreamId = u32;

/// Frame type identifiers on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Syn = 0x01,
    SynAck = 0x02,
    Psh = 0x03,
    Fin = 0x04,
    Rst = 0x05,
    Keepalive = 0x06,
    Error = 0x07,
}

impl TryFrom<u8> for FrameType {
    type Error = WeftStreamError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(FrameType::Syn),
            0x02 => Ok(FrameType::SynAck),
            0x03 => Ok(FrameType::Psh),
            0x04 => Ok(FrameType::Fin),
            0x05 => Ok(FrameType::Rst),
            0x06 => Ok(FrameType::Keepalive),
            0x07 => Ok(FrameType::Error),
            other => Err(WeftStreamError::UnknownFrameType(other)),
        }
    }
}

/// One multiplexing-layer frame.
///
/// Default binary layout (all fields big-endian):
///
/// ```text
/// SYN / SYN-ACK / FIN / RST:  type(1) + stream_id(4)
/// PSH:                        type(1) + stream_id(4) + len(4) + payload(len)
/// KEEPALIVE:                  type(1) + id(8) + ack(1)
/// ERROR:                      type(1) + len(2) + utf8 message(len)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Open a stream (client to server).
    Syn { stream_id: StreamId },
    /// Stream accepted (server to client).
    SynAck { stream_id: StreamId },
    /// Stream payload.
    Psh { stream_id: StreamId, payload: Bytes },
    /// Orderly half-close.
    Fin { stream_id: StreamId },
    /// Abrupt close.
    Rst { stream_id: StreamId },
    /// Liveness probe or its reply.
    Keepalive { id: u64, ack: bool },
    /// Final best-effort report before the connection is torn down.
    Error { message: String },
}

impl Frame {
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Syn { .. } => FrameType::Syn,
            Frame::SynAck { .. } => FrameType::SynAck,
            Frame::Psh { .. } => FrameType::Psh,
            Frame::Fin { .. } => FrameType::Fin,
            Frame::Rst { .. } => FrameType::Rst,
            Frame::Keepalive { .. } => FrameType::Keepalive,
            Frame::Error { .. } => FrameType::Error,
        }
    }
}

/// The capability bundle the handler takes by dependency injection.
///
/// Roles matter on the parse side: the client consumes the server's hello and
/// feed direction, and vice versa. All parse hooks return the number of bytes
/// consumed, with 0 (or `None`) meaning "need more bytes".
pub trait Framer {
    fn client_handshake_message(&mut self) -> Bytes;
    fn server_handshake_message(&mut self) -> Bytes;

    /// Consume the client's hello from the front of `buf` (server side).
    fn parse_client_handshake(&mut self, buf: &[u8]) -> Result<usize>;
    /// Consume the server's hello from the front of `buf` (client side).
    fn parse_server_handshake(&mut self, buf: &[u8]) -> Result<usize>;

    /// Parse one frame off the front of `buf` (client side).
    fn client_feed(&mut self, buf: &[u8]) -> Result<Option<(Frame, usize)>>;
    /// Parse one frame off the front of `buf` (server side).
    fn server_feed(&mut self, buf: &[u8]) -> Result<Option<(Frame, usize)>>;

    fn format_syn(&mut self, stream_id: StreamId) -> Bytes;
    fn format_syn_ack(&mut self, stream_id: StreamId) -> Bytes;
    fn format_psh(&mut self, stream_id: StreamId, payload: &[u8]) -> Bytes;
    fn format_fin(&mut self, stream_id: StreamId) -> Bytes;
    fn format_rst(&mut self, stream_id: StreamId) -> Bytes;
    fn format_keepalive(&mut self, id: u64, ack: bool) -> Bytes;
    fn format_error(&mut self, message: &str) -> Bytes;

    /// Allocate a fresh client-initiated stream id.
    fn next_stream_id(&mut self) -> StreamId;
}

/// Magic prefix of the client hello.
const CLIENT_MAGIC: &[u8; 4] = b"WFTC";
/// Magic prefix of the server hello.
const SERVER_MAGIC: &[u8; 4] = b"WFTS";
/// Both hellos are magic + u32 nonce.
const HELLO_LEN: usize = 8;

/// Default wire framer.
///
/// The client hello carries a random nonce which the server must echo in its
/// own hello; a mismatch fails the handshake before any frame is exchanged.
pub struct WireFramer {
    next_stream_id: u32,
    nonce: u32,
}

impl WireFramer {
    pub fn new() -> Self {
        Self {
            // Client-initiated ids are odd and ascend.
            next_stream_id: 1,
            nonce: rand::random::<u32>(),
        }
    }

    fn parse_frame(buf: &[u8]) -> Result<Option<(Frame, usize)>> {
        if buf.is_empty() {
            return Ok(None);
        }
        let frame_type = FrameType::try_from(buf[0])?;
        let body = &buf[1..];
        match frame_type {
            FrameType::Syn | FrameType::SynAck | FrameType::Fin | FrameType::Rst => {
                if body.len() < 4 {
                    return Ok(None);
                }
                let stream_id = (&body[0..4]).get_u32();
                let frame = match frame_type {
                    FrameType::Syn => Frame::Syn { stream_id },
                    FrameType::SynAck => Frame::SynAck { stream_id },
                    FrameType::Fin => Frame::Fin { stream_id },
                    _ => Frame::Rst { stream_id },
                };
                Ok(Some((frame, 5)))
            }
            FrameType::Psh => {
                if body.len() < 8 {
                    return Ok(None);
                }
                let stream_id = (&body[0..4]).get_u32();
                let len = (&body[4..8]).get_u32() as usize;
                if body.len() < 8 + len {
                    return Ok(None);
                }
                let payload = Bytes::copy_from_slice(&body[8..8 + len]);
                Ok(Some((Frame::Psh { stream_id, payload }, 9 + len)))
            }
            FrameType::Keepalive => {
                if body.len() < 9 {
                    return Ok(None);
                }
                let id = (&body[0..8]).get_u64();
                let ack = body[8] != 0;
                Ok(Some((Frame::Keepalive { id, ack }, 10)))
            }
            FrameType::Error => {
                if body.len() < 2 {
                    return Ok(None);
                }
                let len = (&body[0..2]).get_u16() as usize;
                if body.len() < 2 + len {
                    return Ok(None);
                }
                let message = String::from_utf8_lossy(&body[2..2 + len]).into_owned();
                Ok(Some((Frame::Error { message }, 3 + len)))
            }
        }
    }

    fn format(frame: &Frame) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(frame.frame_type() as u8);
        match frame {
            Frame::Syn { stream_id }
            | Frame::SynAck { stream_id }
            | Frame::Fin { stream_id }
            | Frame::Rst { stream_id } => {
                buf.put_u32(*stream_id);
            }
            Frame::Psh { stream_id, payload } => {
                buf.put_u32(*stream_id);
                buf.put_u32(payload.len() as u32);
                buf.put_slice(payload);
            }
            Frame::Keepalive { id, ack } => {
                buf.put_u64(*id);
                buf.put_u8(u8::from(*ack));
            }
            Frame::Error { message } => {
                let msg = message.as_bytes();
                let len = msg.len().min(u16::MAX as usize);
                buf.put_u16(len as u16);
                buf.put_slice(&msg[..len]);
            }
        }
        buf.freeze()
    }
}

impl Default for WireFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl Framer for WireFramer {
    fn client_handshake_message(&mut self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HELLO_LEN);
        buf.put_slice(CLIENT_MAGIC);
        buf.put_u32(self.nonce);
        buf.freeze()
    }

    fn server_handshake_message(&mut self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HELLO_LEN);
        buf.put_slice(SERVER_MAGIC);
        buf.put_u32(self.nonce);
        buf.freeze()
    }

    fn parse_client_handshake(&mut self, buf: &[u8]) -> Result<usize> {
        if buf.len() < HELLO_LEN {
            return Ok(0);
        }
        if &buf[..4] != CLIENT_MAGIC {
            return Err(WeftStreamError::BadHandshake("bad client magic".into()));
        }
        // Adopt the client's nonce so our hello echoes it.
        self.nonce = (&buf[4..8]).get_u32();
        Ok(HELLO_LEN)
    }

    fn parse_server_handshake(&mut self, buf: &[u8]) -> Result<usize> {
        if buf.len() < HELLO_LEN {
            return Ok(0);
        }
        if &buf[..4] != SERVER_MAGIC {
            return Err(WeftStreamError::BadHandshake("bad server magic".into()));
        }
        let echo = (&buf[4..8]).get_u32();
        if echo != self.nonce {
            return Err(WeftStreamError::BadHandshake("nonce mismatch".into()));
        }
        Ok(HELLO_LEN)
    }

    fn client_feed(&mut self, buf: &[u8]) -> Result<Option<(Frame, usize)>> {
        Self::parse_frame(buf)
    }

    fn server_feed(&mut self, buf: &[u8]) -> Result<Option<(Frame, usize)>> {
        Self::parse_frame(buf)
    }

    fn format_syn(&mut self, stream_id: StreamId) -> Bytes {
        Self::format(&Frame::Syn { stream_id })
    }

    fn format_syn_ack(&mut self, stream_id: StreamId) -> Bytes {
        Self::format(&Frame::SynAck { stream_id })
    }

    fn format_psh(&mut self, stream_id: StreamId, payload: &[u8]) -> Bytes {
        Self::format(&Frame::Psh {
            stream_id,
            payload: Bytes::copy_from_slice(payload),
        })
    }

    fn format_fin(&mut self, stream_id: StreamId) -> Bytes {
        Self::format(&Frame::Fin { stream_id })
    }

    fn format_rst(&mut self, stream_id: StreamId) -> Bytes {
        Self::format(&Frame::Rst { stream_id })
    }

    fn format_keepalive(&mut self, id: u64, ack: bool) -> Bytes {
        Self::format(&Frame::Keepalive { id, ack })
    }

    fn format_error(&mut self, message: &str) -> Bytes {
        Self::format(&Frame::Error {
            message: message.to_string(),
        })
    }

    fn next_stream_id(&mut self) -> StreamId {
        let id = self.next_stream_id;
        self.next_stream_id = self.next_stream_id.wrapping_add(2);
        id
    }
}
