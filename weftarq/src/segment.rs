//! ARQ wire segments.
//!
//! Binary layout (all fields big-endian), 24-byte header:
//!
//! ```text
//! +------+-----+-----+-----+------+------+------+------+---------+
//! | conv | cmd | frg | wnd |  ts  |  sn  |  una | len  | payload |
//! | (4B) | (1B)| (1B)| (2B)| (4B) | (4B) | (4B) | (4B) |  (len)  |
//! +------+-----+-----+-----+------+------+------+------+---------+
//! ```
//!
//! A datagram may carry several segments back-to-back.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{ArqError, Result};

/// Size of the fixed segment header in bytes.
pub const HEADER_LEN: usize = 24;

/// Segment command codes (classic KCP numbering).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cmd {
    /// Data push.
    Push = 81,
    /// Acknowledgement of one sequence number.
    Ack = 82,
    /// Window probe: ask the peer to report its receive window.
    WndAsk = 83,
    /// Window report, sent in response to a probe or on window recovery.
    WndTell = 84,
}

impl TryFrom<u8> for Cmd {
    type Error = ArqError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            81 => Ok(Cmd::Push),
            82 => Ok(Cmd::Ack),
            83 => Ok(Cmd::WndAsk),
            84 => Ok(Cmd::WndTell),
            other => Err(ArqError::UnknownCommand(other)),
        }
    }
}

/// One wire segment plus its sender-side retransmission state.
///
/// The retransmission fields (`resend_ts`, `rto`, `fastack`, `xmit`) are only
/// meaningful for segments sitting in the engine's send buffer; they are never
/// serialized.
#[derive(Debug, Clone)]
pub struct Segment {
    pub conv: u32,
    pub cmd: Cmd,
    pub frg: u8,
    pub wnd: u16,
    pub ts: u32,
    pub sn: u32,
    pub una: u32,
    pub payload: BytesMut,

    // Sender-side bookkeeping, not on the wire.
    pub resend_ts: u32,
    pub rto: u32,
    pub fastack: u32,
    pub xmit: u32,
}

impl Segment {
    pub fn new(conv: u32, cmd: Cmd) -> Self {
        Self {
            conv,
            cmd,
            frg: 0,
            wnd: 0,
            ts: 0,
            sn: 0,
            una: 0,
            payload: BytesMut::new(),
            resend_ts: 0,
            rto: 0,
            fastack: 0,
            xmit: 0,
        }
    }

    /// Total encoded size: header plus payload.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Append the wire form of this segment to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u32(self.conv);
        buf.put_u8(self.cmd as u8);
        buf.put_u8(self.frg);
        buf.put_u16(self.wnd);
        buf.put_u32(self.ts);
        buf.put_u32(self.sn);
        buf.put_u32(self.una);
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);
    }

    /// Decode one segment from the front of `data`.
    ///
    /// Returns the segment and the number of bytes consumed. `data` must hold
    /// at least a full header; a declared payload length that overruns the
    /// buffer is an error (datagrams arrive whole or not at all).
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < HEADER_LEN {
            return Err(ArqError::TruncatedSegment(data.len()));
        }
        let mut hdr = &data[..HEADER_LEN];
        let conv = hdr.get_u32();
        let cmd = Cmd::try_from(hdr.get_u8())?;
        let frg = hdr.get_u8();
        let wnd = hdr.get_u16();
        let ts = hdr.get_u32();
        let sn = hdr.get_u32();
        let una = hdr.get_u32();
        let len = hdr.get_u32() as usize;

        let remaining = data.len() - HEADER_LEN;
        if len > remaining {
            return Err(ArqError::LengthOverrun { len, remaining });
        }
        let payload = BytesMut::from(&data[HEADER_LEN..HEADER_LEN + len]);

        Ok((
            Self {
                conv,
                cmd,
                frg,
                wnd,
                ts,
                sn,
                una,
                payload,
                resend_ts: 0,
                rto: 0,
                fastack: 0,
                xmit: 0,
            },
            HEADER_LEN + len,
        ))
    }
}
