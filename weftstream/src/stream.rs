//! Per-stream virtual socket state.
//!
//! Each stream is a TCP-like bidirectional byte channel multiplexed inside
//! one reliable connection. The handler owns every stream through its fd map;
//! the application addresses a stream by id and every mutating operation goes
//! through the handler. A stream participates in the event loop as a virtual
//! fd: its readable/writable edges are software-driven via the [`Selector`].

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use bytes::Bytes;

use weftarq::ByteChain;

use crate::error::{Result, WeftStreamError};
use crate::event::Selector;
use crate::frame::StreamId;

/// Stream state machine states. Transitions are monotone toward `Dead`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Allocated but no SYN sent or accepted yet.
    Idle,
    /// SYN sent, awaiting SYN-ACK (client side).
    SynSent,
    /// Open for bidirectional traffic.
    Established,
    /// Local side sent FIN; can still receive.
    FinSent,
    /// Remote side sent FIN; can still send, reads hit EOF once drained.
    FinRecv,
    /// Terminal.
    Dead,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamState::Idle => write!(f, "Idle"),
            StreamState::SynSent => write!(f, "SynSent"),
            StreamState::Established => write!(f, "Established"),
            StreamState::FinSent => write!(f, "FinSent"),
            StreamState::FinRecv => write!(f, "FinRecv"),
            StreamState::Dead => write!(f, "Dead"),
        }
    }
}

/// Outcome of a stream read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were copied into the destination.
    Bytes(usize),
    /// Nothing buffered right now; wait for the next readable edge.
    WouldBlock,
    /// Orderly end of stream.
    Eof,
}

/// Fabricate the virtual L4 address of a stream: the 32-bit id becomes an
/// IPv4 address (big-endian) and the port comes from the underlying UDP
/// socket, so virtual sockets key into existing selector tables.
pub fn synthetic_addr(id: StreamId, port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::from(id)), port)
}

/// A single multiplexed stream.
pub struct StreamFd {
    id: StreamId,
    state: StreamState,
    local: SocketAddr,
    remote: SocketAddr,
    /// Bytes delivered by the peer, not yet consumed by the application.
    inbound: ByteChain,
    rst: bool,
    rst_reported: bool,
    readable_edge: bool,
    writable_edge: bool,
}

impl StreamFd {
    pub fn new(id: StreamId, local: SocketAddr, remote: SocketAddr) -> Self {
        Self {
            id,
            state: StreamState::Idle,
            local,
            remote,
            inbound: ByteChain::new(),
            rst: false,
            rst_reported: false,
            readable_edge: false,
            writable_edge: false,
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    pub fn is_reset(&self) -> bool {
        self.rst
    }

    pub(crate) fn set_state(&mut self, state: StreamState) {
        self.state = state;
    }

    /// Whether writes are currently allowed by the state machine.
    pub fn writable_state(&self) -> bool {
        matches!(
            self.state,
            StreamState::SynSent | StreamState::Established | StreamState::FinRecv
        )
    }

    /// Copy buffered bytes into `dst`.
    ///
    /// A reset is surfaced as an error exactly once; subsequent reads return
    /// EOF. EOF is also returned once a FIN has been received and the buffer
    /// is drained.
    pub fn read(&mut self, dst: &mut [u8]) -> Result<ReadOutcome> {
        if self.rst && !self.rst_reported {
            self.rst_reported = true;
            return Err(WeftStreamError::StreamReset(self.id));
        }
        if !self.inbound.is_empty() {
            let n = self.inbound.read(dst);
            return Ok(ReadOutcome::Bytes(n));
        }
        match self.state {
            StreamState::FinRecv | StreamState::Dead => Ok(ReadOutcome::Eof),
            _ => Ok(ReadOutcome::WouldBlock),
        }
    }

    /// Called by the handler when a PSH arrives: buffer the payload and
    /// assert the readable edge.
    pub(crate) fn input_data(&mut self, payload: Bytes, sel: &mut dyn Selector) {
        self.inbound.push(payload);
        self.sync_readable(sel);
    }

    /// Mark the stream reset by the peer. Terminal; the next read errors.
    pub(crate) fn set_rst(&mut self, sel: &mut dyn Selector) {
        self.rst = true;
        self.state = StreamState::Dead;
        self.sync_readable(sel);
        self.clear_writable(sel);
    }

    /// Terminal teardown on handler failure: no reset error is surfaced,
    /// the stream simply reaches EOF.
    pub(crate) fn kill(&mut self, sel: &mut dyn Selector) {
        self.state = StreamState::Dead;
        self.clear_writable(sel);
        self.sync_readable(sel);
    }

    pub(crate) fn set_writable(&mut self, sel: &mut dyn Selector) {
        if !self.writable_edge {
            self.writable_edge = true;
            sel.virtual_writable(self.id, true);
        }
    }

    pub(crate) fn clear_writable(&mut self, sel: &mut dyn Selector) {
        if self.writable_edge {
            self.writable_edge = false;
            sel.virtual_writable(self.id, false);
        }
    }

    /// Push the readable edge to the selector if it changed.
    ///
    /// Readable means: bytes are buffered, a reset is observable, or a
    /// received FIN made EOF observable.
    pub(crate) fn sync_readable(&mut self, sel: &mut dyn Selector) {
        let want = self.readable_wanted();
        if want != self.readable_edge {
            self.readable_edge = want;
            sel.virtual_readable(self.id, want);
        }
    }

    /// Retract both edges (stream leaving the map).
    pub(crate) fn retract_edges(&mut self, sel: &mut dyn Selector) {
        if self.readable_edge {
            self.readable_edge = false;
            sel.virtual_readable(self.id, false);
        }
        self.clear_writable(sel);
    }

    fn readable_wanted(&self) -> bool {
        !self.inbound.is_empty()
            || self.rst
            || matches!(self.state, StreamState::FinRecv | StreamState::Dead)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    struct NullSelector;

    impl Selector for NullSelector {
        fn add_ops(&mut self, _ops: crate::event::Ops) {}
        fn rm_ops(&mut self, _ops: crate::event::Ops) {}
        fn delay(&mut self, _millis: u64, _kind: crate::event::TimerKind) -> crate::event::TimerId {
            crate::event::TimerId(0)
        }
        fn cancel(&mut self, _timer: crate::event::TimerId) {}
        fn virtual_readable(&mut self, _stream: StreamId, _on: bool) {}
        fn virtual_writable(&mut self, _stream: StreamId, _on: bool) {}
        fn listener_readable(&mut self, _on: bool) {}
    }

    #[test]
    fn synthetic_addr_big_endian() {
        let addr = synthetic_addr(0x0102_0304, 4242);
        assert_eq!(addr, "1.2.3.4:4242".parse().unwrap());
    }

    #[test]
    fn read_empty_would_block() {
        let mut s = StreamFd::new(1, addr(1), addr(2));
        s.set_state(StreamState::Established);
        let mut dst = [0u8; 4];
        assert_eq!(s.read(&mut dst).unwrap(), ReadOutcome::WouldBlock);
    }

    #[test]
    fn read_buffered_bytes() {
        let mut sel = NullSelector;
        let mut s = StreamFd::new(1, addr(1), addr(2));
        s.set_state(StreamState::Established);
        s.input_data(Bytes::from_static(b"ping"), &mut sel);

        let mut dst = [0u8; 16];
        assert_eq!(s.read(&mut dst).unwrap(), ReadOutcome::Bytes(4));
        assert_eq!(&dst[..4], b"ping");
        assert_eq!(s.read(&mut dst).unwrap(), ReadOutcome::WouldBlock);
    }

    #[test]
    fn fin_recv_reads_drain_then_eof() {
        let mut sel = NullSelector;
        let mut s = StreamFd::new(1, addr(1), addr(2));
        s.set_state(StreamState::Established);
        s.input_data(Bytes::from_static(b"tail"), &mut sel);
        s.set_state(StreamState::FinRecv);

        let mut dst = [0u8; 16];
        assert_eq!(s.read(&mut dst).unwrap(), ReadOutcome::Bytes(4));
        assert_eq!(s.read(&mut dst).unwrap(), ReadOutcome::Eof);
    }

    #[test]
    fn reset_surfaces_exactly_once() {
        let mut sel = NullSelector;
        let mut s = StreamFd::new(9, addr(1), addr(2));
        s.set_state(StreamState::Established);
        s.set_rst(&mut sel);

        let mut dst = [0u8; 4];
        assert!(matches!(
            s.read(&mut dst),
            Err(WeftStreamError::StreamReset(9))
        ));
        assert_eq!(s.read(&mut dst).unwrap(), ReadOutcome::Eof);
        assert_eq!(s.read(&mut dst).unwrap(), ReadOutcome::Eof);
    }

    #[test]
    fn writable_states() {
        let mut s = StreamFd::new(1, addr(1), addr(2));
        assert!(!s.writable_state());
        s.set_state(StreamState::SynSent);
        assert!(s.writable_state());
        s.set_state(StreamState::Established);
        assert!(s.writable_state());
        s.set_state(StreamState::FinRecv);
        assert!(s.writable_state());
        s.set_state(StreamState::FinSent);
        assert!(!s.writable_state());
        s.set_state(StreamState::Dead);
        assert!(!s.writable_state());
    }
}
