//! Contract between the handler and its owning event loop.
//!
//! The loop itself lives outside this crate. The handler only needs the
//! operations below: interest registration on the underlying datagram fd,
//! one-shot timers, and virtual readiness edges for the derived stream fds.
//! Timer callbacks are expressed as tokens: `delay` records a [`TimerKind`],
//! and when the deadline passes the loop hands that token back through
//! `StreamedHandler::handle_timer`.

use std::collections::HashSet;

use parking_lot::Mutex;

use crate::frame::StreamId;

/// Interest-ops bitset for the underlying datagram fd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ops(pub u8);

impl Ops {
    pub const NONE: Self = Self(0x00);
    pub const READABLE: Self = Self(0x01);
    pub const WRITABLE: Self = Self(0x02);

    pub fn contains(self, other: Ops) -> bool {
        (self.0 & other.0) == other.0
    }

    pub fn insert(&mut self, other: Ops) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Ops) {
        self.0 &= !other.0;
    }
}

/// Handle for a timer armed through [`Selector::delay`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

/// What a timer means to the handler; handed back verbatim on expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// The 5000 ms handshake deadline.
    Handshake,
    /// A keepalive probe awaiting its ACK.
    Keepalive(u64),
    /// The 1000 ms grace period between a fatal failure and the invalid
    /// notification, giving the transport a chance to flush the error frame.
    DelayedInvalid,
}

/// The slice of the event loop the handler drives.
pub trait Selector {
    /// Add interest ops on the underlying datagram fd.
    fn add_ops(&mut self, ops: Ops);

    /// Remove interest ops on the underlying datagram fd.
    fn rm_ops(&mut self, ops: Ops);

    /// Arm a one-shot timer; the loop calls `handle_timer(kind)` on expiry.
    fn delay(&mut self, millis: u64, kind: TimerKind) -> TimerId;

    /// Cancel a previously armed timer. Canceling an already-fired timer is
    /// a no-op.
    fn cancel(&mut self, timer: TimerId);

    /// Assert or retract the virtual-readable edge of a stream fd.
    fn virtual_readable(&mut self, stream: StreamId, on: bool);

    /// Assert or retract the virtual-writable edge of a stream fd.
    fn virtual_writable(&mut self, stream: StreamId, on: bool);

    /// Assert or retract the virtual-readable edge of the listener fd.
    fn listener_readable(&mut self, on: bool);
}

/// Second-level ready set for virtual fds.
///
/// Loop implementations merge this with OS-level readiness each poll cycle
/// before dispatching. It is the only piece of state shared across layers;
/// everything else is owned by the loop thread.
#[derive(Debug, Default)]
pub struct ReadySet {
    readable: Mutex<HashSet<StreamId>>,
    writable: Mutex<HashSet<StreamId>>,
}

impl ReadySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish_readable(&self, stream: StreamId) {
        self.readable.lock().insert(stream);
    }

    pub fn retract_readable(&self, stream: StreamId) {
        self.readable.lock().remove(&stream);
    }

    pub fn publish_writable(&self, stream: StreamId) {
        self.writable.lock().insert(stream);
    }

    pub fn retract_writable(&self, stream: StreamId) {
        self.writable.lock().remove(&stream);
    }

    /// Snapshot the readable set without clearing it (edges are retracted by
    /// their owners, not by polling).
    pub fn readable(&self) -> Vec<StreamId> {
        self.readable.lock().iter().copied().collect()
    }

    pub fn writable(&self) -> Vec<StreamId> {
        self.writable.lock().iter().copied().collect()
    }

    pub fn is_readable(&self, stream: StreamId) -> bool {
        self.readable.lock().contains(&stream)
    }

    pub fn is_writable(&self, stream: StreamId) -> bool {
        self.writable.lock().contains(&stream)
    }
}
