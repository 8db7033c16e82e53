//! The streamed-connection state machine.
//!
//! One handler owns one reliable connection: the ARQ adapter underneath, the
//! handshake, the fd map of multiplexed streams, the single write queue that
//! serializes all outgoing frames, and the keepalive machinery. Everything
//! runs on the owning event loop's thread; the handler never blocks, it only
//! parks interest with the [`Selector`] and resumes when an edge fires.
//!
//! Frame transmission order is the write-queue order, except that urgent
//! frames (RST replies, keepalive ACKs, the final error report) jump the
//! queue with `push_message`. Once a frame has started draining into the
//! transport it is finished before the next one begins.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;

use bytes::Bytes;
use tracing::debug;

use weftarq::{ArqAdapter, ArqConfig, ByteChain};

use crate::error::{Result, WeftStreamError};
use crate::event::{Ops, Selector, TimerId, TimerKind};
use crate::frame::{Frame, Framer, StreamId, WireFramer};
use crate::listener::StreamedListener;
use crate::stream::{synthetic_addr, ReadOutcome, StreamFd, StreamState};

/// Which side of the connection this handler is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Handshake phase.
///
/// Numerically this is the classic {0, 1, 2, -1}: `Init` is 0 (client: hello
/// not yet fully written; server: awaiting the client hello), `Negotiating`
/// is 1 (client: hello sent, awaiting the reply; server: own hello being
/// written), `Established` is 2, and `Failed` is the terminal -1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Init,
    Negotiating,
    Established,
    Failed,
}

/// Notifications the owner drains with [`StreamedHandler::poll_event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The handshake completed; streams may now be opened.
    Established,
    /// The connection is gone and the fd should be torn down.
    Invalid(String),
}

/// Connection parameters.
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    pub role: Role,
    pub arq: ArqConfig,
    /// Local address of the underlying UDP socket.
    pub local_addr: SocketAddr,
    /// Remote address of the underlying UDP socket.
    pub remote_addr: SocketAddr,
    /// Handshake deadline.
    pub handshake_timeout_ms: u64,
    /// Per-probe keepalive deadline.
    pub keepalive_timeout_ms: u64,
    /// Grace period between a fatal failure and the invalid notification,
    /// letting the transport deliver the final error frame.
    pub grace_close_ms: u64,
}

impl HandlerConfig {
    pub fn new(role: Role, conv: u32, local_addr: SocketAddr, remote_addr: SocketAddr) -> Self {
        Self {
            role,
            arq: ArqConfig::new(conv),
            local_addr,
            remote_addr,
            handshake_timeout_ms: 5_000,
            keepalive_timeout_ms: 5_000,
            grace_close_ms: 1_000,
        }
    }
}

/// Lost keepalive probes tolerated before the link is declared dead.
const KEEPALIVE_BUDGET: u32 = 2;

struct PendingWrite {
    buf: Bytes,
    offset: usize,
}

/// One streamed connection over one reliable-UDP transport.
pub struct StreamedHandler<F: Framer = WireFramer> {
    role: Role,
    framer: F,
    adapter: ArqAdapter,

    hs: HandshakeState,
    handshake_timer: Option<TimerId>,

    /// Frame currently draining into the transport.
    pending_write: Option<PendingWrite>,
    /// Framed messages awaiting transmission, head first.
    write_queue: VecDeque<Bytes>,
    /// Stream bytes received but not yet consumed by the framer. `None` once
    /// the handler has failed.
    recv_buffer: Option<ByteChain>,

    fd_map: HashMap<StreamId, StreamFd>,
    listener: Option<StreamedListener>,
    accept: Box<dyn FnMut(StreamId) -> bool>,

    keepalive_pending: HashMap<u64, TimerId>,
    next_keepalive_id: u64,
    keepalive_budget: u32,

    failed: bool,
    fail_reason: Option<String>,
    events: VecDeque<Event>,

    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    handshake_timeout_ms: u64,
    keepalive_timeout_ms: u64,
    grace_close_ms: u64,
}

impl StreamedHandler<WireFramer> {
    pub fn new(config: HandlerConfig) -> Self {
        Self::with_framer(config, WireFramer::new())
    }
}

impl<F: Framer> StreamedHandler<F> {
    pub fn with_framer(config: HandlerConfig, framer: F) -> Self {
        Self {
            role: config.role,
            framer,
            adapter: ArqAdapter::new(config.arq),
            hs: HandshakeState::Init,
            handshake_timer: None,
            pending_write: None,
            write_queue: VecDeque::new(),
            recv_buffer: Some(ByteChain::new()),
            fd_map: HashMap::new(),
            listener: None,
            accept: Box::new(|_| true),
            keepalive_pending: HashMap::new(),
            next_keepalive_id: 0,
            keepalive_budget: KEEPALIVE_BUDGET,
            failed: false,
            fail_reason: None,
            events: VecDeque::new(),
            local_addr: config.local_addr,
            remote_addr: config.remote_addr,
            handshake_timeout_ms: config.handshake_timeout_ms,
            keepalive_timeout_ms: config.keepalive_timeout_ms,
            grace_close_ms: config.grace_close_ms,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn handshake_state(&self) -> HandshakeState {
        self.hs
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn stream(&self, id: StreamId) -> Option<&StreamFd> {
        self.fd_map.get(&id)
    }

    pub fn stream_count(&self) -> usize {
        self.fd_map.len()
    }

    /// Replace the accept predicate consulted for every incoming SYN.
    pub fn set_accept(&mut self, accept: impl FnMut(StreamId) -> bool + 'static) {
        self.accept = Box::new(accept);
    }

    /// Next notification for the owner, if any.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Next datagram to send on the UDP socket, if any.
    pub fn poll_transmit(&mut self) -> Option<Bytes> {
        self.adapter.poll_transmit()
    }

    /// Whether the transport currently accepts frame bytes.
    pub fn transport_can_write(&self) -> bool {
        self.adapter.can_write()
    }

    // ------------------------------------------------------------------
    // Lifecycle entry points driven by the event loop
    // ------------------------------------------------------------------

    /// The underlying transport is connected: start (client) or await
    /// (server) the handshake.
    pub fn connected(&mut self, sel: &mut dyn Selector) {
        match self.role {
            Role::Client => {
                self.handshake_timer =
                    Some(sel.delay(self.handshake_timeout_ms, TimerKind::Handshake));
                let hello = self.framer.client_handshake_message();
                match self.write_direct(hello, sel) {
                    Ok(true) => {
                        self.hs = HandshakeState::Negotiating;
                        sel.rm_ops(Ops::WRITABLE);
                        sel.add_ops(Ops::READABLE);
                    }
                    Ok(false) => {
                        // Stay in Init; the writable edge finishes the hello.
                    }
                    Err(e) => {
                        let reason = e.to_string();
                        self.fail(&reason, true, sel);
                    }
                }
            }
            Role::Server => {
                sel.add_ops(Ops::READABLE);
            }
        }
    }

    /// A datagram arrived on the underlying socket.
    pub fn readable(&mut self, datagram: &[u8], sel: &mut dyn Selector) {
        if self.failed {
            return;
        }
        match self.adapter.parse(datagram) {
            Ok(Some(bytes)) => {
                if let Some(buf) = self.recv_buffer.as_mut() {
                    buf.push(bytes);
                }
                self.process(sel);
            }
            Ok(None) => {}
            Err(e) => {
                let reason = e.to_string();
                self.fail(&reason, true, sel);
            }
        }
    }

    /// The transport reported write capacity: run the write engine.
    pub fn writable(&mut self, sel: &mut dyn Selector) {
        loop {
            if let Some(pw) = self.pending_write.as_mut() {
                let n = match self.adapter.write(&pw.buf[pw.offset..]) {
                    Ok(n) => n,
                    Err(e) => {
                        let reason = e.to_string();
                        self.fail(&reason, true, sel);
                        return;
                    }
                };
                pw.offset += n;
                if pw.offset < pw.buf.len() {
                    // Transport is full mid-frame: downstream streams cannot
                    // make progress until it drains.
                    for st in self.fd_map.values_mut() {
                        if st.state() == StreamState::Established {
                            st.clear_writable(sel);
                        }
                    }
                    return;
                }
                self.pending_write = None;
            }

            if matches!(self.hs, HandshakeState::Init | HandshakeState::Negotiating) {
                self.handshake_writable(sel);
                return;
            }

            match self.write_queue.pop_front() {
                None => {
                    sel.rm_ops(Ops::WRITABLE);
                    for st in self.fd_map.values_mut() {
                        if st.state() == StreamState::Established {
                            st.set_writable(sel);
                        }
                    }
                    return;
                }
                Some(msg) => {
                    self.pending_write = Some(PendingWrite {
                        buf: msg,
                        offset: 0,
                    });
                    for st in self.fd_map.values_mut() {
                        if st.state() == StreamState::Established {
                            st.set_writable(sel);
                        }
                    }
                }
            }
        }
    }

    /// Drive the ARQ clock; call on at least a 10 ms cadence.
    pub fn tick(&mut self, now_ms: u32, sel: &mut dyn Selector) {
        if self.failed {
            // Keep the engine flushing so the final error frame gets its
            // retransmissions during the grace period.
            let _ = self.adapter.clock(now_ms);
            return;
        }
        if let Err(e) = self.adapter.clock(now_ms) {
            let reason = e.to_string();
            self.fail(&reason, true, sel);
        }
    }

    /// External keepalive cadence: probe only when the link is idle, so a
    /// loaded link never counts as dead.
    pub fn probe(&mut self, sel: &mut dyn Selector) {
        if self.failed || self.hs != HandshakeState::Established {
            return;
        }
        if self.pending_write.is_some() || !self.write_queue.is_empty() {
            return;
        }
        self.next_keepalive_id += 1;
        let kid = self.next_keepalive_id;
        let timer = sel.delay(self.keepalive_timeout_ms, TimerKind::Keepalive(kid));
        self.keepalive_pending.insert(kid, timer);
        let msg = self.framer.format_keepalive(kid, false);
        self.push_message(msg, sel);
    }

    /// A timer armed through the selector fired.
    pub fn handle_timer(&mut self, kind: TimerKind, sel: &mut dyn Selector) {
        match kind {
            TimerKind::Handshake => {
                if !self.failed && self.hs != HandshakeState::Established {
                    self.fail("handshake timed out", true, sel);
                }
            }
            TimerKind::Keepalive(kid) => {
                if self.failed {
                    return;
                }
                if self.keepalive_pending.remove(&kid).is_some() {
                    if self.keepalive_budget == 0 {
                        self.fail("keepalive response timeout", true, sel);
                    } else {
                        self.keepalive_budget -= 1;
                    }
                }
            }
            TimerKind::DelayedInvalid => {
                let reason = self.fail_reason.clone().unwrap_or_default();
                self.events.push_back(Event::Invalid(reason));
            }
        }
    }

    /// The underlying fd was removed from the loop: fatal, and nothing can
    /// be flushed anymore, so the invalid notification is immediate.
    pub fn removed_from_loop(&mut self, sel: &mut dyn Selector) {
        self.fail("arq udp socket removed from loop", false, sel);
    }

    // ------------------------------------------------------------------
    // Stream API
    // ------------------------------------------------------------------

    /// Allocate a fresh client-initiated stream. The caller must follow up
    /// with [`send_syn`](Self::send_syn) to actually open it.
    pub fn open_stream(&mut self) -> Result<StreamId> {
        if self.hs != HandshakeState::Established {
            return Err(WeftStreamError::NotEstablished);
        }
        let id = self.framer.next_stream_id();
        if self.fd_map.contains_key(&id) {
            return Err(WeftStreamError::StreamAlreadyExists(id));
        }
        let stream = self.materialize_stream(id);
        self.fd_map.insert(id, stream);
        Ok(id)
    }

    /// Emit the SYN for a freshly opened stream.
    pub fn send_syn(&mut self, id: StreamId, sel: &mut dyn Selector) -> Result<()> {
        let state = self.stream_state(id)?;
        if state != StreamState::Idle {
            return Err(WeftStreamError::InvalidStreamState {
                op: "send_syn",
                state: state.to_string(),
            });
        }
        let msg = self.framer.format_syn(id);
        self.queue_message(msg, sel);
        if let Some(st) = self.fd_map.get_mut(&id) {
            st.set_state(StreamState::SynSent);
        }
        Ok(())
    }

    /// Frame `data` as a PSH on stream `id`. The framer copies the bytes, so
    /// the full length is reported written. Empty writes do not frame.
    pub fn stream_write(
        &mut self,
        id: StreamId,
        data: &[u8],
        sel: &mut dyn Selector,
    ) -> Result<usize> {
        let st = self
            .fd_map
            .get(&id)
            .ok_or(WeftStreamError::StreamNotFound(id))?;
        if !st.writable_state() {
            return Err(WeftStreamError::InvalidStreamState {
                op: "write",
                state: st.state().to_string(),
            });
        }
        if data.is_empty() {
            return Ok(0);
        }
        let msg = self.framer.format_psh(id, data);
        self.queue_message(msg, sel);
        Ok(data.len())
    }

    /// Copy received bytes into `dst`. Resets surface as an error exactly
    /// once; a dead stream leaves the fd map once EOF has been observed.
    pub fn stream_read(
        &mut self,
        id: StreamId,
        dst: &mut [u8],
        sel: &mut dyn Selector,
    ) -> Result<ReadOutcome> {
        let st = self
            .fd_map
            .get_mut(&id)
            .ok_or(WeftStreamError::StreamNotFound(id))?;
        let outcome = st.read(dst);
        st.sync_readable(sel);
        let drop_entry = matches!(outcome, Ok(ReadOutcome::Eof)) && st.state() == StreamState::Dead;
        if drop_entry {
            if let Some(mut st) = self.fd_map.remove(&id) {
                st.retract_edges(sel);
            }
        }
        outcome
    }

    /// Orderly close of the local side.
    ///
    /// From `Idle`, `SynSent` or `FinRecv` the stream dies immediately and
    /// leaves the map; from `Established` it moves to `FinSent`; a repeated
    /// close is a no-op; closing a dead stream is an error.
    pub fn send_fin(&mut self, id: StreamId, sel: &mut dyn Selector) -> Result<()> {
        let state = self.stream_state(id)?;
        match state {
            StreamState::Idle | StreamState::SynSent | StreamState::FinRecv => {
                let msg = self.framer.format_fin(id);
                self.queue_message(msg, sel);
                if let Some(mut st) = self.fd_map.remove(&id) {
                    st.set_state(StreamState::Dead);
                    st.retract_edges(sel);
                }
                Ok(())
            }
            StreamState::Established => {
                let msg = self.framer.format_fin(id);
                self.queue_message(msg, sel);
                if let Some(st) = self.fd_map.get_mut(&id) {
                    st.set_state(StreamState::FinSent);
                    st.clear_writable(sel);
                }
                Ok(())
            }
            StreamState::FinSent => Ok(()),
            StreamState::Dead => Err(WeftStreamError::StreamClosed(id)),
        }
    }

    /// Abrupt close: emit an urgent RST and drop the stream.
    pub fn send_rst(&mut self, id: StreamId, sel: &mut dyn Selector) -> Result<()> {
        let state = self.stream_state(id)?;
        if state == StreamState::Dead {
            return Err(WeftStreamError::StreamClosed(id));
        }
        let msg = self.framer.format_rst(id);
        self.push_message(msg, sel);
        if let Some(mut st) = self.fd_map.remove(&id) {
            st.set_state(StreamState::Dead);
            st.retract_edges(sel);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Listener
    // ------------------------------------------------------------------

    /// Create the accept surface for the server role. At most one listener
    /// exists per connection.
    pub fn create_listener(&mut self) -> Result<()> {
        if self.listener.is_some() {
            return Err(WeftStreamError::DuplicateListener);
        }
        self.listener = Some(StreamedListener::new());
        Ok(())
    }

    /// Pop the next established incoming stream.
    pub fn accept(&mut self, sel: &mut dyn Selector) -> Result<Option<StreamId>> {
        let listener = self
            .listener
            .as_mut()
            .ok_or(WeftStreamError::NoListener)?;
        Ok(listener.accept(sel))
    }

    // ------------------------------------------------------------------
    // Handshake and framer plumbing
    // ------------------------------------------------------------------

    fn process(&mut self, sel: &mut dyn Selector) {
        match (self.role, self.hs) {
            (Role::Server, HandshakeState::Init) => {
                let parsed = {
                    let Some(buf) = self.recv_buffer.as_mut() else {
                        return;
                    };
                    let view = buf.coalesce();
                    self.framer.parse_client_handshake(view)
                };
                match parsed {
                    Err(e) => {
                        let reason = e.to_string();
                        self.fail(&reason, true, sel);
                        return;
                    }
                    Ok(0) => return,
                    Ok(n) => {
                        if let Some(buf) = self.recv_buffer.as_mut() {
                            buf.skip(n);
                        }
                        self.handshake_timer =
                            Some(sel.delay(self.handshake_timeout_ms, TimerKind::Handshake));
                        let hello = self.framer.server_handshake_message();
                        self.hs = HandshakeState::Negotiating;
                        match self.write_direct(hello, sel) {
                            Ok(true) => self.handshake_done(sel),
                            Ok(false) => {}
                            Err(e) => {
                                let reason = e.to_string();
                                self.fail(&reason, true, sel);
                                return;
                            }
                        }
                    }
                }
            }
            (Role::Client, HandshakeState::Negotiating) => {
                let parsed = {
                    let Some(buf) = self.recv_buffer.as_mut() else {
                        return;
                    };
                    let view = buf.coalesce();
                    self.framer.parse_server_handshake(view)
                };
                match parsed {
                    Err(e) => {
                        let reason = e.to_string();
                        self.fail(&reason, true, sel);
                        return;
                    }
                    Ok(0) => return,
                    Ok(n) => {
                        if let Some(buf) = self.recv_buffer.as_mut() {
                            buf.skip(n);
                        }
                        self.handshake_done(sel);
                    }
                }
            }
            _ => {}
        }

        if self.hs == HandshakeState::Established {
            self.pump_frames(sel);
        }
    }

    fn handshake_done(&mut self, sel: &mut dyn Selector) {
        self.hs = HandshakeState::Established;
        if let Some(timer) = self.handshake_timer.take() {
            sel.cancel(timer);
        }
        if self.pending_write.is_none() && self.write_queue.is_empty() {
            sel.rm_ops(Ops::WRITABLE);
        }
        sel.add_ops(Ops::READABLE);
        self.events.push_back(Event::Established);
    }

    /// Handshake advancement on a writable edge, entered only with the
    /// pending buffer fully drained.
    fn handshake_writable(&mut self, sel: &mut dyn Selector) {
        match (self.role, self.hs) {
            (Role::Client, HandshakeState::Init) => {
                self.hs = HandshakeState::Negotiating;
                sel.rm_ops(Ops::WRITABLE);
                sel.add_ops(Ops::READABLE);
            }
            (Role::Server, HandshakeState::Negotiating) => {
                self.handshake_done(sel);
                self.pump_frames(sel);
            }
            _ => {
                sel.rm_ops(Ops::WRITABLE);
            }
        }
    }

    /// Write `msg` straight to the transport; on partial acceptance the
    /// remainder becomes the pending buffer and writable interest is kept.
    fn write_direct(&mut self, msg: Bytes, sel: &mut dyn Selector) -> Result<bool> {
        let n = self.adapter.write(&msg)?;
        if n == msg.len() {
            Ok(true)
        } else {
            self.pending_write = Some(PendingWrite {
                buf: msg,
                offset: n,
            });
            sel.add_ops(Ops::WRITABLE);
            Ok(false)
        }
    }

    /// Parse and dispatch frames until the framer needs more bytes.
    fn pump_frames(&mut self, sel: &mut dyn Selector) {
        enum Step {
            NeedMore,
            Frame(Frame),
            Fail(String),
        }
        loop {
            if self.failed {
                return;
            }
            let step = {
                let Some(buf) = self.recv_buffer.as_mut() else {
                    return;
                };
                if buf.is_empty() {
                    return;
                }
                let parsed = {
                    let view = buf.coalesce();
                    match self.role {
                        Role::Client => self.framer.client_feed(view),
                        Role::Server => self.framer.server_feed(view),
                    }
                };
                match parsed {
                    Ok(Some((frame, n))) => {
                        buf.skip(n);
                        Step::Frame(frame)
                    }
                    Ok(None) => Step::NeedMore,
                    Err(e) => Step::Fail(e.to_string()),
                }
            };
            match step {
                Step::NeedMore => return,
                Step::Fail(reason) => {
                    self.fail(&reason, true, sel);
                    return;
                }
                Step::Frame(frame) => self.on_frame(frame, sel),
            }
        }
    }

    fn on_frame(&mut self, frame: Frame, sel: &mut dyn Selector) {
        match frame {
            Frame::Psh { stream_id, payload } => match self.fd_map.get_mut(&stream_id) {
                Some(st) => {
                    st.input_data(payload, sel);
                }
                None => debug!(stream = stream_id, "PSH for unknown stream, dropped"),
            },
            Frame::Syn { stream_id } => self.on_syn(stream_id, sel),
            Frame::SynAck { stream_id } => self.on_syn_ack(stream_id, sel),
            Frame::Fin { stream_id } => self.on_fin(stream_id, sel),
            Frame::Rst { stream_id } => self.on_rst(stream_id, sel),
            Frame::Keepalive { id, ack: true } => {
                if let Some(timer) = self.keepalive_pending.remove(&id) {
                    sel.cancel(timer);
                    self.keepalive_budget = (self.keepalive_budget + 1).min(KEEPALIVE_BUDGET);
                } else {
                    debug!(kid = id, "keepalive ACK without a pending probe");
                }
            }
            Frame::Keepalive { id, ack: false } => {
                // Reply ahead of everything still queued.
                let msg = self.framer.format_keepalive(id, true);
                self.push_message(msg, sel);
            }
            Frame::Error { message } => {
                self.fail(&message, false, sel);
            }
        }
    }

    fn on_syn(&mut self, id: StreamId, sel: &mut dyn Selector) {
        if self.role != Role::Server {
            debug!(stream = id, "SYN on the client side, dropped");
            return;
        }
        if self.fd_map.contains_key(&id) {
            debug!(stream = id, "SYN for existing stream, dropped");
            return;
        }
        let stream = self.materialize_stream(id);
        self.fd_map.insert(id, stream);
        if (self.accept)(id) {
            if let Some(st) = self.fd_map.get_mut(&id) {
                st.set_state(StreamState::Established);
            }
            let msg = self.framer.format_syn_ack(id);
            self.queue_message(msg, sel);
            if self.pending_write.is_none() {
                if let Some(st) = self.fd_map.get_mut(&id) {
                    st.set_writable(sel);
                }
            }
            if let Some(listener) = self.listener.as_mut() {
                listener.push(id, sel);
            }
        } else {
            let reason = format!("accepting {id} failed: rejected by accept callback");
            self.fail(&reason, true, sel);
        }
    }

    fn on_syn_ack(&mut self, id: StreamId, sel: &mut dyn Selector) {
        if self.role != Role::Client {
            debug!(stream = id, "SYN-ACK on the server side, dropped");
            return;
        }
        match self.fd_map.get_mut(&id) {
            Some(st) if st.state() == StreamState::SynSent => {
                st.set_state(StreamState::Established);
                if self.pending_write.is_none() {
                    st.set_writable(sel);
                }
            }
            Some(st) => {
                debug!(
                    stream = id,
                    state = %st.state(),
                    "SYN-ACK in unexpected state, dropped"
                );
            }
            None => debug!(stream = id, "SYN-ACK for unknown stream, dropped"),
        }
    }

    fn on_fin(&mut self, id: StreamId, sel: &mut dyn Selector) {
        match self.fd_map.get(&id).map(|s| s.state()) {
            Some(StreamState::Established) => {
                if let Some(st) = self.fd_map.get_mut(&id) {
                    st.set_state(StreamState::FinRecv);
                    st.sync_readable(sel);
                }
            }
            Some(_) => {
                // FIN anywhere else finishes the stream outright.
                if let Some(mut st) = self.fd_map.remove(&id) {
                    st.set_state(StreamState::Dead);
                    st.retract_edges(sel);
                }
            }
            None => debug!(stream = id, "FIN for unknown stream, dropped"),
        }
    }

    fn on_rst(&mut self, id: StreamId, sel: &mut dyn Selector) {
        match self.fd_map.get_mut(&id) {
            Some(st) => {
                st.set_rst(sel);
                let msg = self.framer.format_rst(id);
                self.push_message(msg, sel);
            }
            None => debug!(stream = id, "RST for unknown stream, dropped"),
        }
    }

    // ------------------------------------------------------------------
    // Write queue
    // ------------------------------------------------------------------

    /// Append a framed message; empty messages are discarded. Safe to call
    /// re-entrantly while a writable edge is being serviced.
    fn queue_message(&mut self, msg: Bytes, sel: &mut dyn Selector) {
        if msg.is_empty() {
            return;
        }
        self.write_queue.push_back(msg);
        sel.add_ops(Ops::WRITABLE);
    }

    /// Head-insert an urgent message (RST reply, keepalive ACK, final error
    /// report). It jumps ahead of everything not already mid-drain.
    fn push_message(&mut self, msg: Bytes, sel: &mut dyn Selector) {
        if msg.is_empty() {
            return;
        }
        self.write_queue.push_front(msg);
        sel.add_ops(Ops::WRITABLE);
    }

    // ------------------------------------------------------------------
    // Failure
    // ------------------------------------------------------------------

    /// The single terminal path. Idempotent. With `send_rst` a best-effort
    /// error frame jumps the queue and the invalid notification is delayed
    /// by the grace period; without it the notification is immediate.
    fn fail(&mut self, reason: &str, send_rst: bool, sel: &mut dyn Selector) {
        if self.failed {
            return;
        }
        self.failed = true;
        self.fail_reason = Some(reason.to_string());
        debug!(reason, "streamed handler failed");

        for st in self.fd_map.values_mut() {
            st.kill(sel);
        }
        self.hs = HandshakeState::Failed;
        self.recv_buffer = None;

        if send_rst {
            let msg = self.framer.format_error(reason);
            self.push_message(msg, sel);
            sel.delay(self.grace_close_ms, TimerKind::DelayedInvalid);
        } else {
            self.events.push_back(Event::Invalid(reason.to_string()));
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn stream_state(&self, id: StreamId) -> Result<StreamState> {
        self.fd_map
            .get(&id)
            .map(|s| s.state())
            .ok_or(WeftStreamError::StreamNotFound(id))
    }

    /// Fabricate the stream with its virtual address pair: the id plays the
    /// IPv4 address, the UDP socket supplies the port (our own local port on
    /// the client, the peer's port on the server).
    fn materialize_stream(&self, id: StreamId) -> StreamFd {
        match self.role {
            Role::Client => StreamFd::new(
                id,
                synthetic_addr(id, self.local_addr.port()),
                self.remote_addr,
            ),
            Role::Server => StreamFd::new(
                id,
                self.local_addr,
                synthetic_addr(id, self.remote_addr.port()),
            ),
        }
    }
}
