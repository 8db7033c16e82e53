//! KCP-style ARQ engine.
//!
//! Selective repeat with per-segment RTO, duplicate-ACK fast retransmit,
//! window probing for zero remote windows, and Jacobson/Karels RTT smoothing
//! (integer arithmetic, milliseconds). The engine is sans-IO: `input` feeds
//! received datagrams, `update` drives the 10 ms clock, and emitted datagrams
//! are drained with `poll_transmit`.
//!
//! The engine always runs in stream mode: `send` tops up the tail segment to
//! the MSS, so the receive side reassembles a byte stream rather than message
//! records.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

use crate::error::{ArqError, Result};
use crate::segment::{Cmd, Segment, HEADER_LEN};

/// Default RTO before any RTT sample.
const RTO_DEF: u32 = 200;
/// RTO floor in normal mode.
const RTO_MIN: u32 = 100;
/// RTO floor in no-delay mode.
const RTO_NODELAY_MIN: u32 = 30;
/// RTO ceiling.
const RTO_MAX: u32 = 60_000;
/// Retransmission count at which the link is declared dead.
const DEAD_LINK: u32 = 20;
/// Initial and minimum slow-start threshold, in segments.
const THRESH_INIT: u16 = 2;
/// Initial window-probe backoff.
const PROBE_INIT: u32 = 7_000;
/// Window-probe backoff ceiling.
const PROBE_LIMIT: u32 = 120_000;
/// Send queue capacity, as a multiple of the send window.
const SND_QUEUE_FACTOR: usize = 2;

/// Signed difference between two wrapping millisecond timestamps.
#[inline]
fn time_diff(later: u32, earlier: u32) -> i32 {
    later.wrapping_sub(earlier) as i32
}

/// Engine tuning knobs.
///
/// The defaults encode the "fast3" profile, `nodelay(true, 10, 2, true)`:
/// no-delay RTO growth with a 30 ms floor, a 10 ms internal clock, fast
/// retransmit after 2 duplicate ACKs, and the congestion window disabled.
/// Both endpoints must run the same profile; do not change it silently.
#[derive(Debug, Clone)]
pub struct ArqConfig {
    /// Conversation id; both endpoints must agree, mismatches are fatal.
    pub conv: u32,
    /// Maximum datagram size, header included.
    pub mtu: usize,
    /// Send window, in segments.
    pub snd_wnd: u16,
    /// Receive window, in segments.
    pub rcv_wnd: u16,
    /// No-delay mode: gentler RTO backoff (x1.5) and a 30 ms RTO floor.
    pub nodelay: bool,
    /// Internal clock interval in milliseconds.
    pub interval: u32,
    /// Duplicate-ACK count that triggers fast retransmit (0 disables).
    pub fast_resend: u32,
    /// Disable the congestion window (send at the flow-control window).
    pub no_cwnd: bool,
}

impl ArqConfig {
    pub fn new(conv: u32) -> Self {
        Self {
            conv,
            mtu: 1400,
            snd_wnd: 32,
            rcv_wnd: 128,
            nodelay: true,
            interval: 10,
            fast_resend: 2,
            no_cwnd: true,
        }
    }
}

impl Default for ArqConfig {
    fn default() -> Self {
        Self::new(0)
    }
}

/// The ARQ engine proper.
pub struct ArqEngine {
    conv: u32,
    mtu: usize,
    mss: usize,
    dead: bool,

    snd_una: u32,
    snd_nxt: u32,
    rcv_nxt: u32,

    rx_srtt: i32,
    rx_rttval: i32,
    rx_rto: u32,
    rx_minrto: u32,

    snd_wnd: u16,
    rcv_wnd: u16,
    rmt_wnd: u16,
    cwnd: u16,
    ssthresh: u16,
    incr: u32,

    probe_ask: bool,
    probe_tell: bool,
    ts_probe: u32,
    probe_wait: u32,

    current: u32,
    interval: u32,
    ts_flush: u32,
    updated: bool,

    nodelay: bool,
    fast_resend: u32,
    no_cwnd: bool,

    snd_queue: VecDeque<Segment>,
    snd_buf: VecDeque<Segment>,
    rcv_buf: VecDeque<Segment>,
    rcv_queue: VecDeque<Segment>,
    acklist: Vec<(u32, u32)>,

    transmit_queue: VecDeque<Bytes>,
}

impl ArqEngine {
    pub fn new(config: ArqConfig) -> Self {
        let mss = config.mtu.saturating_sub(HEADER_LEN).max(1);
        Self {
            conv: config.conv,
            mtu: config.mtu,
            mss,
            dead: false,
            snd_una: 0,
            snd_nxt: 0,
            rcv_nxt: 0,
            rx_srtt: 0,
            rx_rttval: 0,
            rx_rto: RTO_DEF,
            rx_minrto: if config.nodelay { RTO_NODELAY_MIN } else { RTO_MIN },
            snd_wnd: config.snd_wnd,
            rcv_wnd: config.rcv_wnd,
            rmt_wnd: config.rcv_wnd,
            cwnd: 1,
            ssthresh: THRESH_INIT,
            incr: mss as u32,
            probe_ask: false,
            probe_tell: false,
            ts_probe: 0,
            probe_wait: 0,
            current: 0,
            interval: config.interval.max(1),
            ts_flush: 0,
            updated: false,
            nodelay: config.nodelay,
            fast_resend: config.fast_resend,
            no_cwnd: config.no_cwnd,
            snd_queue: VecDeque::new(),
            snd_buf: VecDeque::new(),
            rcv_buf: VecDeque::new(),
            rcv_queue: VecDeque::new(),
            acklist: Vec::new(),
            transmit_queue: VecDeque::new(),
        }
    }

    pub fn conv(&self) -> u32 {
        self.conv
    }

    /// False once any segment has been retransmitted past the give-up
    /// threshold; the connection is then unusable.
    pub fn is_alive(&self) -> bool {
        !self.dead
    }

    /// Whether `send` would accept at least one byte.
    pub fn can_send(&self) -> bool {
        !self.dead && self.snd_queue.len() < self.snd_wnd as usize * SND_QUEUE_FACTOR
    }

    /// Segments queued or in flight but not yet acknowledged.
    pub fn in_flight(&self) -> usize {
        self.snd_queue.len() + self.snd_buf.len()
    }

    pub fn can_recv(&self) -> bool {
        !self.rcv_queue.is_empty()
    }

    /// Receive-window slots currently unused (advertised to the peer).
    pub fn unused_receive_window(&self) -> u16 {
        self.rcv_wnd.saturating_sub(self.rcv_queue.len() as u16)
    }

    /// Next datagram the engine wants on the wire, if any.
    pub fn poll_transmit(&mut self) -> Option<Bytes> {
        self.transmit_queue.pop_front()
    }

    /// Enqueue application bytes for reliable delivery.
    ///
    /// Returns the number of bytes accepted; 0 means the send queue is full
    /// and the caller must retry after ACKs drain it. Stream mode: bytes are
    /// appended to the tail segment before new segments are cut.
    pub fn send(&mut self, data: &[u8]) -> Result<usize> {
        if self.dead {
            return Err(ArqError::DeadLink);
        }
        if data.is_empty() {
            return Ok(0);
        }

        let cap = self.snd_wnd as usize * SND_QUEUE_FACTOR;
        let mut accepted = 0;

        if let Some(last) = self.snd_queue.back_mut() {
            if last.payload.len() < self.mss {
                let take = (self.mss - last.payload.len()).min(data.len());
                last.payload.extend_from_slice(&data[..take]);
                accepted += take;
            }
        }

        while accepted < data.len() && self.snd_queue.len() < cap {
            let take = self.mss.min(data.len() - accepted);
            let mut seg = Segment::new(self.conv, Cmd::Push);
            seg.payload.extend_from_slice(&data[accepted..accepted + take]);
            self.snd_queue.push_back(seg);
            accepted += take;
        }

        Ok(accepted)
    }

    /// Drain decoded in-order payloads into `out`. Returns bytes drained.
    pub fn recv(&mut self, out: &mut Vec<Bytes>) -> usize {
        let recover = self.rcv_queue.len() >= self.rcv_wnd as usize;
        let mut drained = 0;
        while let Some(seg) = self.rcv_queue.pop_front() {
            drained += seg.payload.len();
            out.push(seg.payload.freeze());
        }
        self.move_ready();
        if recover && self.rcv_queue.len() < self.rcv_wnd as usize {
            // Window reopened; tell the peer without waiting for a probe.
            self.probe_tell = true;
        }
        drained
    }

    /// Feed one received datagram.
    ///
    /// Malformed input (short header, wrong conversation, unknown command,
    /// payload overrun) is fatal to the connection and must be treated as
    /// such by the owner.
    pub fn input(&mut self, data: &[u8]) -> Result<()> {
        if data.len() < HEADER_LEN {
            return Err(ArqError::TruncatedSegment(data.len()));
        }

        let prev_una = self.snd_una;
        let mut maxack: Option<u32> = None;
        let mut offset = 0;

        while data.len() - offset >= HEADER_LEN {
            let (seg, consumed) = Segment::decode(&data[offset..])?;
            if seg.conv != self.conv {
                return Err(ArqError::ConversationMismatch {
                    expected: self.conv,
                    got: seg.conv,
                });
            }
            offset += consumed;

            self.rmt_wnd = seg.wnd;
            self.parse_una(seg.una);
            self.shrink_buf();

            match seg.cmd {
                Cmd::Ack => {
                    let rtt = time_diff(self.current, seg.ts);
                    if rtt >= 0 {
                        self.update_ack(rtt as u32);
                    }
                    self.parse_ack(seg.sn);
                    self.shrink_buf();
                    maxack = Some(match maxack {
                        None => seg.sn,
                        Some(prev) if time_diff(seg.sn, prev) > 0 => seg.sn,
                        Some(prev) => prev,
                    });
                }
                Cmd::Push => {
                    let wnd_limit = self.rcv_nxt.wrapping_add(self.rcv_wnd as u32);
                    if time_diff(seg.sn, wnd_limit) < 0 {
                        self.acklist.push((seg.sn, seg.ts));
                        if time_diff(seg.sn, self.rcv_nxt) >= 0 {
                            self.parse_data(seg);
                        }
                    }
                }
                Cmd::WndAsk => {
                    self.probe_tell = true;
                }
                Cmd::WndTell => {
                    // Window already taken from the header.
                }
            }
        }

        if let Some(maxack) = maxack {
            self.parse_fastack(maxack);
        }

        if time_diff(self.snd_una, prev_una) > 0 {
            self.grow_cwnd();
        }

        Ok(())
    }

    /// Drive the internal clock. Must be called at least every `interval`
    /// (10 ms under the fast3 profile); may emit datagrams synchronously.
    pub fn update(&mut self, current: u32) {
        self.current = current;
        if !self.updated {
            self.updated = true;
            self.ts_flush = current;
        }

        let mut slap = time_diff(current, self.ts_flush);
        if !(-10_000..10_000).contains(&slap) {
            self.ts_flush = current;
            slap = 0;
        }
        if slap >= 0 {
            self.ts_flush = self.ts_flush.wrapping_add(self.interval);
            if time_diff(current, self.ts_flush) >= 0 {
                self.ts_flush = current.wrapping_add(self.interval);
            }
            self.flush();
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Remove acknowledged segments below `una` from the send buffer.
    fn parse_una(&mut self, una: u32) {
        while let Some(front) = self.snd_buf.front() {
            if time_diff(una, front.sn) > 0 {
                self.snd_buf.pop_front();
            } else {
                break;
            }
        }
    }

    /// Remove the exactly-acknowledged segment `sn`.
    fn parse_ack(&mut self, sn: u32) {
        if time_diff(sn, self.snd_una) < 0 || time_diff(sn, self.snd_nxt) >= 0 {
            return;
        }
        for i in 0..self.snd_buf.len() {
            match time_diff(sn, self.snd_buf[i].sn) {
                0 => {
                    self.snd_buf.remove(i);
                    break;
                }
                d if d < 0 => break,
                _ => {}
            }
        }
    }

    /// Count duplicate ACKs: every in-flight segment older than `sn` has been
    /// skipped over once more.
    fn parse_fastack(&mut self, sn: u32) {
        if time_diff(sn, self.snd_una) < 0 || time_diff(sn, self.snd_nxt) >= 0 {
            return;
        }
        for seg in self.snd_buf.iter_mut() {
            if time_diff(sn, seg.sn) < 0 {
                break;
            }
            if seg.sn != sn {
                seg.fastack += 1;
            }
        }
    }

    fn shrink_buf(&mut self) {
        self.snd_una = self.snd_buf.front().map(|s| s.sn).unwrap_or(self.snd_nxt);
    }

    /// Jacobson/Karels smoothing, integer milliseconds.
    fn update_ack(&mut self, rtt: u32) {
        let rtt = rtt as i32;
        if self.rx_srtt == 0 {
            self.rx_srtt = rtt.max(1);
            self.rx_rttval = rtt / 2;
        } else {
            let delta = (rtt - self.rx_srtt).abs();
            self.rx_rttval = (3 * self.rx_rttval + delta) / 4;
            self.rx_srtt = ((7 * self.rx_srtt + rtt) / 8).max(1);
        }
        let rto = self.rx_srtt as u32 + self.interval.max(4 * self.rx_rttval.max(0) as u32);
        self.rx_rto = rto.clamp(self.rx_minrto, RTO_MAX);
    }

    /// Insert a data segment into the out-of-order buffer (deduplicating),
    /// then promote contiguous segments to the receive queue.
    fn parse_data(&mut self, seg: Segment) {
        let sn = seg.sn;
        let mut insert_at = self.rcv_buf.len();
        let mut duplicate = false;
        for i in (0..self.rcv_buf.len()).rev() {
            let cur = self.rcv_buf[i].sn;
            if cur == sn {
                duplicate = true;
                break;
            }
            if time_diff(sn, cur) > 0 {
                insert_at = i + 1;
                break;
            }
            insert_at = i;
        }
        if !duplicate {
            self.rcv_buf.insert(insert_at, seg);
        }
        self.move_ready();
    }

    /// Promote in-order segments from `rcv_buf` to `rcv_queue`.
    fn move_ready(&mut self) {
        while let Some(front) = self.rcv_buf.front() {
            if front.sn == self.rcv_nxt && self.rcv_queue.len() < self.rcv_wnd as usize {
                let seg = self.rcv_buf.pop_front().expect("front checked");
                self.rcv_queue.push_back(seg);
                self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
            } else {
                break;
            }
        }
    }

    /// Slow start / congestion avoidance after `snd_una` advanced.
    fn grow_cwnd(&mut self) {
        if self.no_cwnd || self.cwnd >= self.rmt_wnd {
            return;
        }
        let mss = self.mss as u32;
        if self.cwnd < self.ssthresh {
            self.cwnd += 1;
            self.incr += mss;
        } else {
            self.incr = self.incr.max(mss);
            self.incr += (mss * mss) / self.incr + mss / 16;
            if (self.cwnd as u32 + 1) * mss <= self.incr {
                self.cwnd = ((self.incr + mss - 1) / mss) as u16;
            }
        }
        if self.cwnd > self.rmt_wnd {
            self.cwnd = self.rmt_wnd;
            self.incr = self.rmt_wnd as u32 * mss;
        }
    }

    /// Emit ACKs, window probes, fresh data, and retransmissions.
    fn flush(&mut self) {
        if !self.updated {
            return;
        }
        let current = self.current;
        let wnd_unused = self.unused_receive_window();
        let mut buf = BytesMut::with_capacity(self.mtu + HEADER_LEN);
        let mut packets: Vec<Bytes> = Vec::new();

        // Pending ACKs first.
        let mut ack_seg = Segment::new(self.conv, Cmd::Ack);
        ack_seg.wnd = wnd_unused;
        ack_seg.una = self.rcv_nxt;
        for (sn, ts) in self.acklist.drain(..) {
            if buf.len() + HEADER_LEN > self.mtu && !buf.is_empty() {
                packets.push(buf.split().freeze());
            }
            ack_seg.sn = sn;
            ack_seg.ts = ts;
            ack_seg.encode_into(&mut buf);
        }

        // Probe a closed remote window with exponential backoff.
        if self.rmt_wnd == 0 {
            if self.probe_wait == 0 {
                self.probe_wait = PROBE_INIT;
                self.ts_probe = current.wrapping_add(self.probe_wait);
            } else if time_diff(current, self.ts_probe) >= 0 {
                self.probe_wait = self.probe_wait.max(PROBE_INIT);
                self.probe_wait += self.probe_wait / 2;
                self.probe_wait = self.probe_wait.min(PROBE_LIMIT);
                self.ts_probe = current.wrapping_add(self.probe_wait);
                self.probe_ask = true;
            }
        } else {
            self.ts_probe = 0;
            self.probe_wait = 0;
        }

        if self.probe_ask {
            self.probe_ask = false;
            if buf.len() + HEADER_LEN > self.mtu && !buf.is_empty() {
                packets.push(buf.split().freeze());
            }
            let mut probe = Segment::new(self.conv, Cmd::WndAsk);
            probe.wnd = wnd_unused;
            probe.una = self.rcv_nxt;
            probe.encode_into(&mut buf);
        }
        if self.probe_tell {
            self.probe_tell = false;
            if buf.len() + HEADER_LEN > self.mtu && !buf.is_empty() {
                packets.push(buf.split().freeze());
            }
            let mut tell = Segment::new(self.conv, Cmd::WndTell);
            tell.wnd = wnd_unused;
            tell.una = self.rcv_nxt;
            tell.encode_into(&mut buf);
        }

        // Admit queued segments into the in-flight window.
        let mut cwnd = self.snd_wnd.min(self.rmt_wnd);
        if !self.no_cwnd {
            cwnd = cwnd.min(self.cwnd);
        }
        while time_diff(self.snd_nxt, self.snd_una.wrapping_add(cwnd as u32)) < 0 {
            let Some(mut seg) = self.snd_queue.pop_front() else {
                break;
            };
            seg.sn = self.snd_nxt;
            self.snd_nxt = self.snd_nxt.wrapping_add(1);
            self.snd_buf.push_back(seg);
        }

        // Transmit fresh and expired segments.
        let resent = if self.fast_resend > 0 {
            self.fast_resend
        } else {
            u32::MAX
        };
        let rx_rto = self.rx_rto;
        let nodelay = self.nodelay;
        let mtu = self.mtu;
        let rcv_nxt = self.rcv_nxt;
        let mut lost = false;
        let mut change = false;
        let mut dead = false;

        for seg in self.snd_buf.iter_mut() {
            let mut needsend = false;
            if seg.xmit == 0 {
                needsend = true;
                seg.xmit = 1;
                seg.rto = rx_rto;
                seg.resend_ts = current.wrapping_add(seg.rto);
            } else if time_diff(current, seg.resend_ts) >= 0 {
                needsend = true;
                seg.xmit += 1;
                if nodelay {
                    seg.rto += seg.rto / 2;
                } else {
                    seg.rto += rx_rto.max(seg.rto);
                }
                seg.rto = seg.rto.min(RTO_MAX);
                seg.resend_ts = current.wrapping_add(seg.rto);
                lost = true;
            } else if seg.fastack >= resent {
                needsend = true;
                seg.xmit += 1;
                seg.fastack = 0;
                seg.resend_ts = current.wrapping_add(seg.rto);
                change = true;
            }

            if needsend {
                seg.ts = current;
                seg.wnd = wnd_unused;
                seg.una = rcv_nxt;
                if buf.len() + seg.encoded_len() > mtu && !buf.is_empty() {
                    packets.push(buf.split().freeze());
                }
                seg.encode_into(&mut buf);
                if seg.xmit >= DEAD_LINK {
                    dead = true;
                }
            }
        }

        if !buf.is_empty() {
            packets.push(buf.split().freeze());
        }
        self.transmit_queue.extend(packets);

        if dead && !self.dead {
            self.dead = true;
            tracing::debug!(conv = self.conv, "link declared dead");
        }

        // Loss signals shrink the congestion state even when the window is
        // disabled; the values are simply unused then.
        let inflight = self.snd_nxt.wrapping_sub(self.snd_una) as u16;
        if change {
            self.ssthresh = (inflight / 2).max(THRESH_INIT);
            self.cwnd = self.ssthresh + self.fast_resend as u16;
            self.incr = self.cwnd as u32 * self.mss as u32;
        }
        if lost {
            self.ssthresh = (cwnd / 2).max(THRESH_INIT);
            self.cwnd = 1;
            self.incr = self.mss as u32;
        }
        if self.cwnd < 1 {
            self.cwnd = 1;
            self.incr = self.mss as u32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(conv: u32, mtu: usize) -> (ArqEngine, ArqEngine) {
        let mut cfg = ArqConfig::new(conv);
        cfg.mtu = mtu;
        (ArqEngine::new(cfg.clone()), ArqEngine::new(cfg))
    }

    /// Shuttle all pending datagrams from `a` to `b`.
    fn shuttle(a: &mut ArqEngine, b: &mut ArqEngine) {
        while let Some(pkt) = a.poll_transmit() {
            b.input(&pkt).unwrap();
        }
    }

    fn drain(engine: &mut ArqEngine) -> Vec<u8> {
        let mut bufs = Vec::new();
        engine.recv(&mut bufs);
        bufs.iter().flat_map(|b| b.iter().copied()).collect()
    }

    #[test]
    fn round_trip_delivers_bytes() {
        let (mut a, mut b) = pair(7, 1400);
        a.send(b"hello world").unwrap();

        let mut now = 0;
        for _ in 0..10 {
            now += 10;
            a.update(now);
            b.update(now);
            shuttle(&mut a, &mut b);
            shuttle(&mut b, &mut a);
        }

        assert_eq!(drain(&mut b), b"hello world");
        // ACKs cleared the sender's buffers.
        assert_eq!(a.in_flight(), 0);
    }

    #[test]
    fn reordered_datagrams_deliver_in_order() {
        let (mut a, mut b) = pair(9, 64); // mss 40: several segments
        let payload: Vec<u8> = (0..200u8).collect();
        assert_eq!(a.send(&payload).unwrap(), 200);

        a.update(10);
        let mut packets = Vec::new();
        while let Some(pkt) = a.poll_transmit() {
            packets.push(pkt);
        }
        assert!(packets.len() > 1);
        for pkt in packets.iter().rev() {
            b.input(pkt).unwrap();
        }

        assert_eq!(drain(&mut b), payload);
    }

    #[test]
    fn lost_datagrams_are_retransmitted() {
        let (mut a, mut b) = pair(3, 1400);
        a.send(b"retransmit me").unwrap();

        // First transmission dropped on the floor.
        a.update(10);
        while a.poll_transmit().is_some() {}

        // Drive past the initial RTO; the retransmission reaches b.
        let mut now = 10;
        let mut delivered = Vec::new();
        for _ in 0..60 {
            now += 10;
            a.update(now);
            while let Some(pkt) = a.poll_transmit() {
                b.input(&pkt).unwrap();
            }
            delivered = drain(&mut b);
            if !delivered.is_empty() {
                break;
            }
        }
        assert_eq!(delivered, b"retransmit me");
    }

    #[test]
    fn conversation_mismatch_is_fatal() {
        let mut a = ArqEngine::new(ArqConfig::new(1));
        let mut b = ArqEngine::new(ArqConfig::new(2));
        a.send(b"x").unwrap();
        a.update(10);
        let pkt = a.poll_transmit().unwrap();
        assert!(matches!(
            b.input(&pkt).unwrap_err(),
            ArqError::ConversationMismatch { expected: 2, got: 1 }
        ));
    }

    #[test]
    fn short_datagram_is_fatal() {
        let (mut a, _) = pair(1, 1400);
        assert!(matches!(
            a.input(&[0u8; 10]).unwrap_err(),
            ArqError::TruncatedSegment(10)
        ));
    }

    #[test]
    fn send_queue_backpressure() {
        let mut cfg = ArqConfig::new(5);
        cfg.mtu = 64; // mss 40
        cfg.snd_wnd = 2; // queue capacity 4 segments
        let mut engine = ArqEngine::new(cfg);

        let big = vec![0xAAu8; 1000];
        let accepted = engine.send(&big).unwrap();
        assert_eq!(accepted, 4 * 40);
        assert!(!engine.can_send());
        assert_eq!(engine.send(&big).unwrap(), 0);
    }

    #[test]
    fn unanswered_retransmissions_kill_the_link() {
        let (mut a, _) = pair(11, 1400);
        a.send(b"into the void").unwrap();

        let mut now = 0u32;
        for _ in 0..30 {
            now = now.wrapping_add(61_000);
            a.update(now);
            while a.poll_transmit().is_some() {}
        }

        assert!(!a.is_alive());
        assert!(matches!(a.send(b"more").unwrap_err(), ArqError::DeadLink));
    }

    #[test]
    fn duplicate_segments_delivered_once() {
        let (mut a, mut b) = pair(13, 1400);
        a.send(b"only once").unwrap();
        a.update(10);
        let pkt = a.poll_transmit().unwrap();
        b.input(&pkt).unwrap();
        b.input(&pkt).unwrap();
        assert_eq!(drain(&mut b), b"only once");
        assert_eq!(drain(&mut b), b"");
    }
}
