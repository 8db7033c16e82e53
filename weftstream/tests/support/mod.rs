//! Deterministic two-handler harness: a simulated selector with a manual
//! clock, and a link that shuttles datagrams with optional directional drop.

use std::collections::HashSet;
use std::collections::VecDeque;
use std::net::SocketAddr;

use bytes::Bytes;
use weftstream::{
    HandlerConfig, Ops, Role, Selector, StreamId, StreamedHandler, TimerId, TimerKind,
};

struct SimTimer {
    id: TimerId,
    kind: TimerKind,
    deadline: u64,
    live: bool,
}

/// Recording selector with manually-advanced time.
#[derive(Default)]
pub struct LoopSim {
    pub now: u64,
    pub ops: Ops,
    timers: Vec<SimTimer>,
    next_timer: u64,
    pub readable: HashSet<StreamId>,
    pub writable: HashSet<StreamId>,
    pub listener_ready: bool,
}

impl LoopSim {
    /// Timers whose deadline has passed; each fires at most once.
    pub fn due(&mut self) -> Vec<TimerKind> {
        let now = self.now;
        let mut fired = Vec::new();
        self.timers.retain(|t| {
            if t.live && t.deadline <= now {
                fired.push(t.kind);
                false
            } else {
                t.live
            }
        });
        fired
    }
}

impl Selector for LoopSim {
    fn add_ops(&mut self, ops: Ops) {
        self.ops.insert(ops);
    }

    fn rm_ops(&mut self, ops: Ops) {
        self.ops.remove(ops);
    }

    fn delay(&mut self, millis: u64, kind: TimerKind) -> TimerId {
        self.next_timer += 1;
        let id = TimerId(self.next_timer);
        self.timers.push(SimTimer {
            id,
            kind,
            deadline: self.now + millis,
            live: true,
        });
        id
    }

    fn cancel(&mut self, timer: TimerId) {
        for t in &mut self.timers {
            if t.id == timer {
                t.live = false;
            }
        }
    }

    fn virtual_readable(&mut self, stream: StreamId, on: bool) {
        if on {
            self.readable.insert(stream);
        } else {
            self.readable.remove(&stream);
        }
    }

    fn virtual_writable(&mut self, stream: StreamId, on: bool) {
        if on {
            self.writable.insert(stream);
        } else {
            self.writable.remove(&stream);
        }
    }

    fn listener_readable(&mut self, on: bool) {
        self.listener_ready = on;
    }
}

fn addr(port: u16) -> SocketAddr {
    format!("127.0.0.1:{port}").parse().unwrap()
}

/// A client/server handler pair joined by a simulated link.
pub struct Pair {
    pub client: StreamedHandler,
    pub server: StreamedHandler,
    pub csel: LoopSim,
    pub ssel: LoopSim,
    pub now: u64,
    /// Drop all client-to-server datagrams while set.
    pub drop_to_server: bool,
    /// Drop all server-to-client datagrams while set.
    pub drop_to_client: bool,
    to_server: VecDeque<Bytes>,
    to_client: VecDeque<Bytes>,
}

impl Pair {
    pub fn new(conv: u32) -> Self {
        let client_addr = addr(40_001);
        let server_addr = addr(40_002);
        let mut client = StreamedHandler::new(HandlerConfig::new(
            Role::Client,
            conv,
            client_addr,
            server_addr,
        ));
        let mut server = StreamedHandler::new(HandlerConfig::new(
            Role::Server,
            conv,
            server_addr,
            client_addr,
        ));
        server.create_listener().unwrap();

        let mut csel = LoopSim::default();
        let mut ssel = LoopSim::default();
        client.connected(&mut csel);
        server.connected(&mut ssel);

        Self {
            client,
            server,
            csel,
            ssel,
            now: 0,
            drop_to_server: false,
            drop_to_client: false,
            to_server: VecDeque::new(),
            to_client: VecDeque::new(),
        }
    }

    /// One 10 ms tick: clocks, timers, writable pumping, datagram delivery.
    pub fn step(&mut self) {
        self.now += 10;
        self.csel.now = self.now;
        self.ssel.now = self.now;

        self.client.tick(self.now as u32, &mut self.csel);
        self.server.tick(self.now as u32, &mut self.ssel);

        for kind in self.csel.due() {
            self.client.handle_timer(kind, &mut self.csel);
        }
        for kind in self.ssel.due() {
            self.server.handle_timer(kind, &mut self.ssel);
        }

        if self.csel.ops.contains(Ops::WRITABLE) && self.client.transport_can_write() {
            self.client.writable(&mut self.csel);
        }
        if self.ssel.ops.contains(Ops::WRITABLE) && self.server.transport_can_write() {
            self.server.writable(&mut self.ssel);
        }

        while let Some(pkt) = self.client.poll_transmit() {
            if !self.drop_to_server {
                self.to_server.push_back(pkt);
            }
        }
        while let Some(pkt) = self.server.poll_transmit() {
            if !self.drop_to_client {
                self.to_client.push_back(pkt);
            }
        }

        // Datagrams are delivered only while readable interest is parked,
        // like a real loop would.
        while self.ssel.ops.contains(Ops::READABLE) {
            let Some(pkt) = self.to_server.pop_front() else {
                break;
            };
            self.server.readable(&pkt, &mut self.ssel);
        }
        while self.csel.ops.contains(Ops::READABLE) {
            let Some(pkt) = self.to_client.pop_front() else {
                break;
            };
            self.client.readable(&pkt, &mut self.csel);
        }
    }

    pub fn run(&mut self, steps: u32) {
        for _ in 0..steps {
            self.step();
        }
    }

    /// Drive until both sides are established (panics if it takes too long).
    pub fn handshake(&mut self) {
        for _ in 0..100 {
            self.step();
            if self.client.handshake_state() == weftstream::HandshakeState::Established
                && self.server.handshake_state() == weftstream::HandshakeState::Established
            {
                return;
            }
        }
        panic!("handshake did not complete");
    }
}
