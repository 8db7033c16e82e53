//! One real end-to-end run: two handlers over loopback UDP sockets, driven
//! by a minimal selector that keeps virtual readiness in a [`ReadySet`].

use std::time::{Duration, Instant};

use weftstream::{
    HandlerConfig, HandshakeState, Ops, ReadOutcome, ReadySet, Role, Selector, StreamId,
    StreamState, StreamedHandler, TimerId, TimerKind,
};

struct UdpSel {
    ops: Ops,
    timers: Vec<(TimerId, TimerKind, Instant)>,
    next_timer: u64,
    ready: ReadySet,
    listener_ready: bool,
}

impl UdpSel {
    fn new() -> Self {
        Self {
            ops: Ops::NONE,
            timers: Vec::new(),
            next_timer: 0,
            ready: ReadySet::new(),
            listener_ready: false,
        }
    }

    fn due(&mut self) -> Vec<TimerKind> {
        let now = Instant::now();
        let mut fired = Vec::new();
        self.timers.retain(|(_, kind, deadline)| {
            if *deadline <= now {
                fired.push(*kind);
                false
            } else {
                true
            }
        });
        fired
    }
}

impl Selector for UdpSel {
    fn add_ops(&mut self, ops: Ops) {
        self.ops.insert(ops);
    }

    fn rm_ops(&mut self, ops: Ops) {
        self.ops.remove(ops);
    }

    fn delay(&mut self, millis: u64, kind: TimerKind) -> TimerId {
        self.next_timer += 1;
        let id = TimerId(self.next_timer);
        self.timers
            .push((id, kind, Instant::now() + Duration::from_millis(millis)));
        id
    }

    fn cancel(&mut self, timer: TimerId) {
        self.timers.retain(|(id, _, _)| *id != timer);
    }

    fn virtual_readable(&mut self, stream: StreamId, on: bool) {
        if on {
            self.ready.publish_readable(stream);
        } else {
            self.ready.retract_readable(stream);
        }
    }

    fn virtual_writable(&mut self, stream: StreamId, on: bool) {
        if on {
            self.ready.publish_writable(stream);
        } else {
            self.ready.retract_writable(stream);
        }
    }

    fn listener_readable(&mut self, on: bool) {
        self.listener_ready = on;
    }
}

async fn pump(
    handler: &mut StreamedHandler,
    sel: &mut UdpSel,
    sock: &tokio::net::UdpSocket,
    start: Instant,
) {
    let now_ms = start.elapsed().as_millis() as u32;
    handler.tick(now_ms, sel);
    for kind in sel.due() {
        handler.handle_timer(kind, sel);
    }
    if sel.ops.contains(Ops::WRITABLE) && handler.transport_can_write() {
        handler.writable(sel);
    }
    while let Some(pkt) = handler.poll_transmit() {
        let _ = sock.send(&pkt).await;
    }
    let mut buf = [0u8; 2048];
    while let Ok(n) = sock.try_recv(&mut buf) {
        handler.readable(&buf[..n], sel);
    }
}

#[tokio::test]
async fn echo_over_loopback_udp() {
    let csock = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let ssock = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let caddr = csock.local_addr().unwrap();
    let saddr = ssock.local_addr().unwrap();
    csock.connect(saddr).await.unwrap();
    ssock.connect(caddr).await.unwrap();

    let mut client =
        StreamedHandler::new(HandlerConfig::new(Role::Client, 0xBEEF, caddr, saddr));
    let mut server =
        StreamedHandler::new(HandlerConfig::new(Role::Server, 0xBEEF, saddr, caddr));
    server.create_listener().unwrap();

    let mut csel = UdpSel::new();
    let mut ssel = UdpSel::new();
    client.connected(&mut csel);
    server.connected(&mut ssel);

    let start = Instant::now();
    let mut stream: Option<StreamId> = None;
    let mut server_stream: Option<StreamId> = None;
    let mut echoed = false;
    let mut done = false;

    for _ in 0..2000 {
        pump(&mut client, &mut csel, &csock, start).await;
        pump(&mut server, &mut ssel, &ssock, start).await;

        // Client: open a stream once the handshake completes.
        if stream.is_none() && client.handshake_state() == HandshakeState::Established {
            let id = client.open_stream().unwrap();
            client.send_syn(id, &mut csel).unwrap();
            client
                .stream_write(id, b"ping over udp", &mut csel)
                .unwrap();
            stream = Some(id);
        }

        // Server: accept, then echo whatever lands.
        if server_stream.is_none() && ssel.listener_ready {
            if let Ok(Some(id)) = server.accept(&mut ssel) {
                server_stream = Some(id);
            }
        }
        if let Some(id) = server_stream {
            if !echoed && ssel.ready.is_readable(id) {
                let mut buf = [0u8; 64];
                if let Ok(ReadOutcome::Bytes(n)) = server.stream_read(id, &mut buf, &mut ssel) {
                    server.stream_write(id, &buf[..n], &mut ssel).unwrap();
                }
            }
        }

        // Client: wait for the echo, then close its side.
        if let Some(id) = stream {
            if !echoed && csel.ready.is_readable(id) {
                let mut buf = [0u8; 64];
                if let Ok(ReadOutcome::Bytes(n)) = client.stream_read(id, &mut buf, &mut csel) {
                    assert_eq!(&buf[..n], b"ping over udp");
                    echoed = true;
                    client.send_fin(id, &mut csel).unwrap();
                }
            }
        }

        // Server: observe the FIN, drain to EOF, close its side too.
        if echoed {
            if let Some(id) = server_stream {
                if server.stream(id).map(|s| s.state()) == Some(StreamState::FinRecv) {
                    let mut buf = [0u8; 64];
                    while let Ok(ReadOutcome::Bytes(_)) =
                        server.stream_read(id, &mut buf, &mut ssel)
                    {}
                    server.send_fin(id, &mut ssel).unwrap();
                }
            }
        }

        if echoed && stream.map(|id| client.stream(id).is_none()).unwrap_or(false) {
            done = true;
            break;
        }

        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    assert!(done, "echo round-trip did not finish");
    assert!(!client.is_failed());
    assert!(!server.is_failed());
}
