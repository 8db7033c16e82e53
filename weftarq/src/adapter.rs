//! Binds an [`ArqEngine`] to a datagram socket and exposes the byte stream.
//!
//! The adapter owns the engine exclusively. Incoming datagrams go through
//! `parse`, application bytes through `write`, and the owner must call
//! `clock` on at least a 10 ms cadence so retransmissions and ACKs keep
//! flowing. Datagrams the engine wants on the wire are drained with
//! `poll_transmit` and sent with the usual writable discipline of the
//! owning loop.

use bytes::Bytes;

use crate::chain::ByteChain;
use crate::engine::{ArqConfig, ArqEngine};
use crate::error::{ArqError, Result};

pub struct ArqAdapter {
    engine: ArqEngine,
}

impl ArqAdapter {
    pub fn new(config: ArqConfig) -> Self {
        Self {
            engine: ArqEngine::new(config),
        }
    }

    pub fn conv(&self) -> u32 {
        self.engine.conv()
    }

    /// Feed one received datagram; returns any decoded stream bytes.
    ///
    /// Malformed input is fatal to the connection: the caller must tear the
    /// owning handler down on error.
    pub fn parse(&mut self, datagram: &[u8]) -> Result<Option<Bytes>> {
        self.engine.input(datagram)?;

        let mut bufs = Vec::new();
        while self.engine.can_recv() {
            self.engine.recv(&mut bufs);
        }
        if bufs.is_empty() {
            return Ok(None);
        }
        let mut chain = ByteChain::new();
        for buf in bufs {
            chain.push(buf);
        }
        Ok(Some(chain.read_all()))
    }

    /// Enqueue stream bytes for reliable delivery. Returns the number of
    /// bytes accepted; 0 means the send window is full for now.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.engine.send(data)
    }

    /// Whether `write` currently accepts bytes.
    pub fn can_write(&self) -> bool {
        self.engine.can_send()
    }

    /// Drive the engine clock and surface a dead link as an error.
    pub fn clock(&mut self, now_ms: u32) -> Result<()> {
        self.engine.update(now_ms);
        if !self.engine.is_alive() {
            return Err(ArqError::DeadLink);
        }
        Ok(())
    }

    /// Next datagram to put on the wire, if any.
    pub fn poll_transmit(&mut self) -> Option<Bytes> {
        self.engine.poll_transmit()
    }

    /// Segments not yet acknowledged by the peer.
    pub fn in_flight(&self) -> usize {
        self.engine.in_flight()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter_pair(conv: u32) -> (ArqAdapter, ArqAdapter) {
        (
            ArqAdapter::new(ArqConfig::new(conv)),
            ArqAdapter::new(ArqConfig::new(conv)),
        )
    }

    #[test]
    fn write_parse_round_trip() {
        let (mut a, mut b) = adapter_pair(21);
        assert_eq!(a.write(b"stream bytes").unwrap(), 12);

        a.clock(10).unwrap();
        let mut got = Vec::new();
        while let Some(pkt) = a.poll_transmit() {
            if let Some(bytes) = b.parse(&pkt).unwrap() {
                got.extend_from_slice(&bytes);
            }
        }
        assert_eq!(got, b"stream bytes");
    }

    #[test]
    fn parse_rejects_garbage() {
        let (_, mut b) = adapter_pair(21);
        assert!(b.parse(&[1, 2, 3]).is_err());
    }

    #[test]
    fn parse_returns_none_for_acks() {
        let (mut a, mut b) = adapter_pair(21);
        a.write(b"x").unwrap();
        a.clock(10).unwrap();
        let pkt = a.poll_transmit().unwrap();
        assert!(b.parse(&pkt).unwrap().is_some());

        // b now owes an ACK; an ACK-only datagram decodes no stream bytes.
        b.clock(20).unwrap();
        let ack = b.poll_transmit().unwrap();
        assert!(a.parse(&ack).unwrap().is_none());
        assert_eq!(a.in_flight(), 0);
    }

    #[test]
    fn clock_surfaces_dead_link() {
        let (mut a, _) = adapter_pair(21);
        a.write(b"never acknowledged").unwrap();

        let mut now = 0u32;
        let mut died = false;
        for _ in 0..30 {
            now = now.wrapping_add(61_000);
            if a.clock(now).is_err() {
                died = true;
                break;
            }
            while a.poll_transmit().is_some() {}
        }
        assert!(died);
    }
}
