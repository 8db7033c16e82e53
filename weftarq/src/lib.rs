//! WeftARQ -- reliable ordered delivery over an unreliable datagram channel.
//!
//! The engine speaks a KCP-style selective-repeat protocol: every datagram
//! carries one or more 24-byte segment headers, receivers acknowledge by
//! sequence number, and unacknowledged segments are retransmitted on RTO
//! expiry or after duplicate ACKs. Layered on top, [`ArqAdapter`] binds one
//! engine to a datagram socket and exposes the decoded byte stream.

pub mod adapter;
pub mod chain;
pub mod engine;
pub mod error;
pub mod segment;

// Re-export key public types at crate root.
pub use adapter::ArqAdapter;
pub use chain::ByteChain;
pub use engine::{ArqConfig, ArqEngine};
pub use error::{ArqError, Result};
