//! WeftStream -- many independent bidirectional streams multiplexed inside
//! one reliable-UDP connection.
//!
//! The layer below ([`weftarq`]) turns lossy datagrams into an ordered byte
//! stream; this crate runs a TCP-like protocol over that stream: a role
//! handshake, SYN / SYN-ACK / PSH / FIN / RST per stream, a keepalive probe
//! with a loss budget, and virtual sockets the owning event loop sees through
//! software-driven readiness edges.

pub mod error;
pub mod event;
pub mod frame;
pub mod handler;
pub mod listener;
pub mod stream;

// Re-export key public types at crate root.
pub use error::{Result, WeftStreamError};
pub use event::{Ops, ReadySet, Selector, TimerId, TimerKind};
pub use frame::{Frame, Framer, StreamId, WireFramer};
pub use handler::{Event, HandlerConfig, HandshakeState, Role, StreamedHandler};
pub use listener::StreamedListener;
pub use stream::{ReadOutcome, StreamFd, StreamState};
