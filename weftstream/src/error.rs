use thiserror::Error;

use weftarq::ArqError;

/// All errors produced by the WeftStream multiplexing layer.
#[derive(Debug, Error)]
pub enum WeftStreamError {
    #[error("stream {0} not found")]
    StreamNotFound(u32),

    #[error("stream {0} already exists")]
    StreamAlreadyExists(u32),

    #[error("stream {0} already closed")]
    StreamClosed(u32),

    #[error("connection reset on stream {0}")]
    StreamReset(u32),

    #[error("invalid stream state for {op}: {state}")]
    InvalidStreamState { op: &'static str, state: String },

    #[error("handshake not complete")]
    NotEstablished,

    #[error("handler has failed: {0}")]
    HandlerFailed(String),

    #[error("duplicate listener on connection")]
    DuplicateListener,

    #[error("no listener on connection")]
    NoListener,

    #[error("bad handshake message: {0}")]
    BadHandshake(String),

    #[error("unknown frame type: 0x{0:02x}")]
    UnknownFrameType(u8),

    #[error("transport error: {0}")]
    Transport(#[from] ArqError),
}

pub type Result<T> = std::result::Result<T, WeftStreamError>;
