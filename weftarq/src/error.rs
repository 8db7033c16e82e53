use thiserror::Error;

/// All errors produced by the WeftARQ transport layer.
#[derive(Debug, Error)]
pub enum ArqError {
    #[error("datagram shorter than segment header: {0} bytes")]
    TruncatedSegment(usize),

    #[error("conversation mismatch: expected {expected:#010x}, got {got:#010x}")]
    ConversationMismatch { expected: u32, got: u32 },

    #[error("unknown segment command: {0}")]
    UnknownCommand(u8),

    #[error("segment length {len} overruns datagram remainder {remaining}")]
    LengthOverrun { len: usize, remaining: usize },

    #[error("dead link: segment retransmitted past the give-up threshold")]
    DeadLink,
}

pub type Result<T> = std::result::Result<T, ArqError>;
