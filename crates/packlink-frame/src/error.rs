/// Failures while stuffing, unstuffing, or moving frames over a stream.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The stuffed bytes do not form a valid COBS block sequence.
    #[error("malformed frame at byte {offset}: {reason}")]
    Malformed { offset: usize, reason: &'static str },

    /// A frame grew beyond the configured maximum before its delimiter arrived.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// The frame decoded to zero bytes, so it carries no packet ID.
    #[error("empty frame")]
    EmptyFrame,

    #[error("link I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// End of stream, or a write the stream refused outright.
    #[error("link closed")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
