use std::time::Duration;

/// Errors that can occur in node operations.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] packlink_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] packlink_frame::FrameError),

    /// A request or response payload did not encode or decode.
    #[error("codec error: {0}")]
    Codec(#[from] packlink_codec::CodecError),

    /// No response with the awaited ID arrived in time.
    #[error("transaction {id} timed out after {timeout:?}")]
    Timeout { id: u8, timeout: Duration },

    /// The link dropped while a transaction was waiting.
    #[error("device disconnected: {0}")]
    Disconnected(String),

    /// The node was closed while a transaction was waiting.
    #[error("node closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, NodeError>;
