use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;

use packlink_frame::FrameError;

/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to open the link.
    #[error("failed to connect to {target}: {source}")]
    Connect {
        target: String,
        source: std::io::Error,
    },

    /// An I/O error occurred on the link.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket path is too long for the platform.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// No serial device matched the configured selector.
    #[error("no serial device matches {device}")]
    DeviceNotFound { device: String },

    /// More than one serial device matched the configured selector.
    #[error("{device} matches {} serial devices: {candidates:?}", candidates.len())]
    AmbiguousDevice {
        device: String,
        candidates: Vec<PathBuf>,
    },

    /// The link dropped; restart the transport to use it again.
    #[error("link disconnected")]
    Disconnected,

    /// The transport is not started.
    #[error("transport not started")]
    NotStarted,

    /// A request is already waiting for its reply.
    #[error("a request is already outstanding")]
    RequestOutstanding,

    /// `receive` was called with no request in flight.
    #[error("no outstanding request")]
    NoOutstandingRequest,

    /// No reply within the request socket's reply timeout. The link was
    /// dropped and reconnects on the next request.
    #[error("no reply within {timeout:?}")]
    ReplyTimeout { timeout: Duration },

    /// The request worker did not take a new request in time because it is
    /// still waiting for an earlier reply.
    #[error("request worker busy for {waited:?}")]
    Busy { waited: Duration },

    /// A blocking transport call was made from a tokio runtime thread.
    #[error("blocking transport call from inside a tokio runtime")]
    WithinRuntime,

    /// A frame could not be read or written.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// The event link reported a failure.
    #[error("link error: {0}")]
    Link(String),
}

impl TransportError {
    /// Map a frame-layer failure on a live link, treating a closed stream as a
    /// disconnect.
    pub(crate) fn from_link(err: FrameError) -> Self {
        match err {
            FrameError::ConnectionClosed => TransportError::Disconnected,
            FrameError::Io(err)
                if matches!(
                    err.kind(),
                    ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
                ) =>
            {
                TransportError::Disconnected
            }
            FrameError::Io(err) => TransportError::Io(err),
            other => TransportError::Frame(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
