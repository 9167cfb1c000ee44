use bytes::{Buf, Bytes, BytesMut};
use tracing::warn;

use crate::error::{FrameError, Result};
use crate::{FrameConfig, DELIMITER};

const INITIAL_BUFFER_CAPACITY: usize = 1024;

/// Splits an arbitrary byte stream into delimiter-terminated frames.
///
/// Partial frames are kept across [`push`](Self::push) calls, so a reader can
/// feed whatever chunk sizes the link hands it.
#[derive(Debug)]
pub struct FrameAccumulator {
    buf: BytesMut,
    config: FrameConfig,
    /// Dropping the tail of an oversized frame until the next delimiter.
    discarding: bool,
}

impl FrameAccumulator {
    /// Create an accumulator with default configuration.
    pub fn new() -> Self {
        Self::with_config(FrameConfig::default())
    }

    /// Create an accumulator with explicit configuration.
    pub fn with_config(config: FrameConfig) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
            discarding: false,
        }
    }

    /// Append received bytes.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete frame body (delimiter removed).
    ///
    /// Returns `None` when no complete frame is buffered. An oversized frame is
    /// reported once as [`FrameError::FrameTooLarge`] and then skipped up to its
    /// delimiter. Empty frames are skipped silently.
    pub fn next_frame(&mut self) -> Option<Result<Bytes>> {
        let max = self.config.max_frame_size;
        loop {
            let Some(position) = self.buf.iter().position(|&b| b == DELIMITER) else {
                if self.discarding {
                    self.buf.clear();
                } else if self.buf.len() > max {
                    let size = self.buf.len();
                    self.buf.clear();
                    self.discarding = true;
                    return Some(Err(FrameError::FrameTooLarge { size, max }));
                }
                return None;
            };

            let frame = self.buf.split_to(position).freeze();
            self.buf.advance(1);

            if self.discarding {
                self.discarding = false;
                warn!(dropped = frame.len(), "discarded tail of oversized frame");
                continue;
            }
            if frame.is_empty() {
                continue;
            }
            if frame.len() > max {
                return Some(Err(FrameError::FrameTooLarge {
                    size: frame.len(),
                    max,
                }));
            }
            return Some(Ok(frame));
        }
    }

    /// Number of buffered bytes not yet part of a complete frame.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    /// Drop any partially received frame.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.discarding = false;
    }

    /// Current configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl Default for FrameAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Iterator for FrameAccumulator {
    type Item = Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame()
    }
}
