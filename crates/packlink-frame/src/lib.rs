//! Byte-stuffed framing for packlink links.
//!
//! Every frame on the wire is the COBS encoding of a packet followed by a single
//! `0x00` delimiter. The encoding never produces a zero byte, so the delimiter is
//! unambiguous and a receiver can resynchronize after corruption by skipping to
//! the next zero.
//!
//! ```text
//! ┌──────────────────────────────────────────┬──────┐
//! │ COBS( id (1B) ++ payload (N bytes) )     │ 0x00 │
//! └──────────────────────────────────────────┴──────┘
//! ```

pub mod accumulator;
pub mod cobs;
pub mod error;
pub mod packet;
pub mod reader;
pub mod writer;

pub use accumulator::FrameAccumulator;
pub use error::{FrameError, Result};
pub use packet::{decode_packet, encode_packet, Packet};
pub use reader::FrameReader;
pub use writer::FrameWriter;

/// The reserved byte terminating every frame.
pub const DELIMITER: u8 = 0x00;

/// Default maximum size of one stuffed frame body: 4 KiB.
pub const DEFAULT_MAX_FRAME: usize = 4 * 1024;

/// Configuration for frame assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameConfig {
    /// Maximum stuffed frame size (delimiter excluded). Default: 4 KiB.
    pub max_frame_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME,
        }
    }
}
