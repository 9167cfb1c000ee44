//! Consistent Overhead Byte Stuffing.
//!
//! The source is split into blocks ending at each zero byte (the zero itself is
//! dropped) or after 254 non-zero bytes. Each block is written as a code byte
//! `len + 1` followed by its bytes. A code of `0xFF` marks a full 254-byte block
//! with no implied zero after it.

use bytes::{BufMut, BytesMut};

use crate::error::{FrameError, Result};

/// Largest block of non-zero bytes a single code byte can describe.
const MAX_RUN: usize = 254;

/// Code byte marking a full block with no implied zero.
const FULL_BLOCK: u8 = 0xFF;

/// Worst-case stuffed size for `len` source bytes (delimiter excluded).
pub const fn max_encoded_len(len: usize) -> usize {
    len + len / MAX_RUN + 1
}

/// Stuff `src` and append the result to `dst`.
///
/// The output never contains a zero byte. No delimiter is appended.
pub fn encode_into(src: &[u8], dst: &mut BytesMut) {
    dst.reserve(max_encoded_len(src.len()));

    let mut code_index = dst.len();
    dst.put_u8(0);
    let mut code: u8 = 1;
    let mut pending = true;

    for (index, &byte) in src.iter().enumerate() {
        if byte != 0 {
            dst.put_u8(byte);
            code += 1;
        }

        if byte == 0 || code == FULL_BLOCK {
            dst[code_index] = code;
            code = 1;
            if byte == 0 || index + 1 < src.len() {
                code_index = dst.len();
                dst.put_u8(0);
            } else {
                // A full block ended exactly at the end of the input.
                pending = false;
            }
        }
    }

    if pending {
        dst[code_index] = code;
    }
}

/// Stuff `src` into a new buffer.
pub fn encode(src: &[u8]) -> BytesMut {
    let mut dst = BytesMut::with_capacity(max_encoded_len(src.len()));
    encode_into(src, &mut dst);
    dst
}

/// Reverse [`encode`]. `src` must not include the frame delimiter.
pub fn decode(src: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(src.len());
    let mut offset = 0usize;

    while offset < src.len() {
        let code = src[offset];
        if code == 0 {
            return Err(FrameError::Malformed {
                offset,
                reason: "zero code byte inside frame",
            });
        }
        offset += 1;

        let run = usize::from(code) - 1;
        let end = offset + run;
        let block = src.get(offset..end).ok_or(FrameError::Malformed {
            offset: offset - 1,
            reason: "block length runs past end of frame",
        })?;
        if let Some(position) = block.iter().position(|&b| b == 0) {
            return Err(FrameError::Malformed {
                offset: offset + position,
                reason: "zero byte inside block",
            });
        }
        out.extend_from_slice(block);
        offset = end;

        if code != FULL_BLOCK && offset < src.len() {
            out.push(0);
        }
    }

    Ok(out)
}
