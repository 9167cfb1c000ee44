use bytes::{BufMut, Bytes, BytesMut};

use crate::cobs;
use crate::error::{FrameError, Result};
use crate::DELIMITER;

/// Size of the packet header: one transaction/publish ID byte.
pub const HEADER_SIZE: usize = 1;

/// A decoded frame: the routing ID and the codec-encoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Transaction or publish ID.
    pub id: u8,
    /// The codec-encoded message.
    pub payload: Bytes,
}

impl Packet {
    /// Create a new packet.
    pub fn new(id: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            payload: payload.into(),
        }
    }

    /// The total wire size of this packet once stuffed and delimited.
    pub fn wire_size(&self) -> usize {
        stuffed_size(self.id, &self.payload) + 1
    }

    /// Encode this packet into the wire format.
    pub fn encode(&self, dst: &mut BytesMut) {
        encode_packet(self.id, &self.payload, dst);
    }
}

fn stuffed_size(id: u8, payload: &[u8]) -> usize {
    let mut raw = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    raw.put_u8(id);
    raw.put_slice(payload);
    cobs::encode(&raw).len()
}

/// Encode a packet into the wire format.
///
/// Wire format:
/// ```text
/// ┌────────────────────────────────────────┬───────────┐
/// │ COBS( id (1B) ++ payload )             │ 0x00      │
/// └────────────────────────────────────────┴───────────┘
/// ```
pub fn encode_packet(id: u8, payload: &[u8], dst: &mut BytesMut) {
    let mut raw = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    raw.put_u8(id);
    raw.put_slice(payload);

    cobs::encode_into(&raw, dst);
    dst.put_u8(DELIMITER);
}

/// Decode one frame body (delimiter already removed) into a packet.
pub fn decode_packet(body: &[u8]) -> Result<Packet> {
    let raw = cobs::decode(body)?;
    let (&id, payload) = raw.split_first().ok_or(FrameError::EmptyFrame)?;
    Ok(Packet {
        id,
        payload: Bytes::copy_from_slice(payload),
    })
}
