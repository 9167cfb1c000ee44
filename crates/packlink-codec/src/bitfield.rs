use bytes::{BufMut, BytesMut};

use crate::error::Result;
use crate::wire::WireReader;

/// Presence bits for a message's optional fields.
///
/// Optional field `i` (counted among optional fields only, in declaration
/// order) owns bit `i % 8` of byte `i / 8`, least significant bit first. A set
/// bit means the field is present on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bitfield {
    bytes: Vec<u8>,
}

impl Bitfield {
    /// Number of leading bytes a message with `optional_count` optional fields
    /// carries.
    pub const fn byte_len(optional_count: usize) -> usize {
        optional_count.div_ceil(8)
    }

    /// All fields absent.
    pub fn new(optional_count: usize) -> Self {
        Self {
            bytes: vec![0; Self::byte_len(optional_count)],
        }
    }

    pub fn set(&mut self, index: usize, present: bool) {
        let mask = 1u8 << (index % 8);
        if let Some(byte) = self.bytes.get_mut(index / 8) {
            if present {
                *byte |= mask;
            } else {
                *byte &= !mask;
            }
        }
    }

    pub fn is_set(&self, index: usize) -> bool {
        self.bytes
            .get(index / 8)
            .is_some_and(|byte| byte & (1u8 << (index % 8)) != 0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn write(&self, dst: &mut BytesMut) {
        dst.put_slice(&self.bytes);
    }

    pub fn read(reader: &mut WireReader<'_>, optional_count: usize) -> Result<Self> {
        let bytes = reader.take(Self::byte_len(optional_count))?.to_vec();
        Ok(Self { bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_len_rounds_up() {
        assert_eq!(Bitfield::byte_len(0), 0);
        assert_eq!(Bitfield::byte_len(1), 1);
        assert_eq!(Bitfield::byte_len(8), 1);
        assert_eq!(Bitfield::byte_len(9), 2);
    }

    #[test]
    fn second_of_two_optionals() {
        let mut bits = Bitfield::new(2);
        bits.set(1, true);
        assert_eq!(bits.as_bytes(), &[0b0000_0010]);
        assert!(!bits.is_set(0));
        assert!(bits.is_set(1));
    }

    #[test]
    fn bits_spill_into_second_byte() {
        let mut bits = Bitfield::new(10);
        bits.set(0, true);
        bits.set(9, true);
        assert_eq!(bits.as_bytes(), &[0x01, 0x02]);

        bits.set(0, false);
        assert_eq!(bits.as_bytes(), &[0x00, 0x02]);

        let mut buf = BytesMut::new();
        bits.write(&mut buf);
        let read = Bitfield::read(&mut WireReader::new(&buf), 10).unwrap();
        assert_eq!(read, bits);
    }

    #[test]
    fn out_of_range_index_is_absent() {
        let mut bits = Bitfield::new(3);
        bits.set(12, true);
        assert!(!bits.is_set(12));
        assert_eq!(bits.as_bytes(), &[0x00]);
    }
}
