//! Primitive little-endian writers and the matching [`WireReader`].
//!
//! Every multi-byte scalar is little-endian at its natural width. `string`,
//! `bytes` and lists carry a 2-byte little-endian length prefix.

use bytes::{BufMut, BytesMut};

use crate::error::{CodecError, Result};
use crate::message::WireEnum;

/// Size of the length prefix in front of strings, bytes and lists.
pub const LEN_SIZE: usize = 2;

macro_rules! put_scalar {
    ($($name:ident: $ty:ty => $put:ident;)*) => {
        $(
            #[inline]
            pub fn $name(dst: &mut BytesMut, value: $ty) {
                dst.$put(value);
            }
        )*
    };
}

put_scalar! {
    put_u8: u8 => put_u8;
    put_u16: u16 => put_u16_le;
    put_u32: u32 => put_u32_le;
    put_u64: u64 => put_u64_le;
    put_i8: i8 => put_i8;
    put_i16: i16 => put_i16_le;
    put_i32: i32 => put_i32_le;
    put_i64: i64 => put_i64_le;
    put_f32: f32 => put_f32_le;
    put_f64: f64 => put_f64_le;
}

/// Write a bool as one byte, 0 or 1.
#[inline]
pub fn put_bool(dst: &mut BytesMut, value: bool) {
    dst.put_u8(u8::from(value));
}

/// Write an enum as its one-byte wire value.
#[inline]
pub fn put_enum<E: WireEnum>(dst: &mut BytesMut, value: E) {
    dst.put_u8(value.to_wire());
}

/// Write a 2-byte length prefix.
pub fn put_len(dst: &mut BytesMut, len: usize) -> Result<()> {
    let len = u16::try_from(len).map_err(|_| CodecError::LengthOverflow { len })?;
    dst.put_u16_le(len);
    Ok(())
}

/// Write a length-prefixed UTF-8 string.
pub fn put_str(dst: &mut BytesMut, value: &str) -> Result<()> {
    put_bytes(dst, value.as_bytes())
}

/// Write a length-prefixed byte string.
pub fn put_bytes(dst: &mut BytesMut, value: &[u8]) -> Result<()> {
    put_len(dst, value.len())?;
    dst.put_slice(value);
    Ok(())
}

/// Write a list: the element count, then each element through `put`.
pub fn put_list<T>(
    dst: &mut BytesMut,
    items: &[T],
    mut put: impl FnMut(&mut BytesMut, &T) -> Result<()>,
) -> Result<()> {
    put_len(dst, items.len())?;
    for item in items {
        put(dst, item)?;
    }
    Ok(())
}

/// Cursor over an encoded payload.
///
/// Every read checks the remaining length first and fails with
/// [`CodecError::Truncated`] instead of reading past the end.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

macro_rules! read_scalar {
    ($($name:ident: $ty:ty;)*) => {
        $(
            #[inline]
            pub fn $name(&mut self) -> Result<$ty> {
                let raw = self.array::<{ std::mem::size_of::<$ty>() }>()?;
                Ok(<$ty>::from_le_bytes(raw))
            }
        )*
    };
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Borrow the next `n` bytes and advance past them.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let remaining = self.remaining();
        if n > remaining {
            return Err(CodecError::Truncated {
                needed: n,
                remaining,
            });
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.buf[start..self.pos])
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    read_scalar! {
        u8: u8;
        u16: u16;
        u32: u32;
        u64: u64;
        i8: i8;
        i16: i16;
        i32: i32;
        i64: i64;
        f32: f32;
        f64: f64;
    }

    /// Read a bool byte. Anything other than 0 or 1 is rejected.
    pub fn bool(&mut self) -> Result<bool> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            value => Err(CodecError::InvalidBool { value }),
        }
    }

    /// Read a one-byte enum value.
    pub fn enumeration<E: WireEnum>(&mut self) -> Result<E> {
        E::from_wire(self.u8()?)
    }

    /// Read a 2-byte length prefix.
    pub fn len_prefix(&mut self) -> Result<usize> {
        Ok(usize::from(self.u16()?))
    }

    /// Read a length-prefixed byte string.
    pub fn bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.len_prefix()?;
        Ok(self.take(len)?.to_vec())
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn string(&mut self) -> Result<String> {
        let len = self.len_prefix()?;
        let offset = self.pos;
        let raw = self.take(len)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|err| CodecError::InvalidUtf8 {
                offset: offset + err.valid_up_to(),
            })
    }

    /// Read a list: the element count, then each element through `read`.
    pub fn list<T>(&mut self, mut read: impl FnMut(&mut Self) -> Result<T>) -> Result<Vec<T>> {
        let len = self.len_prefix()?;
        // The count is untrusted; cap the preallocation by the input size.
        let mut items = Vec::with_capacity(len.min(self.remaining()));
        for _ in 0..len {
            items.push(read(self)?);
        }
        Ok(items)
    }

    /// Fail if any bytes are left unread.
    pub fn finish(&self) -> Result<()> {
        match self.remaining() {
            0 => Ok(()),
            count => Err(CodecError::TrailingBytes { count }),
        }
    }
}
