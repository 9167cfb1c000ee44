use bytes::{Bytes, BytesMut};

use crate::error::Result;
use crate::wire::WireReader;

/// A schema message with a fixed wire layout.
///
/// Implementations are emitted by the code generator. `encode` appends the
/// message to `dst`; `decode` consumes exactly the bytes `encode` produced.
pub trait Message: Sized {
    /// Schema name of the message, used in logs and errors.
    const NAME: &'static str;

    fn encode(&self, dst: &mut BytesMut) -> Result<()>;

    fn decode(reader: &mut WireReader<'_>) -> Result<Self>;

    /// Encode into a fresh buffer.
    fn to_bytes(&self) -> Result<Bytes> {
        let mut dst = BytesMut::new();
        self.encode(&mut dst)?;
        Ok(dst.freeze())
    }

    /// Decode a message from the front of `buf`, returning it with the number
    /// of bytes consumed.
    fn decode_prefix(buf: &[u8]) -> Result<(Self, usize)> {
        let mut reader = WireReader::new(buf);
        let message = Self::decode(&mut reader)?;
        Ok((message, reader.position()))
    }

    /// Decode a message that must fill `buf` exactly.
    fn from_bytes(buf: &[u8]) -> Result<Self> {
        let mut reader = WireReader::new(buf);
        let message = Self::decode(&mut reader)?;
        reader.finish()?;
        Ok(message)
    }
}

/// An enumeration carried as one unsigned byte.
pub trait WireEnum: Sized + Copy {
    fn to_wire(self) -> u8;

    /// Fails with [`CodecError::InvalidEnum`](crate::CodecError::InvalidEnum)
    /// for values the enum does not declare.
    fn from_wire(value: u8) -> Result<Self>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CodecError;
    use crate::wire;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Level {
        Low,
        High,
    }

    impl WireEnum for Level {
        fn to_wire(self) -> u8 {
            self as u8
        }

        fn from_wire(value: u8) -> Result<Self> {
            match value {
                0 => Ok(Self::Low),
                1 => Ok(Self::High),
                other => Err(CodecError::invalid_enum("Level", other)),
            }
        }
    }

    #[derive(Debug, PartialEq)]
    struct Sample {
        text: String,
        level: Level,
    }

    impl Message for Sample {
        const NAME: &'static str = "Sample";

        fn encode(&self, dst: &mut BytesMut) -> Result<()> {
            wire::put_str(dst, &self.text)?;
            wire::put_enum(dst, self.level);
            Ok(())
        }

        fn decode(reader: &mut WireReader<'_>) -> Result<Self> {
            Ok(Self {
                text: reader.string()?,
                level: reader.enumeration()?,
            })
        }
    }

    #[test]
    fn to_bytes_and_back() {
        let sample = Sample {
            text: "Hello, World!".to_string(),
            level: Level::High,
        };
        let bytes = sample.to_bytes().unwrap();

        let mut expected = vec![0x0D, 0x00];
        expected.extend_from_slice(b"Hello, World!");
        expected.push(0x01);
        assert_eq!(bytes.as_ref(), expected.as_slice());

        assert_eq!(Sample::from_bytes(&bytes).unwrap(), sample);
    }

    #[test]
    fn decode_prefix_reports_consumed() {
        let buf = [0x01, 0x00, b'x', 0x00, 0xAA, 0xBB];
        let (sample, used) = Sample::decode_prefix(&buf).unwrap();
        assert_eq!(used, 4);
        assert_eq!(sample.level, Level::Low);

        assert_eq!(
            Sample::from_bytes(&buf),
            Err(CodecError::TrailingBytes { count: 2 })
        );
    }

    #[test]
    fn unknown_enum_value_rejected() {
        let buf = [0x00, 0x00, 0x07];
        assert_eq!(
            Sample::from_bytes(&buf),
            Err(CodecError::InvalidEnum {
                name: "Level".to_string(),
                value: 7
            })
        );
    }
}
