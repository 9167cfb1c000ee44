use std::io::{ErrorKind, Read};

use bytes::Bytes;

use crate::accumulator::FrameAccumulator;
use crate::error::{FrameError, Result};
use crate::packet::{decode_packet, Packet};
use crate::FrameConfig;

const READ_CHUNK_SIZE: usize = 1024;

/// Pulls delimited frames out of a byte stream such as a serial port or socket.
///
/// Reads land in a [`FrameAccumulator`], so a frame split across reads (or
/// several frames in one read) comes out whole and in order.
pub struct FrameReader<T> {
    inner: T,
    frames: FrameAccumulator,
}

impl<T: Read> FrameReader<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            frames: FrameAccumulator::with_config(config),
        }
    }

    /// Read the next stuffed frame body, delimiter removed (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached.
    pub fn read_frame(&mut self) -> Result<Bytes> {
        loop {
            if let Some(frame) = self.frames.next_frame() {
                return frame;
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            match self.inner.read(&mut chunk) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => self.frames.push(&chunk[..n]),
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Read the next frame and split it into ID and payload.
    pub fn read_packet(&mut self) -> Result<Packet> {
        let body = self.read_frame()?;
        decode_packet(&body)
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Unwrap the stream. Bytes already buffered for a partial frame are lost.
    pub fn into_inner(self) -> T {
        self.inner
    }

    pub fn config(&self) -> &FrameConfig {
        self.frames.config()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io::Cursor;

    use bytes::BytesMut;

    use super::*;
    use crate::packet::encode_packet;

    fn wire_of(packets: &[(u8, &[u8])]) -> Vec<u8> {
        let mut wire = BytesMut::new();
        for (id, payload) in packets {
            encode_packet(*id, payload, &mut wire);
        }
        wire.to_vec()
    }

    #[test]
    fn read_single_packet() {
        let mut reader = FrameReader::new(Cursor::new(wire_of(&[(1, b"hello")])));
        let packet = reader.read_packet().unwrap();

        assert_eq!(packet.id, 1);
        assert_eq!(packet.payload.as_ref(), b"hello");
    }

    #[test]
    fn read_multiple_packets() {
        let wire = wire_of(&[(1, b"one"), (2, b"\x00two\x00"), (3, b"")]);
        let mut reader = FrameReader::new(Cursor::new(wire));

        let p1 = reader.read_packet().unwrap();
        let p2 = reader.read_packet().unwrap();
        let p3 = reader.read_packet().unwrap();

        assert_eq!((p1.id, p1.payload.as_ref()), (1, b"one".as_ref()));
        assert_eq!((p2.id, p2.payload.as_ref()), (2, b"\x00two\x00".as_ref()));
        assert_eq!((p3.id, p3.payload.as_ref()), (3, b"".as_ref()));
    }

    #[test]
    fn read_frame_returns_stuffed_body() {
        let mut reader = FrameReader::new(Cursor::new(vec![0x02, 0x11, 0x02, 0x33, 0x00]));
        let body = reader.read_frame().unwrap();
        assert_eq!(body.as_ref(), &[0x02, 0x11, 0x02, 0x33]);
    }

    #[test]
    fn frames_survive_one_byte_reads() {
        let wire = wire_of(&[(4, b"\x00\x00slow\x00")]);
        let chunks = wire.iter().map(|&b| Ok(vec![b])).collect();
        let mut reader = FrameReader::new(Scripted { chunks });

        let packet = reader.read_packet().unwrap();
        assert_eq!(packet, Packet::new(4, &b"\x00\x00slow\x00"[..]));
    }

    #[test]
    fn end_of_stream_is_closed_even_mid_frame() {
        for wire in [vec![], vec![0x05, 0x11, 0x22]] {
            let mut reader = FrameReader::new(Cursor::new(wire));
            assert!(matches!(reader.read_frame(), Err(FrameError::ConnectionClosed)));
        }
    }

    #[test]
    fn runaway_frame_hits_the_size_limit() {
        let mut wire = vec![0x7F; 64];
        wire.push(0x00);
        let config = FrameConfig { max_frame_size: 16 };
        let mut reader = FrameReader::with_config(Cursor::new(wire), config);
        assert!(matches!(
            reader.read_frame(),
            Err(FrameError::FrameTooLarge { max: 16, .. })
        ));
    }

    #[test]
    fn malformed_frame_surfaces_on_read_packet() {
        let mut reader = FrameReader::new(Cursor::new(vec![0x05, 0x11, 0x00]));
        let err = reader.read_packet().unwrap_err();
        assert!(matches!(err, FrameError::Malformed { .. }));
    }

    #[test]
    fn interrupted_read_retries() {
        let chunks = VecDeque::from([
            Err(std::io::Error::from(ErrorKind::Interrupted)),
            Ok(wire_of(&[(8, b"ok")])),
        ]);
        let mut reader = FrameReader::new(Scripted { chunks });
        assert_eq!(reader.read_packet().unwrap(), Packet::new(8, &b"ok"[..]));
    }

    #[test]
    fn timeouts_keep_the_partial_frame() {
        let wire = wire_of(&[(2, b"split")]);
        let (head, tail) = wire.split_at(3);
        let chunks = VecDeque::from([
            Ok(head.to_vec()),
            Err(std::io::Error::from(ErrorKind::WouldBlock)),
            Ok(tail.to_vec()),
        ]);
        let mut reader = FrameReader::new(Scripted { chunks });

        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::WouldBlock));
        assert_eq!(reader.read_packet().unwrap(), Packet::new(2, &b"split"[..]));
    }

    #[test]
    fn resynchronizes_after_line_noise() {
        let mut wire = vec![0x09, 0x41, 0x42, 0x00];
        wire.extend(wire_of(&[(6, b"clean")]));
        let mut reader = FrameReader::new(Cursor::new(wire));

        assert!(matches!(reader.read_packet(), Err(FrameError::Malformed { .. })));
        assert_eq!(reader.read_packet().unwrap(), Packet::new(6, &b"clean"[..]));
    }

    #[cfg(unix)]
    #[test]
    fn frames_cross_a_socket_in_order() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut writer = crate::writer::FrameWriter::new(left);
        let mut reader = FrameReader::new(right);

        let sender = std::thread::spawn(move || {
            for id in 0..=255u8 {
                writer.send_packet(id, &vec![0u8; usize::from(id)]).unwrap();
            }
        });
        for id in 0..=255u8 {
            assert_eq!(reader.read_packet().unwrap(), Packet::new(id, vec![0u8; usize::from(id)]));
        }
        sender.join().unwrap();
    }

    /// Hands out one scripted result per `read` call, then EOF.
    struct Scripted {
        chunks: VecDeque<std::io::Result<Vec<u8>>>,
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let Some(chunk) = self.chunks.pop_front() else {
                return Ok(0);
            };
            let chunk = chunk?;
            assert!(chunk.len() <= buf.len());
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        }
    }
}
