use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use tracing::trace;

use crate::error::{FrameError, Result};
use crate::packet::{encode_packet, Packet};
use crate::{FrameConfig, DELIMITER};

const INITIAL_BUFFER_CAPACITY: usize = 1024;

/// Pushes whole frames into a byte stream, one flushed write per frame.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Write an already stuffed frame body followed by the delimiter.
    pub fn write_frame(&mut self, body: &[u8]) -> Result<()> {
        self.check_size(body.len())?;
        self.buf.clear();
        self.buf.extend_from_slice(body);
        self.buf.extend_from_slice(&[DELIMITER]);
        self.write_buffered()
    }

    /// Write bytes that already end in their delimiters, such as the output of
    /// [`encode_packet`].
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.buf.clear();
        self.buf.extend_from_slice(bytes);
        self.write_buffered()
    }

    /// Stuff and send a packet.
    pub fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        self.send_packet(packet.id, &packet.payload)
    }

    /// Stuff `id ++ payload` and send it as one frame.
    pub fn send_packet(&mut self, id: u8, payload: &[u8]) -> Result<()> {
        self.buf.clear();
        encode_packet(id, payload, &mut self.buf);
        self.check_size(self.buf.len() - 1)?;
        trace!(id, len = payload.len(), "frame out");
        self.write_buffered()
    }

    fn check_size(&self, size: usize) -> Result<()> {
        if size > self.config.max_frame_size {
            return Err(FrameError::FrameTooLarge {
                size,
                max: self.config.max_frame_size,
            });
        }
        Ok(())
    }

    fn write_buffered(&mut self) -> Result<()> {
        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if transient(&err) => {}
                Err(err) => return Err(err.into()),
            }
        }

        self.flush()
    }

    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if transient(&err) => {}
                Err(err) => return Err(err.into()),
            }
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

/// Serial drivers report a full output queue as `WouldBlock`; spin until it drains.
fn transient(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::Interrupted | ErrorKind::WouldBlock)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io::{self, Cursor};

    use super::*;
    use crate::reader::FrameReader;

    fn written(writer: FrameWriter<Cursor<Vec<u8>>>) -> Vec<u8> {
        writer.into_inner().into_inner()
    }

    /// Sink that answers each write from a queue of canned outcomes and
    /// accepts everything once the queue runs dry. `Ok(n)` entries take at
    /// most `n` bytes.
    #[derive(Default)]
    struct Sink {
        writes: VecDeque<io::Result<usize>>,
        flushes: VecDeque<io::Result<()>>,
        flushed: usize,
        data: Vec<u8>,
    }

    impl Sink {
        fn scripted(writes: impl IntoIterator<Item = io::Result<usize>>) -> Self {
            Self {
                writes: writes.into_iter().collect(),
                ..Self::default()
            }
        }
    }

    impl Write for Sink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = match self.writes.pop_front() {
                Some(Ok(limit)) => limit.min(buf.len()),
                Some(Err(err)) => return Err(err),
                None => buf.len(),
            };
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.flushes.pop_front().unwrap_or(Ok(()))?;
            self.flushed += 1;
            Ok(())
        }
    }

    #[test]
    fn packet_is_stuffed_and_terminated() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::new()));
        writer.send_packet(0x11, &[0x00, 0x33]).unwrap();
        assert_eq!(written(writer), [0x02, 0x11, 0x02, 0x33, 0x00]);
    }

    #[test]
    fn raw_bytes_pass_through_untouched() {
        let mut wire = BytesMut::new();
        encode_packet(2, b"ab", &mut wire);
        encode_packet(3, b"", &mut wire);

        let mut writer = FrameWriter::new(Cursor::new(Vec::new()));
        writer.write_raw(&wire).unwrap();
        writer.write_frame(&[0x01, 0x01]).unwrap();

        let mut expected = wire.to_vec();
        expected.extend_from_slice(&[0x01, 0x01, 0x00]);
        assert_eq!(written(writer), expected);
    }

    #[test]
    fn reader_recovers_what_was_written() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::new()));
        writer.write_packet(&Packet::new(3, &b"z"[..])).unwrap();
        writer.send_packet(0, b"").unwrap();

        let mut reader = FrameReader::new(Cursor::new(written(writer)));
        assert_eq!(reader.read_packet().unwrap(), Packet::new(3, &b"z"[..]));
        assert_eq!(reader.read_packet().unwrap(), Packet::new(0, &b""[..]));
    }

    #[test]
    fn too_large_frames_never_reach_the_stream() {
        let config = FrameConfig { max_frame_size: 4 };
        let mut writer = FrameWriter::with_config(Cursor::new(Vec::new()), config);

        let err = writer.send_packet(1, b"oversized").unwrap_err();
        assert!(matches!(err, FrameError::FrameTooLarge { max: 4, .. }));
        let err = writer.write_frame(&[1; 5]).unwrap_err();
        assert!(matches!(err, FrameError::FrameTooLarge { size: 5, .. }));
        assert!(written(writer).is_empty());
    }

    #[test]
    fn short_and_transient_writes_are_retried() {
        let sink = Sink::scripted([
            Err(io::ErrorKind::Interrupted.into()),
            Ok(2),
            Err(io::ErrorKind::WouldBlock.into()),
            Ok(1),
        ]);
        let mut writer = FrameWriter::new(sink);
        writer.get_mut().flushes.push_back(Err(io::ErrorKind::Interrupted.into()));

        writer.send_packet(5, b"retry").unwrap();

        let sink = writer.into_inner();
        let mut expected = BytesMut::new();
        encode_packet(5, b"retry", &mut expected);
        assert_eq!(sink.data, expected.as_ref());
        assert_eq!(sink.flushed, 1);
    }

    #[test]
    fn zero_length_write_means_closed() {
        let mut writer = FrameWriter::new(Sink::scripted([Ok(0)]));
        let err = writer.send_packet(1, b"x").unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn hard_errors_surface() {
        let mut writer = FrameWriter::new(Sink::scripted([Err(io::ErrorKind::BrokenPipe.into())]));
        match writer.send_packet(1, b"x") {
            Err(FrameError::Io(err)) => assert_eq!(err.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("unexpected {other:?}"),
        }
    }
}
