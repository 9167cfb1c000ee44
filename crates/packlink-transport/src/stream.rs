//! Byte-stream links driven by a reader thread.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use packlink_frame::{FrameConfig, FrameError, FrameReader, FrameWriter};
use tracing::{debug, error, info, trace, warn};

use crate::error::{Result, TransportError};
use crate::traits::{CallbackSlot, ReadCallback, ReadEvent, Transport};

/// A connected, bidirectional byte stream that can be split into a reader and
/// a writer half.
pub trait StreamLink: Read + Write + Send + 'static {
    /// A second handle on the same link.
    fn try_clone_link(&self) -> std::io::Result<Self>
    where
        Self: Sized;

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> std::io::Result<()>;

    fn set_write_timeout(&mut self, timeout: Option<Duration>) -> std::io::Result<()>;

    /// Unblock pending reads and writes on every handle of the link.
    fn shutdown(&self) -> std::io::Result<()>;
}

impl StreamLink for TcpStream {
    fn try_clone_link(&self) -> std::io::Result<Self> {
        self.try_clone()
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> std::io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn set_write_timeout(&mut self, timeout: Option<Duration>) -> std::io::Result<()> {
        TcpStream::set_write_timeout(self, timeout)
    }

    fn shutdown(&self) -> std::io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

#[cfg(unix)]
impl StreamLink for std::os::unix::net::UnixStream {
    fn try_clone_link(&self) -> std::io::Result<Self> {
        self.try_clone()
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> std::io::Result<()> {
        std::os::unix::net::UnixStream::set_read_timeout(self, timeout)
    }

    fn set_write_timeout(&mut self, timeout: Option<Duration>) -> std::io::Result<()> {
        std::os::unix::net::UnixStream::set_write_timeout(self, timeout)
    }

    fn shutdown(&self) -> std::io::Result<()> {
        std::os::unix::net::UnixStream::shutdown(self, Shutdown::Both)
    }
}

/// Opens a fresh link each time a transport starts.
pub trait Connector: Send {
    type Link: StreamLink;

    fn connect(&mut self) -> Result<Self::Link>;

    /// Human-readable target for logs and errors.
    fn describe(&self) -> String;
}

/// Connects to a TCP address such as `127.0.0.1:5555`.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

impl Connector for TcpConnector {
    type Link = TcpStream;

    fn connect(&mut self) -> Result<TcpStream> {
        let stream = TcpStream::connect(&self.addr).map_err(|source| TransportError::Connect {
            target: self.addr.clone(),
            source,
        })?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.addr)
    }
}

/// Connects to a filesystem-path Unix domain socket.
#[cfg(unix)]
#[derive(Debug, Clone)]
pub struct UnixConnector {
    path: std::path::PathBuf,
}

#[cfg(unix)]
impl UnixConnector {
    /// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Validates the path length up front.
    pub fn new(path: impl Into<std::path::PathBuf>) -> Result<Self> {
        let path = path.into();
        let len = path.as_os_str().len();
        if len >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len,
                max: Self::MAX_PATH_LEN,
            });
        }
        Ok(Self { path })
    }
}

#[cfg(unix)]
impl Connector for UnixConnector {
    type Link = std::os::unix::net::UnixStream;

    fn connect(&mut self) -> Result<Self::Link> {
        debug!(path = ?self.path, "connecting");
        std::os::unix::net::UnixStream::connect(&self.path).map_err(|source| {
            TransportError::Connect {
                target: self.path.display().to_string(),
                source,
            }
        })
    }

    fn describe(&self) -> String {
        format!("unix://{}", self.path.display())
    }
}

/// Wraps a link that is already open. Each start hands out a new handle on it;
/// since `stop` shuts the link down, a stopped transport cannot restart on it.
#[derive(Debug)]
pub struct Preconnected<L> {
    link: L,
}

impl<L: StreamLink> Preconnected<L> {
    pub fn new(link: L) -> Self {
        Self { link }
    }
}

impl<L: StreamLink> Connector for Preconnected<L> {
    type Link = L;

    fn connect(&mut self) -> Result<L> {
        self.link
            .try_clone_link()
            .map_err(|source| TransportError::Connect {
                target: self.describe(),
                source,
            })
    }

    fn describe(&self) -> String {
        "preconnected link".to_string()
    }
}

/// Timing knobs for [`StreamTransport`].
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// How long one blocking read may last before the reader rechecks its stop
    /// flag. Default: 100 ms.
    pub read_poll_interval: Duration,
    /// Write timeout on the link. `None` blocks. Default: 5 s.
    pub write_timeout: Option<Duration>,
    pub frame: FrameConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            read_poll_interval: Duration::from_millis(100),
            write_timeout: Some(Duration::from_secs(5)),
            frame: FrameConfig::default(),
        }
    }
}

impl StreamConfig {
    pub fn with_read_poll_interval(mut self, interval: Duration) -> Self {
        self.read_poll_interval = interval;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }
}

/// [`Transport`] over any [`Connector`]: one reader thread per start, writes
/// on the caller's thread.
pub struct StreamTransport<C: Connector> {
    connector: C,
    config: StreamConfig,
    callback: CallbackSlot,
    running: Option<Running<C::Link>>,
}

struct Running<L> {
    writer: FrameWriter<L>,
    stop: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl<C: Connector> StreamTransport<C> {
    pub fn new(connector: C) -> Self {
        Self::with_config(connector, StreamConfig::default())
    }

    pub fn with_config(connector: C, config: StreamConfig) -> Self {
        Self {
            connector,
            config,
            callback: CallbackSlot::default(),
            running: None,
        }
    }

    /// Whether the transport is started and its link has not dropped.
    pub fn is_connected(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.closed.load(Ordering::Acquire))
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }
}

impl<C: Connector> Transport for StreamTransport<C> {
    fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Ok(());
        }

        let target = self.connector.describe();
        let mut link = self.connector.connect()?;
        link.set_read_timeout(Some(self.config.read_poll_interval))?;
        link.set_write_timeout(self.config.write_timeout)?;
        let reader_link = link.try_clone_link()?;

        let stop = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(AtomicBool::new(false));
        let reader = {
            let reader = FrameReader::with_config(reader_link, self.config.frame);
            let stop = Arc::clone(&stop);
            let closed = Arc::clone(&closed);
            let callback = self.callback.clone();
            std::thread::Builder::new()
                .name("packlink-reader".to_string())
                .spawn(move || read_loop(reader, &stop, &closed, &callback))?
        };

        info!(%target, "transport started");
        self.running = Some(Running {
            writer: FrameWriter::with_config(link, self.config.frame),
            stop,
            closed,
            reader: Some(reader),
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let Some(mut running) = self.running.take() else {
            return Ok(());
        };

        running.stop.store(true, Ordering::Release);
        if let Err(err) = running.writer.get_ref().shutdown() {
            // Already gone when the peer closed first.
            debug!(error = %err, "link shutdown");
        }
        if let Some(reader) = running.reader.take() {
            if reader.join().is_err() {
                error!("reader thread panicked");
            }
        }
        info!(target = %self.connector.describe(), "transport stopped");
        Ok(())
    }

    fn send(&mut self, frame: &[u8]) -> Result<()> {
        let running = self.running.as_mut().ok_or(TransportError::NotStarted)?;
        if running.closed.load(Ordering::Acquire) {
            return Err(TransportError::Disconnected);
        }
        trace!(len = frame.len(), "tx frame");
        running
            .writer
            .write_raw(frame)
            .map_err(TransportError::from_link)
    }

    fn register_read_callback(&mut self, callback: ReadCallback) {
        self.callback.set(callback);
    }
}

impl<C: Connector> Drop for StreamTransport<C> {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn read_loop<L: Read>(
    mut reader: FrameReader<L>,
    stop: &AtomicBool,
    closed: &AtomicBool,
    callback: &CallbackSlot,
) {
    while !stop.load(Ordering::Acquire) {
        match reader.read_frame() {
            Ok(body) => {
                trace!(len = body.len(), "rx frame");
                callback.dispatch(ReadEvent::Frame(body));
            }
            Err(FrameError::Io(err))
                if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(FrameError::FrameTooLarge { size, max }) => {
                warn!(size, max, "dropping oversized frame");
            }
            Err(err) => {
                if !stop.load(Ordering::Acquire) {
                    error!(error = %err, "reader stopped");
                    closed.store(true, Ordering::Release);
                    callback.dispatch(ReadEvent::Closed(err.to_string()));
                }
                return;
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;
    use std::sync::mpsc;

    use bytes::{Bytes, BytesMut};
    use packlink_frame::{decode_packet, encode_packet, FrameReader};

    fn started(link: UnixStream) -> (StreamTransport<Preconnected<UnixStream>>, mpsc::Receiver<ReadEvent>) {
        let config = StreamConfig::default().with_read_poll_interval(Duration::from_millis(10));
        let mut transport = StreamTransport::with_config(Preconnected::new(link), config);
        let (tx, rx) = mpsc::channel();
        transport.register_read_callback(Box::new(move |event| {
            let _ = tx.send(event);
        }));
        transport.start().unwrap();
        (transport, rx)
    }

    fn wire(id: u8, payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        encode_packet(id, payload, &mut buf);
        buf
    }

    fn next(rx: &mpsc::Receiver<ReadEvent>) -> ReadEvent {
        rx.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn frames_split_across_writes_arrive_whole() {
        let (local, mut remote) = UnixStream::pair().unwrap();
        let (mut transport, rx) = started(local);

        let bytes = wire(7, b"\x00split\x00");
        let (head, tail) = bytes.split_at(3);
        remote.write_all(head).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        remote.write_all(tail).unwrap();
        remote.write_all(&wire(8, b"")).unwrap();

        let ReadEvent::Frame(first) = next(&rx) else {
            panic!("expected a frame");
        };
        assert_eq!(decode_packet(&first).unwrap().payload, Bytes::from_static(b"\x00split\x00"));
        let ReadEvent::Frame(second) = next(&rx) else {
            panic!("expected a frame");
        };
        assert_eq!(decode_packet(&second).unwrap().id, 8);

        transport.stop().unwrap();
    }

    #[test]
    fn send_writes_wire_bytes_verbatim() {
        let (local, remote) = UnixStream::pair().unwrap();
        let (mut transport, _rx) = started(local);

        transport.send(&wire(3, b"abc")).unwrap();
        let mut reader = FrameReader::new(remote);
        let packet = reader.read_packet().unwrap();
        assert_eq!((packet.id, &packet.payload[..]), (3, &b"abc"[..]));

        transport.stop().unwrap();
    }

    #[test]
    fn peer_close_reports_once_and_fails_sends() {
        let (local, remote) = UnixStream::pair().unwrap();
        let (mut transport, rx) = started(local);

        drop(remote);
        assert!(matches!(next(&rx), ReadEvent::Closed(_)));
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.send(&wire(1, b"x")),
            Err(TransportError::Disconnected)
        ));

        transport.stop().unwrap();
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let (local, _remote) = UnixStream::pair().unwrap();
        let mut transport = StreamTransport::new(Preconnected::new(local));

        assert!(matches!(transport.send(b"\x01\x01\x00"), Err(TransportError::NotStarted)));
        transport.stop().unwrap();
        transport.start().unwrap();
        transport.start().unwrap();
        assert!(transport.is_connected());
        transport.stop().unwrap();
        transport.stop().unwrap();
        assert!(!transport.is_connected());
    }

    #[test]
    fn stop_does_not_report_closed() {
        let (local, _remote) = UnixStream::pair().unwrap();
        let (mut transport, rx) = started(local);
        transport.stop().unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn unix_connector_rejects_long_paths() {
        let long = "/tmp/".to_string() + &"x".repeat(200);
        assert!(matches!(
            UnixConnector::new(long),
            Err(TransportError::PathTooLong { .. })
        ));
    }

    #[test]
    fn unix_connector_reports_missing_socket() {
        let path = std::env::temp_dir().join(format!("packlink-absent-{}.sock", std::process::id()));
        let mut connector = UnixConnector::new(&path).unwrap();
        assert!(matches!(connector.connect(), Err(TransportError::Connect { .. })));
    }

    #[test]
    fn tcp_link_carries_frames() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let echo = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = FrameReader::new(stream.try_clone().unwrap());
            let mut writer = FrameWriter::new(stream);
            let packet = reader.read_packet().unwrap();
            writer.write_packet(&packet).unwrap();
        });

        let mut transport = StreamTransport::new(TcpConnector::new(addr.to_string()));
        let (tx, rx) = mpsc::channel();
        transport.register_read_callback(Box::new(move |event| {
            let _ = tx.send(event);
        }));
        transport.start().unwrap();
        transport.send(&wire(9, b"ping")).unwrap();

        let ReadEvent::Frame(body) = next(&rx) else {
            panic!("expected a frame");
        };
        assert_eq!(decode_packet(&body).unwrap().id, 9);
        echo.join().unwrap();
        transport.stop().unwrap();
    }
}
