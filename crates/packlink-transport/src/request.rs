//! Strict request/reply links and an adapter that drives them as a
//! callback [`Transport`].

use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bytes::Bytes;
use packlink_frame::{FrameConfig, FrameError, FrameReader, FrameWriter};
use tracing::{debug, error, info, trace, warn};

use crate::error::{Result, TransportError};
use crate::stream::{Connector, StreamLink};
use crate::traits::{
    BlockingTransport, CallbackSlot, Interrupter, ReadCallback, ReadEvent, Transport,
};

#[derive(Debug, Clone)]
pub struct RequestConfig {
    /// How long `receive` waits for a reply. `None` waits forever.
    /// Default: 5 s.
    pub reply_timeout: Option<Duration>,
    pub frame: FrameConfig,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            reply_timeout: Some(Duration::from_secs(5)),
            frame: FrameConfig::default(),
        }
    }
}

impl RequestConfig {
    pub fn with_reply_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.reply_timeout = timeout;
        self
    }
}

/// A [`BlockingTransport`] that allows one request in flight: every `send`
/// must be followed by a `receive` before the next `send`.
///
/// A reply that misses the reply timeout abandons the connection, so a late
/// reply can never be mistaken for the answer to the next request. The next
/// `send` connects again through the connector. A [`Preconnected`] link
/// cannot be reopened, so after a timeout it reports
/// [`TransportError::Disconnected`].
///
/// [`Preconnected`]: crate::stream::Preconnected
pub struct RequestSocket<C: Connector> {
    connector: C,
    config: RequestConfig,
    started: bool,
    link: Option<Halves<C::Link>>,
    /// Another handle on the live link, shut down by [`Interrupter`]s.
    abort: Arc<Mutex<Option<C::Link>>>,
    outstanding: bool,
}

struct Halves<L> {
    reader: FrameReader<L>,
    writer: FrameWriter<L>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl<C: Connector> RequestSocket<C> {
    pub fn new(connector: C) -> Self {
        Self::with_config(connector, RequestConfig::default())
    }

    pub fn with_config(connector: C, config: RequestConfig) -> Self {
        Self {
            connector,
            config,
            started: false,
            link: None,
            abort: Arc::new(Mutex::new(None)),
            outstanding: false,
        }
    }

    /// Whether a request is waiting for its reply.
    pub fn is_outstanding(&self) -> bool {
        self.outstanding
    }

    /// Whether a connection is currently open.
    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    fn connect(&mut self) -> Result<()> {
        let mut link = self.connector.connect()?;
        link.set_read_timeout(self.config.reply_timeout)?;
        let reader = FrameReader::with_config(link.try_clone_link()?, self.config.frame);
        *lock(&self.abort) = Some(link.try_clone_link()?);
        self.link = Some(Halves {
            reader,
            writer: FrameWriter::with_config(link, self.config.frame),
        });
        info!(target = %self.connector.describe(), "request socket connected");
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(halves) = self.link.take() {
            if let Err(err) = halves.writer.get_ref().shutdown() {
                debug!(error = %err, "link shutdown");
            }
        }
        lock(&self.abort).take();
    }
}

impl<C: Connector> BlockingTransport for RequestSocket<C> {
    fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.connect()?;
        self.started = true;
        self.outstanding = false;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.started {
            self.disconnect();
            info!(target = %self.connector.describe(), "request socket closed");
        }
        self.started = false;
        self.outstanding = false;
        Ok(())
    }

    fn send(&mut self, frame: &[u8]) -> Result<()> {
        if !self.started {
            return Err(TransportError::NotStarted);
        }
        if self.outstanding {
            return Err(TransportError::RequestOutstanding);
        }
        if self.link.is_none() {
            debug!(target = %self.connector.describe(), "reconnecting");
            self.connect()?;
        }
        let halves = self.link.as_mut().ok_or(TransportError::Disconnected)?;
        trace!(len = frame.len(), "tx request");
        halves
            .writer
            .write_raw(frame)
            .map_err(TransportError::from_link)?;
        self.outstanding = true;
        Ok(())
    }

    fn receive(&mut self) -> Result<Bytes> {
        if !self.started {
            return Err(TransportError::NotStarted);
        }
        if !self.outstanding {
            return Err(TransportError::NoOutstandingRequest);
        }
        self.outstanding = false;
        let halves = self.link.as_mut().ok_or(TransportError::Disconnected)?;
        match halves.reader.read_frame() {
            Ok(reply) => {
                trace!(len = reply.len(), "rx reply");
                Ok(reply)
            }
            Err(FrameError::Io(err))
                if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                let timeout = self.config.reply_timeout.unwrap_or_default();
                warn!(?timeout, "no reply, dropping the connection");
                self.disconnect();
                Err(TransportError::ReplyTimeout { timeout })
            }
            Err(err) => Err(TransportError::from_link(err)),
        }
    }

    fn interrupter(&self) -> Option<Interrupter> {
        let abort = Arc::clone(&self.abort);
        Some(Interrupter::new(move || {
            if let Some(link) = lock(&abort).as_ref() {
                if let Err(err) = link.shutdown() {
                    debug!(error = %err, "interrupt shutdown");
                }
            }
        }))
    }
}

/// Pause between handoff attempts while the worker is busy.
const HANDOFF_POLL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct PumpConfig {
    /// How long `send` waits for the worker to take a request. The worker is
    /// idle between transactions, so it only stays busy while an earlier
    /// request waits for its reply. `None` waits forever. Default: 250 ms.
    pub handoff_timeout: Option<Duration>,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            handoff_timeout: Some(Duration::from_millis(250)),
        }
    }
}

impl PumpConfig {
    pub fn with_handoff_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handoff_timeout = timeout;
        self
    }
}

/// Runs a [`BlockingTransport`] on a worker thread so it can serve as a
/// [`Transport`].
///
/// `send` hands the request to the worker and returns once the worker has
/// taken it, or fails with [`TransportError::Busy`] after the handoff
/// timeout. The worker sends it, waits for exactly one reply and passes the
/// reply to the read callback. A reply timeout only abandons that request;
/// any other failure is reported as [`ReadEvent::Closed`] and ends the
/// worker. `stop` interrupts a pending `receive` when the inner transport
/// offers an [`Interrupter`].
pub struct Pumped<B: BlockingTransport + 'static> {
    inner: Option<B>,
    config: PumpConfig,
    callback: CallbackSlot,
    worker: Option<Worker<B>>,
}

struct Worker<B> {
    requests: SyncSender<Bytes>,
    stopping: Arc<AtomicBool>,
    interrupter: Option<Interrupter>,
    thread: JoinHandle<B>,
}

impl<B: BlockingTransport + 'static> Pumped<B> {
    pub fn new(inner: B) -> Self {
        Self::with_config(inner, PumpConfig::default())
    }

    pub fn with_config(inner: B, config: PumpConfig) -> Self {
        Self {
            inner: Some(inner),
            config,
            callback: CallbackSlot::default(),
            worker: None,
        }
    }

    /// The wrapped transport, when no worker owns it.
    pub fn get_ref(&self) -> Option<&B> {
        self.inner.as_ref()
    }
}

impl<B: BlockingTransport + 'static> Transport for Pumped<B> {
    fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let mut inner = self
            .inner
            .take()
            .ok_or_else(|| TransportError::Link("transport lost after worker failure".to_string()))?;
        if let Err(err) = inner.start() {
            self.inner = Some(inner);
            return Err(err);
        }

        let interrupter = inner.interrupter();
        let stopping = Arc::new(AtomicBool::new(false));
        let (requests, inbox) = mpsc::sync_channel(0);
        let thread = {
            let callback = self.callback.clone();
            let stopping = Arc::clone(&stopping);
            std::thread::Builder::new()
                .name("packlink-pump".to_string())
                .spawn(move || pump(inner, &inbox, &callback, &stopping))?
        };
        self.worker = Some(Worker {
            requests,
            stopping,
            interrupter,
            thread,
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        worker.stopping.store(true, Ordering::Release);
        drop(worker.requests);
        if let Some(interrupter) = &worker.interrupter {
            interrupter.interrupt();
        }
        let mut inner = worker.thread.join().map_err(|_| {
            error!("pump worker panicked");
            TransportError::Link("pump worker panicked".to_string())
        })?;
        let result = inner.stop();
        self.inner = Some(inner);
        result
    }

    fn send(&mut self, frame: &[u8]) -> Result<()> {
        let worker = self.worker.as_ref().ok_or(TransportError::NotStarted)?;
        let began = Instant::now();
        let mut request = Bytes::copy_from_slice(frame);
        loop {
            match worker.requests.try_send(request) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Disconnected(_)) => return Err(TransportError::Disconnected),
                Err(TrySendError::Full(back)) => {
                    let waited = began.elapsed();
                    if self.config.handoff_timeout.is_some_and(|limit| waited >= limit) {
                        warn!(?waited, "request worker busy");
                        return Err(TransportError::Busy { waited });
                    }
                    request = back;
                    std::thread::sleep(HANDOFF_POLL);
                }
            }
        }
    }

    fn register_read_callback(&mut self, callback: ReadCallback) {
        self.callback.set(callback);
    }
}

impl<B: BlockingTransport + 'static> Drop for Pumped<B> {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn pump<B: BlockingTransport>(
    mut inner: B,
    inbox: &Receiver<Bytes>,
    callback: &CallbackSlot,
    stopping: &AtomicBool,
) -> B {
    while let Ok(request) = inbox.recv() {
        match inner.send(&request).and_then(|()| inner.receive()) {
            Ok(reply) => callback.dispatch(ReadEvent::Frame(reply)),
            Err(TransportError::ReplyTimeout { timeout }) => {
                warn!(?timeout, "request abandoned");
            }
            Err(err) => {
                if !stopping.load(Ordering::Acquire) {
                    error!(error = %err, "request failed");
                    callback.dispatch(ReadEvent::Closed(err.to_string()));
                }
                break;
            }
        }
    }
    inner
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::os::unix::net::{UnixListener, UnixStream};
    use std::path::PathBuf;
    use std::sync::Condvar;

    use crate::stream::{Preconnected, UnixConnector};

    #[test]
    fn one_request_at_a_time() {
        let (local, remote) = UnixStream::pair().unwrap();
        let server = std::thread::spawn(move || {
            let mut reader = FrameReader::new(remote.try_clone().unwrap());
            let mut writer = FrameWriter::new(remote);
            let request = reader.read_frame().unwrap();
            writer.write_frame(&request).unwrap();
        });

        let mut socket = RequestSocket::new(Preconnected::new(local));
        assert!(matches!(socket.send(b"\x01\x01\x00"), Err(TransportError::NotStarted)));
        socket.start().unwrap();
        assert!(matches!(socket.receive(), Err(TransportError::NoOutstandingRequest)));

        socket.send(b"\x02\x07\x00").unwrap();
        assert!(socket.is_outstanding());
        assert!(matches!(
            socket.send(b"\x02\x08\x00"),
            Err(TransportError::RequestOutstanding)
        ));
        assert_eq!(socket.receive().unwrap(), Bytes::from_static(b"\x02\x07"));
        assert!(!socket.is_outstanding());

        server.join().unwrap();
        let after_close = socket
            .send(b"\x02\x09\x00")
            .and_then(|()| socket.receive().map(drop));
        assert!(matches!(after_close, Err(TransportError::Disconnected)));
        socket.stop().unwrap();
    }

    fn socket_path(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("pk-req-{name}-{}.sock", std::process::id()));
        let _ = std::fs::remove_file(&path);
        path
    }

    #[test]
    fn missed_reply_drops_the_connection_and_the_next_request_reconnects() {
        let path = socket_path("late");
        let listener = UnixListener::bind(&path).unwrap();
        let device = std::thread::spawn(move || {
            // First connection: swallow the request, then expect a hangup.
            let (first, _) = listener.accept().unwrap();
            let mut reader = FrameReader::new(first);
            reader.read_frame().unwrap();
            assert!(matches!(reader.read_frame(), Err(FrameError::ConnectionClosed)));

            let (second, _) = listener.accept().unwrap();
            let mut reader = FrameReader::new(second.try_clone().unwrap());
            let mut writer = FrameWriter::new(second);
            let request = reader.read_frame().unwrap();
            writer.write_frame(&request).unwrap();
        });

        let config = RequestConfig::default().with_reply_timeout(Some(Duration::from_millis(100)));
        let mut socket = RequestSocket::with_config(UnixConnector::new(&path).unwrap(), config);
        socket.start().unwrap();

        socket.send(b"\x02\x01\x00").unwrap();
        assert!(matches!(
            socket.receive(),
            Err(TransportError::ReplyTimeout { timeout }) if timeout == Duration::from_millis(100)
        ));
        assert!(!socket.is_connected());
        assert!(!socket.is_outstanding());

        socket.send(b"\x02\x02\x00").unwrap();
        assert!(socket.is_connected());
        assert_eq!(socket.receive().unwrap(), Bytes::from_static(b"\x02\x02"));

        device.join().unwrap();
        socket.stop().unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn interrupter_unblocks_a_pending_receive() {
        let (local, _remote) = UnixStream::pair().unwrap();
        let config = RequestConfig::default().with_reply_timeout(None);
        let mut socket = RequestSocket::with_config(Preconnected::new(local), config);
        socket.start().unwrap();
        let interrupter = socket.interrupter().unwrap();

        socket.send(b"\x01\x05\x00").unwrap();
        let waiter = std::thread::spawn(move || socket.receive().map(drop));
        std::thread::sleep(Duration::from_millis(50));
        interrupter.interrupt();

        assert!(matches!(waiter.join().unwrap(), Err(TransportError::Disconnected)));
    }

    /// Answers each request with its body reversed.
    #[derive(Default)]
    struct Reverser {
        pending: VecDeque<Bytes>,
        started: Arc<Mutex<bool>>,
        fail_after: Option<usize>,
        /// Requests to let time out before answering again.
        silent: usize,
    }

    impl BlockingTransport for Reverser {
        fn start(&mut self) -> Result<()> {
            *self.started.lock().unwrap() = true;
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            *self.started.lock().unwrap() = false;
            Ok(())
        }

        fn send(&mut self, frame: &[u8]) -> Result<()> {
            if let Some(left) = self.fail_after.as_mut() {
                if *left == 0 {
                    return Err(TransportError::Disconnected);
                }
                *left -= 1;
            }
            let body = &frame[..frame.len() - 1];
            self.pending.push_back(body.iter().rev().copied().collect());
            Ok(())
        }

        fn receive(&mut self) -> Result<Bytes> {
            let reply = self.pending.pop_front().ok_or(TransportError::NoOutstandingRequest)?;
            if self.silent > 0 {
                self.silent -= 1;
                return Err(TransportError::ReplyTimeout {
                    timeout: Duration::from_millis(1),
                });
            }
            Ok(reply)
        }
    }

    fn events<B: BlockingTransport + 'static>(pumped: &mut Pumped<B>) -> mpsc::Receiver<ReadEvent> {
        let (tx, rx) = mpsc::channel();
        pumped.register_read_callback(Box::new(move |event| {
            let _ = tx.send(event);
        }));
        rx
    }

    #[test]
    fn pumped_delivers_each_reply_to_the_callback() {
        let started = Arc::new(Mutex::new(false));
        let mut transport = Pumped::new(Reverser {
            started: Arc::clone(&started),
            ..Reverser::default()
        });
        let rx = events(&mut transport);

        transport.start().unwrap();
        assert!(*started.lock().unwrap());
        transport.send(b"\x03\x01\x02\x00").unwrap();
        transport.send(b"\x02\x09\x00").unwrap();

        let wait = Duration::from_secs(5);
        assert_eq!(
            rx.recv_timeout(wait).unwrap(),
            ReadEvent::Frame(Bytes::from_static(b"\x02\x01\x03"))
        );
        assert_eq!(
            rx.recv_timeout(wait).unwrap(),
            ReadEvent::Frame(Bytes::from_static(b"\x09\x02"))
        );

        transport.stop().unwrap();
        assert!(!*started.lock().unwrap());
        assert!(transport.get_ref().is_some());
    }

    #[test]
    fn pumped_skips_a_timed_out_request() {
        let mut transport = Pumped::new(Reverser {
            silent: 1,
            ..Reverser::default()
        });
        let rx = events(&mut transport);
        transport.start().unwrap();

        transport.send(b"\x02\x01\x00").unwrap();
        transport.send(b"\x02\x02\x00").unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            ReadEvent::Frame(Bytes::from_static(b"\x02\x02"))
        );
        transport.stop().unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn pumped_reports_link_failure() {
        let mut transport = Pumped::new(Reverser {
            fail_after: Some(0),
            ..Reverser::default()
        });
        let rx = events(&mut transport);
        assert!(matches!(transport.send(b"\x01\x01\x00"), Err(TransportError::NotStarted)));

        transport.start().unwrap();
        transport.send(b"\x01\x01\x00").unwrap();
        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            ReadEvent::Closed(_)
        ));
        assert!(matches!(transport.send(b"\x01\x01\x00"), Err(TransportError::Disconnected)));
        transport.stop().unwrap();
    }

    /// Never replies; `receive` blocks until interrupted.
    #[derive(Default)]
    struct Stall {
        released: Arc<(Mutex<bool>, Condvar)>,
    }

    impl BlockingTransport for Stall {
        fn start(&mut self) -> Result<()> {
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            Ok(())
        }

        fn send(&mut self, _frame: &[u8]) -> Result<()> {
            Ok(())
        }

        fn receive(&mut self) -> Result<Bytes> {
            let (released, wake) = &*self.released;
            let mut released = released.lock().unwrap();
            while !*released {
                released = wake.wait(released).unwrap();
            }
            Err(TransportError::Disconnected)
        }

        fn interrupter(&self) -> Option<Interrupter> {
            let released = Arc::clone(&self.released);
            Some(Interrupter::new(move || {
                let (flag, wake) = &*released;
                *flag.lock().unwrap() = true;
                wake.notify_all();
            }))
        }
    }

    #[test]
    fn busy_worker_bounds_the_handoff_and_stop_interrupts_it() {
        let config = PumpConfig::default().with_handoff_timeout(Some(Duration::from_millis(200)));
        let mut transport = Pumped::with_config(Stall::default(), config);
        let rx = events(&mut transport);
        transport.start().unwrap();

        transport.send(b"\x01\x01\x00").unwrap();
        let began = Instant::now();
        assert!(matches!(
            transport.send(b"\x01\x02\x00"),
            Err(TransportError::Busy { waited }) if waited >= Duration::from_millis(200)
        ));
        assert!(began.elapsed() < Duration::from_secs(2));

        transport.stop().unwrap();
        assert!(rx.try_recv().is_err(), "stopping must not report a closed link");
    }
}
