//! Transport over notification-based links, driven by a tokio actor.
//!
//! Links such as a BLE UART deliver data as notifications from an async
//! client. [`EventLinkTransport`] owns the link on a dedicated thread running
//! a current-thread runtime. `start`, `send` and `stop` become [`Command`]
//! messages that the actor answers over a oneshot channel, and notifications
//! flow through a bounded channel into the same loop, which reassembles
//! frames and dispatches them one at a time.
//!
//! The read callback runs on the actor thread. Calling `send` on the same
//! transport from inside it deadlocks. The transport's methods block the
//! calling thread, so they fail with [`TransportError::WithinRuntime`] when
//! called from a tokio runtime; drive it from a plain thread or
//! `spawn_blocking`.

use std::future::Future;
use std::thread::JoinHandle;

use bytes::Bytes;
use packlink_frame::{FrameAccumulator, FrameConfig};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use crate::error::{Result, TransportError};
use crate::traits::{CallbackSlot, ReadCallback, ReadEvent, Transport};

/// An async link that delivers inbound bytes as notifications.
pub trait NotifyLink: Send + 'static {
    fn connect(&mut self) -> impl Future<Output = Result<()>>;

    /// Start delivering notifications into `notify`. Dropping every sender
    /// tells the transport the link went away.
    fn subscribe(&mut self, notify: mpsc::Sender<Bytes>) -> impl Future<Output = Result<()>>;

    fn write(&mut self, data: &[u8]) -> impl Future<Output = Result<()>>;

    fn disconnect(&mut self) -> impl Future<Output = Result<()>>;
}

#[derive(Debug, Clone)]
pub struct EventLinkConfig {
    /// Notifications buffered before the link is back-pressured. Default: 64.
    pub notify_capacity: usize,
    pub frame: FrameConfig,
}

impl Default for EventLinkConfig {
    fn default() -> Self {
        Self {
            notify_capacity: 64,
            frame: FrameConfig::default(),
        }
    }
}

type Reply = oneshot::Sender<Result<()>>;

enum Command {
    Start(Reply),
    Write(Bytes, Reply),
    Stop(Reply),
}

struct Actor<L> {
    commands: mpsc::Sender<Command>,
    thread: JoinHandle<L>,
}

/// [`Transport`] over a [`NotifyLink`].
pub struct EventLinkTransport<L: NotifyLink> {
    link: Option<L>,
    config: EventLinkConfig,
    callback: CallbackSlot,
    actor: Option<Actor<L>>,
}

impl<L: NotifyLink> EventLinkTransport<L> {
    pub fn new(link: L) -> Self {
        Self::with_config(link, EventLinkConfig::default())
    }

    pub fn with_config(link: L, config: EventLinkConfig) -> Self {
        Self {
            link: Some(link),
            config,
            callback: CallbackSlot::default(),
            actor: None,
        }
    }

    fn spawn(&mut self) -> Result<()> {
        let link = self
            .link
            .take()
            .ok_or_else(|| TransportError::Link("link lost after actor failure".to_string()))?;
        let (commands, inbox) = mpsc::channel(1);
        let callback = self.callback.clone();
        let config = self.config.clone();
        let thread = std::thread::Builder::new()
            .name("packlink-link".to_string())
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build();
                match runtime {
                    Ok(runtime) => runtime.block_on(run(link, inbox, callback, config)),
                    Err(err) => {
                        error!(error = %err, "failed to build link runtime");
                        link
                    }
                }
            })?;
        self.actor = Some(Actor { commands, thread });
        Ok(())
    }

    /// Send a command and wait for the actor's answer.
    fn request(&self, command: impl FnOnce(Reply) -> Command) -> Result<()> {
        outside_runtime()?;
        let actor = self.actor.as_ref().ok_or(TransportError::NotStarted)?;
        let (reply, answer) = oneshot::channel();
        actor
            .commands
            .blocking_send(command(reply))
            .map_err(|_| actor_gone())?;
        answer.blocking_recv().map_err(|_| actor_gone())?
    }

    fn join(&mut self) {
        let Some(actor) = self.actor.take() else {
            return;
        };
        drop(actor.commands);
        match actor.thread.join() {
            Ok(link) => self.link = Some(link),
            Err(_) => error!("link actor panicked"),
        }
    }
}

/// `blocking_send` and `blocking_recv` panic on a runtime thread.
fn outside_runtime() -> Result<()> {
    if tokio::runtime::Handle::try_current().is_ok() {
        return Err(TransportError::WithinRuntime);
    }
    Ok(())
}

fn actor_gone() -> TransportError {
    TransportError::Link("link actor stopped".to_string())
}

impl<L: NotifyLink> Transport for EventLinkTransport<L> {
    fn start(&mut self) -> Result<()> {
        if self.actor.is_some() {
            return Ok(());
        }
        outside_runtime()?;
        self.spawn()?;
        if let Err(err) = self.request(Command::Start) {
            self.join();
            return Err(err);
        }
        info!("event link started");
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.actor.is_none() {
            return Ok(());
        }
        let result = self.request(Command::Stop);
        if matches!(result, Err(TransportError::WithinRuntime)) {
            return result;
        }
        self.join();
        info!("event link stopped");
        result
    }

    fn send(&mut self, frame: &[u8]) -> Result<()> {
        let frame = Bytes::copy_from_slice(frame);
        self.request(|reply| Command::Write(frame, reply))
    }

    fn register_read_callback(&mut self, callback: ReadCallback) {
        self.callback.set(callback);
    }
}

impl<L: NotifyLink> Drop for EventLinkTransport<L> {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

async fn open<L: NotifyLink>(link: &mut L, capacity: usize) -> Result<mpsc::Receiver<Bytes>> {
    link.connect().await?;
    let (notify, notifications) = mpsc::channel(capacity);
    if let Err(err) = link.subscribe(notify).await {
        let _ = link.disconnect().await;
        return Err(err);
    }
    Ok(notifications)
}

async fn next_chunk(notifications: &mut Option<mpsc::Receiver<Bytes>>) -> Option<Bytes> {
    match notifications {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn run<L: NotifyLink>(
    mut link: L,
    mut inbox: mpsc::Receiver<Command>,
    callback: CallbackSlot,
    config: EventLinkConfig,
) -> L {
    let mut frames = FrameAccumulator::with_config(config.frame);
    let mut notifications: Option<mpsc::Receiver<Bytes>> = None;
    let mut connected = false;

    loop {
        tokio::select! {
            command = inbox.recv() => {
                let Some(command) = command else {
                    break;
                };
                match command {
                    Command::Start(reply) => {
                        let result = match open(&mut link, config.notify_capacity).await {
                            Ok(rx) => {
                                frames.clear();
                                notifications = Some(rx);
                                connected = true;
                                Ok(())
                            }
                            Err(err) => Err(err),
                        };
                        let _ = reply.send(result);
                    }
                    Command::Write(data, reply) => {
                        let result = if connected {
                            trace!(len = data.len(), "tx frame");
                            link.write(&data).await
                        } else {
                            Err(TransportError::Disconnected)
                        };
                        let _ = reply.send(result);
                    }
                    Command::Stop(reply) => {
                        notifications = None;
                        let result = if connected {
                            link.disconnect().await
                        } else {
                            Ok(())
                        };
                        connected = false;
                        let _ = reply.send(result);
                        break;
                    }
                }
            }
            chunk = next_chunk(&mut notifications) => match chunk {
                Some(chunk) => {
                    trace!(len = chunk.len(), "rx notification");
                    frames.push(&chunk);
                    while let Some(frame) = frames.next_frame() {
                        match frame {
                            Ok(body) => callback.dispatch(ReadEvent::Frame(body)),
                            Err(err) => warn!(error = %err, "dropping frame"),
                        }
                    }
                }
                None => {
                    notifications = None;
                    connected = false;
                    error!("link stopped delivering notifications");
                    callback.dispatch(ReadEvent::Closed("notification stream ended".to_string()));
                }
            },
        }
    }
    if connected {
        if let Err(err) = link.disconnect().await {
            warn!(error = %err, "disconnect on exit");
        }
    }
    debug!("link actor exiting");
    link
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default, Clone)]
    struct Shared {
        notify: Arc<Mutex<Option<mpsc::Sender<Bytes>>>>,
        written: Arc<Mutex<Vec<Vec<u8>>>>,
        disconnects: Arc<Mutex<usize>>,
    }

    struct MockLink {
        shared: Shared,
        refuse: bool,
    }

    impl NotifyLink for MockLink {
        async fn connect(&mut self) -> Result<()> {
            if self.refuse {
                return Err(TransportError::Link("refused".to_string()));
            }
            Ok(())
        }

        async fn subscribe(&mut self, notify: mpsc::Sender<Bytes>) -> Result<()> {
            *self.shared.notify.lock().unwrap() = Some(notify);
            Ok(())
        }

        async fn write(&mut self, data: &[u8]) -> Result<()> {
            self.shared.written.lock().unwrap().push(data.to_vec());
            Ok(())
        }

        async fn disconnect(&mut self) -> Result<()> {
            self.shared.notify.lock().unwrap().take();
            *self.shared.disconnects.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn transport(refuse: bool) -> (EventLinkTransport<MockLink>, Shared, std::sync::mpsc::Receiver<ReadEvent>) {
        let shared = Shared::default();
        let mut transport = EventLinkTransport::new(MockLink {
            shared: shared.clone(),
            refuse,
        });
        let (tx, rx) = std::sync::mpsc::channel();
        transport.register_read_callback(Box::new(move |event| {
            let _ = tx.send(event);
        }));
        (transport, shared, rx)
    }

    fn notify(shared: &Shared, chunk: &'static [u8]) {
        let sender = shared.notify.lock().unwrap().clone().unwrap();
        sender.blocking_send(Bytes::from_static(chunk)).unwrap();
    }

    #[test]
    fn notifications_are_reassembled_into_frames() {
        let (mut transport, shared, rx) = transport(false);
        transport.start().unwrap();

        notify(&shared, &[0x02, 0x11, 0x02]);
        notify(&shared, &[0x33, 0x00, 0x01, 0x01]);
        notify(&shared, &[0x00]);

        let wait = Duration::from_secs(5);
        assert_eq!(
            rx.recv_timeout(wait).unwrap(),
            ReadEvent::Frame(Bytes::from_static(&[0x02, 0x11, 0x02, 0x33]))
        );
        assert_eq!(
            rx.recv_timeout(wait).unwrap(),
            ReadEvent::Frame(Bytes::from_static(&[0x01, 0x01]))
        );

        transport.stop().unwrap();
        assert_eq!(*shared.disconnects.lock().unwrap(), 1);
    }

    #[test]
    fn send_goes_through_the_actor() {
        let (mut transport, shared, _rx) = transport(false);
        assert!(matches!(transport.send(b"\x01\x01\x00"), Err(TransportError::NotStarted)));

        transport.start().unwrap();
        transport.start().unwrap();
        transport.send(b"\x02\x05\x00").unwrap();
        transport.stop().unwrap();
        transport.stop().unwrap();

        assert_eq!(*shared.written.lock().unwrap(), vec![b"\x02\x05\x00".to_vec()]);
    }

    #[test]
    fn dropped_notifications_close_the_link() {
        let (mut transport, shared, rx) = transport(false);
        transport.start().unwrap();

        shared.notify.lock().unwrap().take();
        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            ReadEvent::Closed(_)
        ));
        assert!(matches!(transport.send(b"\x01\x01\x00"), Err(TransportError::Disconnected)));

        transport.stop().unwrap();
        assert_eq!(*shared.disconnects.lock().unwrap(), 0);
        transport.start().unwrap();
        transport.send(b"\x01\x01\x00").unwrap();
        transport.stop().unwrap();
    }

    #[test]
    fn failed_connect_leaves_transport_restartable() {
        let (mut transport, _shared, _rx) = transport(true);
        assert!(matches!(transport.start(), Err(TransportError::Link(_))));
        assert!(matches!(transport.send(b"\x01\x01\x00"), Err(TransportError::NotStarted)));
        transport.link.as_mut().unwrap().refuse = false;
        transport.start().unwrap();
        transport.stop().unwrap();
    }

    #[test]
    fn calls_from_inside_a_runtime_are_refused() {
        let (mut transport, shared, _rx) = transport(false);
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();

        let started = runtime.block_on(async { transport.start() });
        assert!(matches!(started, Err(TransportError::WithinRuntime)));
        assert!(matches!(transport.send(b"\x01\x01\x00"), Err(TransportError::NotStarted)));

        transport.start().unwrap();
        let sent = runtime.block_on(async { transport.send(b"\x01\x01\x00") });
        assert!(matches!(sent, Err(TransportError::WithinRuntime)));
        let stopped = runtime.block_on(async { transport.stop() });
        assert!(matches!(stopped, Err(TransportError::WithinRuntime)));

        transport.stop().unwrap();
        assert!(shared.written.lock().unwrap().is_empty());
    }
}
