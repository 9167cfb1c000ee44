use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use packlink_codec::Message;
use packlink_frame::{decode_packet, encode_packet, Packet};
use packlink_transport::{ReadEvent, Transport};
use tracing::{debug, info, trace, warn};

use crate::error::{NodeError, Result};

/// Callback for a publish ID, given the raw message payload.
pub type PublishCallback = Box<dyn FnMut(Bytes) + Send>;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// How long a transaction waits for its response. `None` waits forever.
    /// Default: 5 s.
    pub transact_timeout: Option<Duration>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            transact_timeout: Some(Duration::from_secs(5)),
        }
    }
}

impl NodeConfig {
    pub fn with_transact_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.transact_timeout = timeout;
        self
    }
}

/// Why a waiting transaction was woken without a response.
#[derive(Debug)]
enum Interrupt {
    Disconnected(String),
    Closed,
}

impl From<Interrupt> for NodeError {
    fn from(interrupt: Interrupt) -> Self {
        match interrupt {
            Interrupt::Disconnected(reason) => NodeError::Disconnected(reason),
            Interrupt::Closed => NodeError::Closed,
        }
    }
}

#[derive(Debug, Default)]
struct Correlation {
    /// The one ID a transaction is blocked on.
    awaiting: Option<u8>,
    response: Option<Bytes>,
    interrupt: Option<Interrupt>,
}

#[derive(Default)]
struct Lifecycle {
    open: bool,
    routing_installed: bool,
}

/// State shared with the transport's worker.
#[derive(Default)]
struct Router {
    correlation: Mutex<Correlation>,
    arrived: Condvar,
    publishers: Mutex<HashMap<u8, PublishCallback>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Router {
    fn route(&self, event: ReadEvent) {
        match event {
            ReadEvent::Frame(body) => match decode_packet(&body) {
                Ok(packet) => self.deliver(packet),
                Err(err) => warn!(error = %err, len = body.len(), "dropping undecodable frame"),
            },
            ReadEvent::Closed(reason) => {
                warn!(%reason, "link closed");
                let mut correlation = lock(&self.correlation);
                if correlation.awaiting.is_some() {
                    correlation.interrupt = Some(Interrupt::Disconnected(reason));
                    self.arrived.notify_all();
                }
            }
        }
    }

    fn deliver(&self, packet: Packet) {
        debug!(id = packet.id, len = packet.payload.len(), "rx frame");
        {
            let mut correlation = lock(&self.correlation);
            if correlation.awaiting == Some(packet.id) && correlation.response.is_none() {
                correlation.response = Some(packet.payload);
                self.arrived.notify_one();
                return;
            }
        }

        let mut publishers = lock(&self.publishers);
        match publishers.get_mut(&packet.id) {
            Some(callback) => callback(packet.payload),
            None => warn!(
                id = packet.id,
                len = packet.payload.len(),
                "dropping unroutable frame"
            ),
        }
    }

    fn interrupt(&self, interrupt: Interrupt) {
        let mut correlation = lock(&self.correlation);
        if correlation.awaiting.is_some() {
            correlation.interrupt = Some(interrupt);
            self.arrived.notify_all();
        }
    }
}

/// A host-side endpoint talking to one device over a [`Transport`].
///
/// A transaction sends a request frame and blocks until the frame with the
/// same ID comes back. One transaction is in flight at a time; concurrent
/// callers queue on an internal lock. Frames whose ID has a publish callback
/// go to that callback on the transport's worker thread, in arrival order.
/// Anything else is logged and dropped.
///
/// Callbacks must not call back into the node's transactions or register new
/// callbacks: both would wait on the worker that is running them.
pub struct Node<T: Transport> {
    transport: Mutex<T>,
    router: Arc<Router>,
    lifecycle: Mutex<Lifecycle>,
    turn: Mutex<()>,
    config: NodeConfig,
}

impl<T: Transport> Node<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, NodeConfig::default())
    }

    pub fn with_config(transport: T, config: NodeConfig) -> Self {
        Self {
            transport: Mutex::new(transport),
            router: Arc::new(Router::default()),
            lifecycle: Mutex::new(Lifecycle::default()),
            turn: Mutex::new(()),
            config,
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        lock(&self.lifecycle).open
    }

    /// Install frame routing on the transport and start it. Opening an open
    /// node is a no-op.
    pub fn open(&self) -> Result<()> {
        let mut lifecycle = lock(&self.lifecycle);
        if lifecycle.open {
            return Ok(());
        }
        let mut transport = lock(&self.transport);
        if !lifecycle.routing_installed {
            let router = Arc::clone(&self.router);
            transport.register_read_callback(Box::new(move |event| router.route(event)));
            lifecycle.routing_installed = true;
        }
        transport.start()?;
        lifecycle.open = true;
        info!("node opened");
        Ok(())
    }

    /// Wake any waiting transaction with [`NodeError::Closed`] and stop the
    /// transport. Closing a closed node is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut lifecycle = lock(&self.lifecycle);
        if !lifecycle.open {
            return Ok(());
        }
        lifecycle.open = false;
        self.router.interrupt(Interrupt::Closed);
        lock(&self.transport).stop()?;
        info!("node closed");
        Ok(())
    }

    /// Send `payload` under `id` and return the payload of the first frame
    /// that comes back with the same ID.
    pub fn transact_raw(&self, id: u8, payload: &[u8]) -> Result<Bytes> {
        let _turn = lock(&self.turn);

        {
            let mut correlation = lock(&self.router.correlation);
            correlation.awaiting = Some(id);
            correlation.response = None;
            correlation.interrupt = None;
        }

        let mut frame = BytesMut::new();
        encode_packet(id, payload, &mut frame);
        debug!(id, len = payload.len(), "tx frame");
        trace!(frame = ?frame.as_ref(), "tx bytes");
        if let Err(err) = lock(&self.transport).send(&frame) {
            lock(&self.router.correlation).awaiting = None;
            return Err(err.into());
        }

        self.wait_for(id)
    }

    fn wait_for(&self, id: u8) -> Result<Bytes> {
        let timeout = self.config.transact_timeout;
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut correlation = lock(&self.router.correlation);
        loop {
            if let Some(response) = correlation.response.take() {
                correlation.awaiting = None;
                return Ok(response);
            }
            if let Some(interrupt) = correlation.interrupt.take() {
                correlation.awaiting = None;
                return Err(interrupt.into());
            }
            correlation = match (deadline, timeout) {
                (Some(deadline), Some(timeout)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        correlation.awaiting = None;
                        warn!(id, ?timeout, "transaction timed out");
                        return Err(NodeError::Timeout { id, timeout });
                    }
                    self.router
                        .arrived
                        .wait_timeout(correlation, deadline - now)
                        .unwrap_or_else(|e| e.into_inner())
                        .0
                }
                _ => self
                    .router
                    .arrived
                    .wait(correlation)
                    .unwrap_or_else(|e| e.into_inner()),
            };
        }
    }

    /// Encode `request`, run the transaction and decode the response.
    pub fn transact<Req: Message, Resp: Message>(&self, id: u8, request: &Req) -> Result<Resp> {
        let payload = request.to_bytes()?;
        let response = self.transact_raw(id, &payload)?;
        Ok(Resp::from_bytes(&response)?)
    }

    /// Route frames with `id` to `callback`, replacing any previous callback
    /// for that ID.
    pub fn register_publish_callback<F>(&self, id: u8, callback: F)
    where
        F: FnMut(Bytes) + Send + 'static,
    {
        lock(&self.router.publishers).insert(id, Box::new(callback));
        debug!(id, "publish callback registered");
    }

    /// Decode frames with `id` as `M` and hand them to `callback`. Payloads
    /// that fail to decode are logged and dropped.
    pub fn subscribe<M, F>(&self, id: u8, mut callback: F)
    where
        M: Message,
        F: FnMut(M) + Send + 'static,
    {
        self.register_publish_callback(id, move |payload: Bytes| match M::from_bytes(&payload) {
            Ok(message) => callback(message),
            Err(err) => warn!(id, message = M::NAME, error = %err, "dropping undecodable publish"),
        });
    }
}
