use std::fmt;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tracing::trace;

use crate::error::Result;

/// What a transport's reader hands to its callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadEvent {
    /// One stuffed frame body, delimiter removed.
    Frame(Bytes),
    /// The link dropped. Delivered once per start.
    Closed(String),
}

/// Receives every [`ReadEvent`] on the transport's worker thread.
pub type ReadCallback = Box<dyn FnMut(ReadEvent) + Send>;

/// A full-duplex frame link with a background reader.
///
/// `send` takes complete wire bytes, delimiter included, as produced by
/// [`packlink_frame::encode_packet`]. Inbound frames are pushed to the
/// registered callback from the transport's own worker.
pub trait Transport: Send {
    /// Open the link and start the reader. Calling it again while running is a
    /// no-op.
    fn start(&mut self) -> Result<()>;

    /// Stop the reader and close the link. Calling it again is a no-op.
    fn stop(&mut self) -> Result<()>;

    /// Write one encoded frame.
    fn send(&mut self, frame: &[u8]) -> Result<()>;

    /// Install the callback for inbound frames, replacing any previous one.
    fn register_read_callback(&mut self, callback: ReadCallback);
}

/// A link that answers each request with exactly one reply.
pub trait BlockingTransport: Send {
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;

    /// Write one encoded request frame.
    fn send(&mut self, frame: &[u8]) -> Result<()>;

    /// Block until the reply to the outstanding request arrives and return its
    /// stuffed body.
    fn receive(&mut self) -> Result<Bytes>;

    /// A handle another thread can use to abort a blocked `receive`, if the
    /// link supports it.
    fn interrupter(&self) -> Option<Interrupter> {
        None
    }
}

/// Aborts a blocking call on a transport owned by another thread. The
/// aborted call fails; the transport must be stopped afterwards.
#[derive(Clone)]
pub struct Interrupter(Arc<dyn Fn() + Send + Sync>);

impl Interrupter {
    pub fn new(abort: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(abort))
    }

    pub fn interrupt(&self) {
        (self.0)()
    }
}

impl fmt::Debug for Interrupter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Interrupter")
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn start(&mut self) -> Result<()> {
        (**self).start()
    }

    fn stop(&mut self) -> Result<()> {
        (**self).stop()
    }

    fn send(&mut self, frame: &[u8]) -> Result<()> {
        (**self).send(frame)
    }

    fn register_read_callback(&mut self, callback: ReadCallback) {
        (**self).register_read_callback(callback)
    }
}

/// Callback slot shared between a transport handle and its worker.
#[derive(Clone, Default)]
pub(crate) struct CallbackSlot(Arc<Mutex<Option<ReadCallback>>>);

impl CallbackSlot {
    pub(crate) fn set(&self, callback: ReadCallback) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = Some(callback);
    }

    /// Hand `event` to the installed callback. Events that arrive before a
    /// callback is registered are dropped.
    pub(crate) fn dispatch(&self, event: ReadEvent) {
        let mut slot = self.0.lock().unwrap_or_else(|e| e.into_inner());
        match slot.as_mut() {
            Some(callback) => callback(event),
            None => trace!(?event, "no read callback registered"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn dispatch_reaches_latest_callback() {
        let slot = CallbackSlot::default();
        slot.dispatch(ReadEvent::Closed("early".into()));

        let (tx, rx) = mpsc::channel();
        let first = tx.clone();
        slot.set(Box::new(move |event| first.send(("first", event)).unwrap()));
        slot.dispatch(ReadEvent::Frame(Bytes::from_static(b"\x01\x01")));
        slot.set(Box::new(move |event| tx.send(("second", event)).unwrap()));
        slot.dispatch(ReadEvent::Closed("bye".into()));

        let seen: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            seen,
            vec![
                ("first", ReadEvent::Frame(Bytes::from_static(b"\x01\x01"))),
                ("second", ReadEvent::Closed("bye".into())),
            ]
        );
    }
}
