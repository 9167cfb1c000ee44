//! Typed handles for the transactions and publishes a schema declares.
//!
//! Generated code exposes one constant per endpoint, for example
//! `pub const PING: Transaction<Ping, Pong> = Transaction::new(0, "ping");`.

use std::fmt;
use std::marker::PhantomData;

use packlink_codec::Message;
use packlink_transport::Transport;

use crate::error::Result;
use crate::node::Node;

/// A request/response pair bound to its ID.
pub struct Transaction<Req, Resp> {
    id: u8,
    name: &'static str,
    _types: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp> Transaction<Req, Resp> {
    pub const fn new(id: u8, name: &'static str) -> Self {
        Self {
            id,
            name,
            _types: PhantomData,
        }
    }

    pub const fn id(&self) -> u8 {
        self.id
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<Req: Message, Resp: Message> Transaction<Req, Resp> {
    pub fn transact<T: Transport>(&self, node: &Node<T>, request: &Req) -> Result<Resp> {
        node.transact(self.id, request)
    }
}

impl<Req, Resp> Clone for Transaction<Req, Resp> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Req, Resp> Copy for Transaction<Req, Resp> {}

impl<Req, Resp> fmt::Debug for Transaction<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

/// A device-initiated message bound to its ID.
pub struct Publish<M> {
    id: u8,
    name: &'static str,
    _message: PhantomData<fn() -> M>,
}

impl<M> Publish<M> {
    pub const fn new(id: u8, name: &'static str) -> Self {
        Self {
            id,
            name,
            _message: PhantomData,
        }
    }

    pub const fn id(&self) -> u8 {
        self.id
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<M: Message> Publish<M> {
    /// Deliver every decoded publish to `callback` on the transport's worker.
    pub fn subscribe<T, F>(&self, node: &Node<T>, callback: F)
    where
        T: Transport,
        F: FnMut(M) + Send + 'static,
    {
        node.subscribe(self.id, callback);
    }
}

impl<M> Clone for Publish<M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M> Copy for Publish<M> {}

impl<M> fmt::Debug for Publish<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publish")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}
