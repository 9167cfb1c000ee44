//! Frame transports for packlink nodes.
//!
//! A transport moves encoded frames between a host and a device. Every
//! transport implements [`Transport`]: `send` writes one frame, and a
//! background worker hands each inbound frame body to a registered
//! [`ReadCallback`]. Available shapes:
//!
//! - [`StreamTransport`]: a reader thread over any byte stream ([`TcpConnector`],
//!   [`UnixConnector`], [`SerialConnector`], or an already open link via
//!   [`Preconnected`]).
//! - [`EventLinkTransport`] (feature `link`): an actor owning an async
//!   notification link such as BLE.
//! - [`RequestSocket`]: a strict request/reply [`BlockingTransport`], usable as a
//!   [`Transport`] through [`Pumped`].

pub mod error;
pub mod request;
pub mod stream;
pub mod traits;

#[cfg(feature = "link")]
pub mod link;

#[cfg(unix)]
pub mod serial;

pub use error::{Result, TransportError};
pub use request::{PumpConfig, Pumped, RequestConfig, RequestSocket};
pub use stream::{Connector, Preconnected, StreamConfig, StreamLink, StreamTransport, TcpConnector};
pub use traits::{BlockingTransport, Interrupter, ReadCallback, ReadEvent, Transport};

#[cfg(unix)]
pub use stream::UnixConnector;

#[cfg(unix)]
pub use serial::{SerialConfig, SerialConnector, SerialDevice, SerialLink};

#[cfg(feature = "link")]
pub use link::{EventLinkConfig, EventLinkTransport, NotifyLink};
