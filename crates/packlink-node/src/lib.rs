//! Transaction and publish routing for packlink devices.
//!
//! A [`Node`] sits on top of any [`Transport`]. Transactions are strict
//! request/response exchanges correlated by the one-byte ID at the front of
//! each frame; publishes are unsolicited frames routed to callbacks by ID.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use packlink_node::{Node, NodeConfig};
//! use packlink_transport::{StreamTransport, TcpConnector};
//!
//! # fn main() -> packlink_node::Result<()> {
//! let transport = StreamTransport::new(TcpConnector::new("127.0.0.1:5555"));
//! let config = NodeConfig::default().with_transact_timeout(Some(Duration::from_secs(1)));
//! let node = Node::with_config(transport, config);
//! node.open()?;
//! node.register_publish_callback(3, |payload| println!("publish: {payload:?}"));
//! let response = node.transact_raw(0, &[0x01])?;
//! println!("response: {response:?}");
//! node.close()?;
//! # Ok(())
//! # }
//! ```

pub mod endpoint;
pub mod error;
pub mod node;

pub use endpoint::{Publish, Transaction};
pub use error::{NodeError, Result};
pub use node::{Node, NodeConfig, PublishCallback};

pub use packlink_transport::{BlockingTransport, ReadCallback, ReadEvent, Transport, TransportError};
