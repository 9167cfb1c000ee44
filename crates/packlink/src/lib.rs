//! Schema-driven binary messaging between hosts and embedded devices.
//!
//! A packlink schema declares messages, enums, constants, transactions and
//! publishes. The generators turn it into host-side Rust and device-side C++
//! that agree on every byte, and the node layer runs transactions over any
//! transport that carries byte-stuffed frames.
//!
//! # Crate Structure
//!
//! - [`frame`]: COBS framing and packets (`id ++ payload`)
//! - [`codec`]: wire primitives and the `Message` trait generated code implements
//! - [`schema`]: IDL parser, schema model and dynamic codec engine
//! - [`transport`]: stream, serial, event-link and request/reply transports
//! - [`node`]: transactions and publishes over a transport (behind `node` feature)
//! - [`gen`]: Rust, C++ and template generators (behind `gen` feature)
//!
//! Generated Rust refers to this crate as `::packlink` unless told otherwise.

/// Re-export frame types.
pub mod frame {
    pub use packlink_frame::*;
}

/// Re-export codec types.
pub mod codec {
    pub use packlink_codec::*;
}

/// Re-export schema types.
pub mod schema {
    pub use packlink_schema::*;
}

/// Re-export transport types.
pub mod transport {
    pub use packlink_transport::*;
}

/// Re-export node types (requires `node` feature).
#[cfg(feature = "node")]
pub mod node {
    pub use packlink_node::*;
}

/// Re-export generator types (requires `gen` feature).
#[cfg(feature = "gen")]
pub mod gen {
    pub use packlink_gen::*;
}

pub use bytes;
