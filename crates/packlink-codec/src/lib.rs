//! Wire runtime for packlink messages.
//!
//! The dynamic codec engine and generated Rust code both encode through the
//! primitives in [`wire`], so a schema message has exactly one byte layout:
//!
//! ```text
//! ┌──────────────────────┬──────────────────────────────────────────┐
//! │ bitfield             │ fields in declaration order              │
//! │ ceil(optional / 8) B │ absent optionals contribute no bytes     │
//! └──────────────────────┴──────────────────────────────────────────┘
//! ```

pub mod bitfield;
pub mod error;
pub mod message;
pub mod wire;

pub use bitfield::Bitfield;
pub use error::{CodecError, Result};
pub use message::{Message, WireEnum};
pub use wire::WireReader;

pub use bytes::{Bytes, BytesMut};
