//! Schema model, IDL parser and dynamic codec for packlink.
//!
//! A schema is a set of [`Namespace`]s parsed into one [`ParseContext`]. The
//! context is what code generators and the [`Engine`] work from.
//!
//! ```
//! use packlink_schema::{Engine, Name, ParseContext, Parser, Record};
//!
//! let mut ctx = ParseContext::new();
//! Parser::parse_str("message Ping {\n    uint8_t ping;\n}\n", "demo", &mut ctx).unwrap();
//!
//! let ping = Name::new("Ping", "demo");
//! let bytes = Engine::new(&ctx)
//!     .encode(&ping, &Record::new().with("ping", 42u8))
//!     .unwrap();
//! assert_eq!(&bytes[..], &[42]);
//! ```

pub mod binary;
pub mod context;
pub mod engine;
pub mod error;
pub mod model;
pub mod parser;

pub use context::ParseContext;
pub use engine::{Engine, Record, Value};
pub use error::{ParseError, Result};
pub use model::{
    Constant, Enum, EnumValue, Field, FieldType, Message, Name, Namespace, Publish, Transaction,
};
pub use parser::{Parser, BINARY_EXTENSION, SCHEMA_EXTENSION};
