use std::path::PathBuf;

use packlink_codec::CodecError;

/// Errors raised while building a schema. All of them abort the compile; a
/// failed parse never leaves a partial namespace in the context.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The schema file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A line is not a valid declaration.
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    /// A type or constant name resolves to nothing visible.
    #[error("line {line}: unresolved name '{name}'")]
    Unresolved { line: usize, name: String },

    /// An import names a namespace that has not been parsed.
    #[error("line {line}: unknown import '{name}'")]
    UnknownImport { line: usize, name: String },

    /// The namespace was already parsed in this context.
    #[error("duplicate namespace '{0}'")]
    DuplicateNamespace(String),

    /// Two declarations share a name.
    #[error("line {line}: duplicate declaration '{name}'")]
    Duplicate { line: usize, name: String },

    /// A block was opened inside another block.
    #[error("line {line}: nested block declarations are not supported")]
    NestedBlock { line: usize },

    /// A block was still open at end of file.
    #[error("line {line}: block is never closed")]
    UnterminatedBlock { line: usize },

    /// A `}` appeared outside any block.
    #[error("line {line}: unexpected '}}'")]
    UnexpectedClose { line: usize },

    /// Constants must be scalars or strings.
    #[error("line {line}: constant type '{ty}' is not a scalar")]
    InvalidConstantType { line: usize, ty: String },

    /// A list element was itself a list.
    #[error("line {line}: nested lists are not supported")]
    NestedList { line: usize },

    /// Enum values must fit one byte.
    #[error("line {line}: enum value {value} does not fit in one byte")]
    EnumValueRange { line: usize, value: i64 },

    /// A message contains itself without going through a list.
    #[error("message '{name}' contains itself")]
    RecursiveMessage { name: String },

    /// The one-byte ID space is exhausted.
    #[error("'{name}' would need ID {id}, above the one-byte limit")]
    IdOverflow { name: String, id: u16 },

    /// A precompiled schema did not decode.
    #[error("invalid binary schema: {0}")]
    Binary(#[from] CodecError),

    /// A precompiled schema decoded but is not self-consistent.
    #[error("invalid binary schema: {0}")]
    InvalidBinary(String),
}

pub type Result<T> = std::result::Result<T, ParseError>;
