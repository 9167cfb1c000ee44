use std::path::PathBuf;

use packlink_schema::ParseError;

/// Errors raised while generating code.
#[derive(Debug, thiserror::Error)]
pub enum GenError {
    /// An input schema failed to parse.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Reading a template or writing the output failed.
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The requested namespace is not in the context.
    #[error("namespace '{0}' has not been parsed")]
    UnknownNamespace(String),

    /// A constant refers back to itself through its references.
    #[error("constant '{name}' refers to itself")]
    ConstantCycle { name: String },

    /// A constant reference or template placeholder names nothing visible.
    #[error("unknown constant '{name}'")]
    UnknownConstant { name: String },

    /// A field's type is incomplete, as in a list with no element type. The
    /// parser never produces one; decoded binary schemas can.
    #[error("{message}.{field}: {reason}")]
    InvalidField {
        message: String,
        field: String,
        reason: &'static str,
    },

    #[error("incomplete type: missing {0}")]
    IncompleteType(&'static str),

    /// Two endpoints map to the same `Inbound` variant name.
    #[error("endpoints '{first}' and '{second}' both become variant '{variant}'")]
    VariantCollision {
        variant: String,
        first: String,
        second: String,
    },

    /// The template target was chosen without a template file.
    #[error("the template target needs a template file")]
    MissingTemplate,

    #[error(transparent)]
    Fmt(#[from] std::fmt::Error),
}

pub type Result<T> = std::result::Result<T, GenError>;
