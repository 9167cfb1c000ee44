/// Errors that can occur while encoding or decoding message payloads.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The buffer ended before a field was complete.
    #[error("buffer underrun: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    /// A string, bytes or list is longer than the 2-byte length prefix allows.
    #[error("length {len} exceeds the u16 length prefix")]
    LengthOverflow { len: usize },

    /// A string field did not hold valid UTF-8.
    #[error("invalid UTF-8 in string at byte {offset}")]
    InvalidUtf8 { offset: usize },

    /// An enum byte did not match any declared value.
    #[error("invalid value {value} for enum {name}")]
    InvalidEnum { name: String, value: u8 },

    /// A bool byte was neither 0 nor 1.
    #[error("invalid bool byte {value:#04x}")]
    InvalidBool { value: u8 },

    /// A whole-buffer decode left bytes unconsumed.
    #[error("{count} trailing bytes after message")]
    TrailingBytes { count: usize },

    /// A required field has no value.
    #[error("missing required field '{field}'")]
    MissingField { field: String },

    /// A value does not match the declared field type.
    #[error("field '{field}' expects {expected}")]
    TypeMismatch { field: String, expected: String },

    /// A message or enum reference could not be found in the schema.
    #[error("unresolved type '{name}'")]
    Unresolved { name: String },
}

impl CodecError {
    /// Shorthand for [`CodecError::InvalidEnum`].
    pub fn invalid_enum(name: &str, value: u8) -> Self {
        Self::InvalidEnum {
            name: name.to_string(),
            value,
        }
    }
}

pub type Result<T> = std::result::Result<T, CodecError>;
