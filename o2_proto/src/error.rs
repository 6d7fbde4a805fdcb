//! Errors produced while decoding a wire-format message.

use core::fmt;

/// Reasons a byte buffer failed to decode as a valid O2 message.
///
/// All variants are recoverable: the caller drops the buffer and moves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedError {
    /// Buffer is shorter than the declared `length` field.
    TooShort,
    /// The address did not begin with `/` or `!`.
    BadAddress,
    /// The typetag did not begin with `,`, or had no NUL terminator within
    /// the declared length.
    BadTypeTag,
    /// An argument's declared size would read past the end of the buffer.
    TruncatedArgument,
    /// A typetag character has no known wire encoding.
    UnknownType(u8),
}

impl fmt::Display for MalformedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort => write!(f, "message shorter than its declared length"),
            Self::BadAddress => write!(f, "address did not start with '/' or '!'"),
            Self::BadTypeTag => write!(f, "typetag missing leading ',' or NUL terminator"),
            Self::TruncatedArgument => write!(f, "argument would read past end of buffer"),
            Self::UnknownType(c) => write!(f, "unknown typetag character {:?}", *c as char),
        }
    }
}

impl core::error::Error for MalformedError {}
