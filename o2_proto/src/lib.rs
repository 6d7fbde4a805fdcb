#![no_std]
//! The O2 message model and wire codec (component C1 of the core design).
//!
//! This crate defines the hierarchically-addressed, type-tagged message
//! format exchanged between O2 processes, and the codec that turns it into
//! OSC-compatible bytes on the wire. It owns no sockets, no service
//! directory, and no scheduling — those live in the `o2` crate, which
//! depends on this one for the wire format.
//!
//! ## Wire format
//!
//! After the 8-byte big-endian timestamp: a NUL-terminated address padded to
//! 4 bytes, a typetag string beginning with `,` padded to 4 bytes, then
//! arguments concatenated back to back, each individually padded to a
//! 4-byte boundary. See [`codec`] for the exact byte layout of every
//! argument type.

extern crate alloc;

pub mod arg;
pub mod codec;
pub mod error;
pub mod message;

pub use arg::{coerce, Arg, ArgView};
pub use codec::{decode_message, encode_message, encode_message_to_vec, MessageBuilder, MessageExtractor};
pub use error::MalformedError;
pub use message::{Message, Timestamp, IMMEDIATE};
