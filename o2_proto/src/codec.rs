//! Wire codec: encode/decode plus the streaming builder/extractor (§4.1).
//!
//! Wire layout after the timestamp is OSC-identical: a NUL-terminated
//! address padded to 4 bytes, a typetag string beginning with `,` padded to
//! 4 bytes, then arguments back to back, each individually padded to a
//! 4-byte boundary. All multi-byte numeric fields are big-endian, matching
//! OSC (see DESIGN.md).

use alloc::borrow::Cow;
use alloc::vec::Vec;

use crate::arg::Arg;
use crate::error::MalformedError;
use crate::message::{Message, Timestamp};

/// Rounds `len` up to the next 4-byte boundary, for fields with no
/// terminator (blob payloads).
#[inline(always)]
const fn ceil4(len: usize) -> usize {
    (len + 3) & !3
}

/// Total padded size of a NUL-terminated string of `len` bytes: the
/// terminator itself counts toward the rounding, so a string whose length is
/// already a multiple of 4 still grows to the next boundary.
#[inline(always)]
const fn cstr_padded_len(len: usize) -> usize {
    (len + 4) & !3
}

fn push_padded_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(bytes);
    let pad = ceil4(bytes.len()) - bytes.len();
    buf.resize(buf.len() + pad, 0);
}

fn push_padded_cstr(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    let total = cstr_padded_len(s.len());
    buf.resize(buf.len() + (total - s.len()), 0);
}

fn push_blob(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    push_padded_bytes(buf, bytes);
}

fn push_arg(buf: &mut Vec<u8>, arg: &Arg<'_>) {
    match arg {
        Arg::Int32(v) => buf.extend_from_slice(&v.to_be_bytes()),
        Arg::Int64(v) => buf.extend_from_slice(&v.to_be_bytes()),
        Arg::Float32(v) => buf.extend_from_slice(&v.to_be_bytes()),
        Arg::Double(v) => buf.extend_from_slice(&v.to_be_bytes()),
        Arg::TimeTag(v) => buf.extend_from_slice(&v.to_be_bytes()),
        Arg::Str(s) => push_padded_cstr(buf, s),
        Arg::Symbol(s) => push_padded_cstr(buf, s),
        Arg::Blob(b) => push_blob(buf, b),
        Arg::Char(v) => buf.extend_from_slice(&v.to_be_bytes()),
        Arg::Midi(bytes) => buf.extend_from_slice(bytes),
        Arg::True | Arg::False | Arg::Nil | Arg::Infinitum => {}
        Arg::Bool(v) => buf.extend_from_slice(&(*v as u32).to_be_bytes()),
    }
}

/// A builder for a single outgoing message.
///
/// Only one `MessageBuilder` can be "in progress" at a time per the source's
/// hidden slot (§4.2); Rust expresses that constraint directly through
/// ownership (`&mut self`, not `Clone`) rather than a runtime-checked flag.
#[derive(Debug, Default)]
pub struct MessageBuilder<'a> {
    args: Vec<Arg<'a>>,
}

impl<'a> MessageBuilder<'a> {
    pub fn new() -> Self {
        Self { args: Vec::new() }
    }

    pub fn add(&mut self, arg: Arg<'a>) -> &mut Self {
        self.args.push(arg);
        self
    }

    pub fn add_int32(&mut self, v: i32) -> &mut Self {
        self.add(Arg::Int32(v))
    }

    pub fn add_int64(&mut self, v: i64) -> &mut Self {
        self.add(Arg::Int64(v))
    }

    pub fn add_float32(&mut self, v: f32) -> &mut Self {
        self.add(Arg::Float32(v))
    }

    pub fn add_double(&mut self, v: f64) -> &mut Self {
        self.add(Arg::Double(v))
    }

    pub fn add_string(&mut self, s: impl Into<Cow<'a, str>>) -> &mut Self {
        self.add(Arg::Str(s.into()))
    }

    pub fn add_blob(&mut self, b: impl Into<Cow<'a, [u8]>>) -> &mut Self {
        self.add(Arg::Blob(b.into()))
    }

    /// Consumes the builder, producing a complete message. This is the only
    /// way to obtain a [`Message`] from a builder, matching the source's
    /// `finish(timestamp, address)` call.
    pub fn finish(self, timestamp: Timestamp, address: impl Into<Cow<'a, str>>) -> Message<'a> {
        let typetag = Message::typetag_for(&self.args);
        Message {
            timestamp,
            address: address.into(),
            typetag: Cow::Owned(typetag),
            args: self.args,
        }
    }
}

/// Encodes `msg` into `buf`, appending to whatever `buf` already contains.
///
/// This is the allocation-light path used by the transport layer: writing
/// into a caller-owned, reused buffer rather than returning a fresh one,
/// the way a hot send path writes into a pre-sized scratch buffer instead
/// of allocating per call.
pub fn encode_message(buf: &mut Vec<u8>, msg: &Message<'_>) {
    // §3: `length` counts bytes from the timestamp onward but is carried by
    // the transport framing (a TCP length prefix, or the UDP datagram size
    // itself), not written as a field inside the payload.
    buf.extend_from_slice(&msg.timestamp.to_be_bytes());
    push_padded_cstr(buf, &msg.address);
    push_padded_cstr(buf, &msg.typetag);

    for arg in &msg.args {
        push_arg(buf, arg);
    }
}

/// Encodes a complete message (timestamp + address + typetag + args) as a
/// fresh byte vector.
pub fn encode_message_to_vec(msg: &Message<'_>) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_message(&mut buf, msg);
    buf
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], MalformedError> {
        let end = self.pos.checked_add(n).ok_or(MalformedError::TruncatedArgument)?;
        let slice = self
            .buf
            .get(self.pos..end)
            .ok_or(MalformedError::TruncatedArgument)?;
        self.pos = end;
        Ok(slice)
    }

    fn take_padded_cstr(&mut self) -> Result<&'a str, MalformedError> {
        let nul_rel = self.buf[self.pos..]
            .iter()
            .position(|&b| b == 0)
            .ok_or(MalformedError::BadTypeTag)?;
        let str_len = nul_rel;
        let total = cstr_padded_len(str_len);
        let bytes = self.take(total)?;
        core::str::from_utf8(&bytes[..str_len]).map_err(|_| MalformedError::BadTypeTag)
    }

    fn take_blob(&mut self) -> Result<&'a [u8], MalformedError> {
        let len_bytes = self.take(4)?;
        let len = u32::from_be_bytes(len_bytes.try_into().unwrap()) as usize;
        let total = ceil4(len);
        let bytes = self.take(total)?;
        Ok(&bytes[..len])
    }
}

/// Decodes a complete message from `bytes`.
///
/// `bytes` holds exactly the payload from the timestamp field onward
/// (§3: "`length` counts bytes from the timestamp field inclusive"); any
/// framing/length-prefix handling is the transport layer's job.
pub fn decode_message(bytes: &[u8]) -> Result<Message<'_>, MalformedError> {
    let mut cur = Cursor { buf: bytes, pos: 0 };

    let ts_bytes = cur.take(8)?;
    let timestamp = f64::from_be_bytes(ts_bytes.try_into().unwrap());

    let address = cur.take_padded_cstr()?;
    if !(address.starts_with('/') || address.starts_with('!')) {
        return Err(MalformedError::BadAddress);
    }

    let typetag = cur.take_padded_cstr()?;
    if !typetag.starts_with(',') {
        return Err(MalformedError::BadTypeTag);
    }

    let mut args = Vec::with_capacity(typetag.len() - 1);
    for code in typetag.bytes().skip(1) {
        args.push(decode_arg(&mut cur, code)?);
    }

    Ok(Message {
        timestamp,
        address: Cow::Borrowed(address),
        typetag: Cow::Borrowed(typetag),
        args,
    })
}

fn decode_arg<'a>(cur: &mut Cursor<'a>, code: u8) -> Result<Arg<'a>, MalformedError> {
    Ok(match code {
        b'i' => Arg::Int32(i32::from_be_bytes(cur.take(4)?.try_into().unwrap())),
        b'h' => Arg::Int64(i64::from_be_bytes(cur.take(8)?.try_into().unwrap())),
        b'f' => Arg::Float32(f32::from_be_bytes(cur.take(4)?.try_into().unwrap())),
        b'd' => Arg::Double(f64::from_be_bytes(cur.take(8)?.try_into().unwrap())),
        b't' => Arg::TimeTag(f64::from_be_bytes(cur.take(8)?.try_into().unwrap())),
        b's' => Arg::Str(Cow::Borrowed(cur.take_padded_cstr()?)),
        b'S' => Arg::Symbol(Cow::Borrowed(cur.take_padded_cstr()?)),
        b'b' => Arg::Blob(Cow::Borrowed(cur.take_blob()?)),
        b'c' => Arg::Char(i32::from_be_bytes(cur.take(4)?.try_into().unwrap())),
        b'm' => Arg::Midi(cur.take(4)?.try_into().unwrap()),
        b'T' => Arg::True,
        b'F' => Arg::False,
        b'N' => Arg::Nil,
        b'I' => Arg::Infinitum,
        b'B' => {
            let raw = u32::from_be_bytes(cur.take(4)?.try_into().unwrap());
            Arg::Bool(raw != 0)
        }
        other => return Err(MalformedError::UnknownType(other)),
    })
}

/// A streaming extractor over an already-decoded message's arguments.
///
/// Mirrors the source's `start(msg) -> get_next(expected_code) -> ArgView`
/// API: each call advances an internal cursor only on success, leaving it
/// unchanged on a failed coercion (§4.1).
pub struct MessageExtractor<'m, 'a> {
    args: &'m [Arg<'a>],
    pos: usize,
}

impl<'m, 'a> MessageExtractor<'m, 'a> {
    pub fn start(msg: &'m Message<'a>) -> Self {
        Self {
            args: &msg.args,
            pos: 0,
        }
    }

    /// Returns the next argument coerced to `expected_code`, advancing the
    /// cursor only if coercion succeeds.
    pub fn get_next(&mut self, expected_code: u8) -> Option<Arg<'a>> {
        let arg = self.args.get(self.pos)?;
        let coerced = crate::arg::coerce(arg, expected_code)?;
        self.pos += 1;
        Some(coerced)
    }

    pub fn remaining(&self) -> usize {
        self.args.len() - self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arg::Arg;
    use alloc::vec;

    fn roundtrip(msg: Message<'_>) -> Message<'static> {
        let bytes = encode_message_to_vec(&msg);
        assert_eq!(bytes.len() % 4, 0, "total length must be a multiple of 4");
        decode_message(&bytes).unwrap().into_owned()
    }

    #[test]
    fn roundtrip_scalar_args() {
        let mut b = MessageBuilder::new();
        b.add_int32(7).add_float32(0.5).add_string("hi");
        let msg = b.finish(0.0, "/synth/vol");

        let decoded = roundtrip(msg.clone());
        assert_eq!(decoded.address, msg.address);
        assert_eq!(decoded.typetag, msg.typetag);
        assert_eq!(decoded.args, msg.args.into_iter().map(Arg::into_owned).collect::<Vec<_>>());
    }

    #[test]
    fn padding_every_field_multiple_of_4() {
        for addr in ["/a", "/abc", "/abcd", "/abcde"] {
            let mut b = MessageBuilder::new();
            b.add_string("x");
            let msg = b.finish(1.0, addr);
            let bytes = encode_message_to_vec(&msg);
            assert_eq!(bytes.len() % 4, 0);
        }
    }

    #[test]
    fn blob_roundtrip() {
        let mut b = MessageBuilder::new();
        b.add_blob(vec![1u8, 2, 3]);
        let msg = b.finish(0.0, "/b");
        let decoded = roundtrip(msg);
        assert_eq!(decoded.args[0], Arg::Blob(Cow::Owned(vec![1, 2, 3])));
    }

    #[test]
    fn two_arg_typetag_is_minimally_padded() {
        // ",fi" is 3 bytes; + 1 NUL = 4, already on a boundary, so no
        // padding bytes should follow it.
        let mut b = MessageBuilder::new();
        b.add_float32(1.0).add_int32(2);
        let msg = b.finish(0.0, "/x");
        let bytes = encode_message_to_vec(&msg);

        // timestamp(8) + "/x\0\0"(4) + ",fi\0"(4) + f32(4) + i32(4) = 24
        assert_eq!(bytes.len(), 24);
        roundtrip(msg);
    }

    #[test]
    fn aligned_blob_gets_no_extra_padding() {
        for len in [4usize, 8, 12] {
            let mut b = MessageBuilder::new();
            b.add_blob(vec![7u8; len]);
            let msg = b.finish(0.0, "/b");
            let bytes = encode_message_to_vec(&msg);
            let decoded = roundtrip(msg);
            assert_eq!(decoded.args[0], Arg::Blob(Cow::Owned(vec![7u8; len])));

            // timestamp(8) + "/b\0\0"(4) + ",b\0\0"(4) + len-prefix(4) + data(len)
            assert_eq!(bytes.len(), 8 + 4 + 4 + 4 + len);
        }
    }

    #[test]
    fn malformed_short_buffer_is_rejected() {
        let bytes = [0u8; 4]; // not even a full timestamp
        assert!(decode_message(&bytes).is_err());
    }

    #[test]
    fn malformed_bad_address_is_rejected() {
        let mut b = MessageBuilder::new();
        let msg = b.finish(0.0, "/ok");
        let mut bytes = encode_message_to_vec(&msg);
        bytes[8] = b'x'; // clobber the leading '/'
        assert_eq!(decode_message(&bytes), Err(MalformedError::BadAddress));
    }

    #[test]
    fn coercion_never_returns_wrong_type() {
        let mut b = MessageBuilder::new();
        b.add_double(3.0);
        let msg = b.finish(0.0, "/c");
        let mut ex = MessageExtractor::start(&msg);
        // exact integral double -> i32 succeeds
        assert_eq!(ex.get_next(b'i'), Some(Arg::Int32(3)));
    }

    #[test]
    fn coercion_fails_closed_on_string_to_number() {
        let mut b = MessageBuilder::new();
        b.add_string("nope");
        let msg = b.finish(0.0, "/c");
        let mut ex = MessageExtractor::start(&msg);
        assert_eq!(ex.get_next(b'i'), None);
        // cursor must not have advanced
        assert_eq!(ex.remaining(), 1);
    }

    #[test]
    fn bang_prefix_hint_is_hidden_from_normalized_address() {
        let mut b = MessageBuilder::new();
        let msg = b.finish(0.0, "!synth/vol");
        assert!(msg.is_pattern_free_hint());
        assert_eq!(msg.normalized_address(), "/synth/vol");
    }
}
