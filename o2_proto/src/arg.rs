//! Typed argument values and their OSC-compatible typetag characters.

use alloc::borrow::Cow;
use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

/// A single decoded/encodable O2 argument.
///
/// Variant names follow the typetag character each one encodes as (see the
/// module-level docs in [`crate`]), not a generic numeric-width scheme, since
/// several variants share a representation but not a wire tag (`Double` and
/// `TimeTag` are both 64-bit big-endian floats, `True`/`False`/`Nil`/
/// `Infinitum` all carry no payload). `Serialize`/`Deserialize` are derived
/// for tooling that wants a non-wire representation (log capture, replay
/// fixtures); the OSC-compatible bytes on the wire always go through
/// `codec::encode_message`/`decode_message`, never through `serde`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Arg<'a> {
    /// `i`: 32-bit big-endian signed int.
    Int32(i32),
    /// `h`: 64-bit big-endian signed int.
    Int64(i64),
    /// `f`: 32-bit big-endian IEEE float.
    Float32(f32),
    /// `d`: 64-bit big-endian IEEE double.
    Double(f64),
    /// `t`: 64-bit big-endian IEEE double, used as a timestamp payload.
    TimeTag(f64),
    /// `s`: NUL-terminated, NUL-padded string.
    Str(Cow<'a, str>),
    /// `S`: NUL-terminated, NUL-padded symbol (wire-identical to `Str`).
    Symbol(Cow<'a, str>),
    /// `b`: big-endian `u32` length prefix followed by padded bytes.
    Blob(Cow<'a, [u8]>),
    /// `c`: 32-bit big-endian int carrying a character code point.
    Char(i32),
    /// `m`: 4 raw (unpadded, not byte-swapped) MIDI bytes.
    Midi([u8; 4]),
    /// `T`: boolean true, no payload.
    True,
    /// `F`: boolean false, no payload.
    False,
    /// `N`: nil, no payload.
    Nil,
    /// `I`: "infinitum", no payload.
    Infinitum,
    /// `B`: 32-bit big-endian `0`/`1`.
    Bool(bool),
}

impl<'a> Arg<'a> {
    /// The typetag character this argument is encoded as on the wire.
    pub const fn type_code(&self) -> u8 {
        match self {
            Self::Int32(_) => b'i',
            Self::Int64(_) => b'h',
            Self::Float32(_) => b'f',
            Self::Double(_) => b'd',
            Self::TimeTag(_) => b't',
            Self::Str(_) => b's',
            Self::Symbol(_) => b'S',
            Self::Blob(_) => b'b',
            Self::Char(_) => b'c',
            Self::Midi(_) => b'm',
            Self::True => b'T',
            Self::False => b'F',
            Self::Nil => b'N',
            Self::Infinitum => b'I',
            Self::Bool(_) => b'B',
        }
    }

    /// Returns an owned copy with no borrowed data, suitable for storing past
    /// the lifetime of the decode buffer.
    pub fn into_owned(self) -> Arg<'static> {
        match self {
            Self::Int32(v) => Arg::Int32(v),
            Self::Int64(v) => Arg::Int64(v),
            Self::Float32(v) => Arg::Float32(v),
            Self::Double(v) => Arg::Double(v),
            Self::TimeTag(v) => Arg::TimeTag(v),
            Self::Str(v) => Arg::Str(Cow::Owned(v.into_owned())),
            Self::Symbol(v) => Arg::Symbol(Cow::Owned(v.into_owned())),
            Self::Blob(v) => Arg::Blob(Cow::Owned(v.into_owned())),
            Self::Char(v) => Arg::Char(v),
            Self::Midi(v) => Arg::Midi(v),
            Self::True => Arg::True,
            Self::False => Arg::False,
            Self::Nil => Arg::Nil,
            Self::Infinitum => Arg::Infinitum,
            Self::Bool(v) => Arg::Bool(v),
        }
    }
}

/// Attempts to coerce `arg` into the representation typetag `to` asks for.
///
/// Returns `None` (never a "wrong-typed" value) if the conversion would lose
/// information, per §4.1's coercion rules: numeric widening always succeeds,
/// narrowing only succeeds when the value round-trips exactly, string and
/// symbol are mutually a no-op, and `T`/`F`/`B` interconvert with `i`/`h` via
/// `0`/`1`.
pub fn coerce<'a>(arg: &Arg<'a>, to: u8) -> Option<Arg<'a>> {
    if arg.type_code() == to {
        return Some(arg.clone());
    }

    // numeric value, viewed as an f64, used to probe narrowing conversions.
    let as_f64 = match arg {
        Arg::Int32(v) => Some(*v as f64),
        Arg::Int64(v) => Some(*v as f64),
        Arg::Float32(v) => Some(*v as f64),
        Arg::Double(v) => Some(*v),
        Arg::TimeTag(v) => Some(*v),
        Arg::True | Arg::Bool(true) => Some(1.0),
        Arg::False | Arg::Bool(false) => Some(0.0),
        _ => None,
    };

    // Narrowing to an integer type rounds toward zero and succeeds only if
    // the truncated value is representable in the target width (§4.1).
    // Widening into a floating-point target never fails: f64 represents
    // every i32/i64/f32 value exactly enough for this protocol's purposes.
    match to {
        b'i' => as_f64.and_then(truncate_to_i32).map(Arg::Int32),
        b'h' => as_f64.and_then(truncate_to_i64).map(Arg::Int64),
        b'f' => as_f64.map(|v| Arg::Float32(v as f32)),
        b'd' => as_f64.map(Arg::Double),
        b't' => as_f64.map(Arg::TimeTag),
        b's' => match arg {
            Arg::Str(s) | Arg::Symbol(s) => Some(Arg::Str(s.clone())),
            _ => None,
        },
        b'S' => match arg {
            Arg::Str(s) | Arg::Symbol(s) => Some(Arg::Symbol(s.clone())),
            _ => None,
        },
        b'T' => as_f64.filter(|v| *v == 1.0).map(|_| Arg::True),
        b'F' => as_f64.filter(|v| *v == 0.0).map(|_| Arg::False),
        b'B' => as_f64
            .filter(|v| *v == 0.0 || *v == 1.0)
            .map(|v| Arg::Bool(v == 1.0)),
        _ => None,
    }
}

#[inline]
fn truncate_to_i32(v: f64) -> Option<i32> {
    let truncated = v.trunc();
    (truncated >= i32::MIN as f64 && truncated <= i32::MAX as f64).then_some(truncated as i32)
}

#[inline]
fn truncate_to_i64(v: f64) -> Option<i64> {
    let truncated = v.trunc();
    // i64::MAX isn't exactly representable as f64; compare against the next
    // power of two to stay conservative rather than overflow on cast.
    (truncated >= i64::MIN as f64 && truncated < 9_223_372_036_854_775_808.0_f64)
        .then_some(truncated as i64)
}

/// Materialized argument-vector view handed to a method whose `parse` flag is
/// set (§4.3 step 5). Built into a per-poll scratch arena and cleared after
/// every dispatch.
pub type ArgView<'a> = Vec<Arg<'a>>;
