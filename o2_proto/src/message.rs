//! The decoded message type and its timestamp sentinel.

use alloc::borrow::Cow;
use alloc::string::String;
use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

use crate::arg::Arg;

/// Seconds, either local or global depending on context. `0.0` means
/// "deliver as soon as possible" (§3).
pub type Timestamp = f64;

/// The "deliver immediately" sentinel timestamp.
pub const IMMEDIATE: Timestamp = 0.0;

/// A fully decoded (or about-to-be-encoded) O2 message.
///
/// Mirrors §3's record: `{timestamp, address, typetag, payload}`. The
/// `next`/`allocated_bytes`/`length` fields of the source record are the
/// free-list plumbing covered by [`crate`] store-side pooling in the `o2`
/// crate, not part of the message's logical content, so they have no
/// counterpart here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message<'a> {
    pub timestamp: Timestamp,
    pub address: Cow<'a, str>,
    /// Always begins with `,`. Kept as a string rather than derived from
    /// `args` on every access since method dispatch matches against it
    /// directly (§4.3 step 4).
    pub typetag: Cow<'a, str>,
    pub args: Vec<Arg<'a>>,
}

impl<'a> Message<'a> {
    /// Builds the typetag string (`,` followed by one character per arg)
    /// from `args`. Used by the builder; decoded messages instead read the
    /// typetag directly off the wire so it is preserved byte-for-byte.
    pub fn typetag_for(args: &[Arg<'_>]) -> String {
        let mut s = String::with_capacity(args.len() + 1);
        s.push(',');
        for a in args {
            s.push(a.type_code() as char);
        }
        s
    }

    /// Returns an owned copy with no data borrowed from a decode buffer.
    pub fn into_owned(self) -> Message<'static> {
        Message {
            timestamp: self.timestamp,
            address: Cow::Owned(self.address.into_owned()),
            typetag: Cow::Owned(self.typetag.into_owned()),
            args: self.args.into_iter().map(Arg::into_owned).collect(),
        }
    }

    /// Whether this message's address begins with `!`, the "no OSC pattern
    /// characters present" hint (§4.1): an optimization signal that lets
    /// directory lookups skip wildcard expansion entirely.
    pub fn is_pattern_free_hint(&self) -> bool {
        self.address.starts_with('!')
    }

    /// The address as it should be reported to callers: the `!` fast-path
    /// marker, if present, is never visible outside the wire/dispatch layer
    /// (§4.1 — "externally the address is still reported starting with
    /// `/`").
    pub fn normalized_address(&self) -> Cow<'_, str> {
        match self.address.strip_prefix('!') {
            Some(rest) => {
                let mut s = String::with_capacity(rest.len() + 1);
                s.push('/');
                s.push_str(rest);
                Cow::Owned(s)
            }
            None => Cow::Borrowed(self.address.as_ref()),
        }
    }
}
