//! Error taxonomy (§7). Synchronous failures are returned as `Result`;
//! asynchronous ones (peer loss, malformed input) are never propagated this
//! way — they surface only through [`crate::status::Status`] and logged
//! events, per §7's propagation policy.

use thiserror::Error;

/// Everything a public `o2` API call can fail with.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum O2Error {
    /// `initialize` called while a process is already running (§6 `RUNNING`).
    #[error("O2 process is already running")]
    AlreadyRunning,

    /// `initialize` called with a null/empty ensemble name (§6 `BAD_NAME`).
    #[error("ensemble name must be non-empty")]
    BadName,

    /// The pluggable allocator could not satisfy a request (§6 `NO_MEMORY`).
    #[error("allocation failed")]
    OutOfMemory,

    /// Destination address names no known service (§6 `FAIL`, routing).
    #[error("unknown service {0:?}")]
    UnknownService(Box<str>),

    /// A future timestamp was given but no clock sync path to the master
    /// exists yet (§4.8, §7 "Timing errors").
    #[error("message has a future timestamp but global time is not yet synchronized")]
    NoSync,

    /// The peer's TCP connection closed (§6 `TCP_HUP`).
    #[error("peer connection was closed")]
    TcpHangUp,

    /// A decoded message failed codec validation (§7 "Malformed input").
    /// Never escapes to a caller; recorded here only so the poll loop's
    /// internal bookkeeping has a single error type to pass around.
    #[error("malformed message: {0}")]
    Malformed(#[from] o2_proto::MalformedError),

    /// Underlying transport I/O failure.
    #[error("I/O error: {0}")]
    Io(alloc::string::String),
}

impl From<std::io::Error> for O2Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

pub type Result<T> = core::result::Result<T, O2Error>;

extern crate alloc;
