//! The source's C-style status codes (§6), preserved for API parity.
//!
//! The idiomatic surface is [`crate::error::O2Error`]; this module exists so
//! callers that want the literal numeric view (`status(service) -> Status`)
//! can have it, and so the exact numeric ordering the source documents as
//! load-bearing ("clients test category with `status >= LOCAL`") survives
//! the port untouched.

use crate::peer::ServiceKind;

/// Status codes returned by `status(service)` (§6).
///
/// Numeric values are part of the contract, not an implementation detail:
/// `SERVICE_CONFLICT` and `NO_SERVICE` are reserved for ABI parity with the
/// source's header and are never constructed (§9 open question).
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Status {
    /// Unknown service.
    Fail = -1,
    /// Reserved: never returned by this implementation (§9).
    ServiceConflict = -2,
    /// Reserved: never returned by this implementation (§9).
    NoService = -3,
    /// Local service, no clock sync yet.
    LocalNoTime = 0,
    /// Remote service, no clock sync yet.
    RemoteNoTime = 1,
    /// Bridged service, no clock sync yet (extension point, §9).
    BridgeNoTime = 2,
    /// OSC forwarder, no clock sync yet (extension point, §9).
    ToOscNoTime = 3,
    /// Local service, synced.
    Local = 4,
    /// Remote service, synced.
    Remote = 5,
    /// Bridged service, synced (extension point, §9).
    Bridge = 6,
    /// OSC forwarder, synced (extension point, §9).
    ToOsc = 7,
}

impl Status {
    /// Derives the status for a known service entry, given whether this
    /// process currently has a synchronized global time.
    pub fn of(kind: &ServiceKind, synced: bool) -> Self {
        match (kind, synced) {
            (ServiceKind::Local(_), false) => Status::LocalNoTime,
            (ServiceKind::Local(_), true) => Status::Local,
            (ServiceKind::Remote(_), false) => Status::RemoteNoTime,
            (ServiceKind::Remote(_), true) => Status::Remote,
            (ServiceKind::Bridge, false) => Status::BridgeNoTime,
            (ServiceKind::Bridge, true) => Status::Bridge,
            (ServiceKind::ToOsc, false) => Status::ToOscNoTime,
            (ServiceKind::ToOsc, true) => Status::ToOsc,
        }
    }
}

/// The non-status-code integer results the source's API returns (§6).
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum O2Result {
    Success = 0,
    Fail = -1,
    NoMemory = -4,
    Running = -5,
    BadName = -6,
    TcpHup = -7,
}

impl From<&crate::error::O2Error> for O2Result {
    fn from(e: &crate::error::O2Error) -> Self {
        use crate::error::O2Error::*;
        match e {
            AlreadyRunning => O2Result::Running,
            BadName => O2Result::BadName,
            OutOfMemory => O2Result::NoMemory,
            UnknownService(_) => O2Result::Fail,
            NoSync => O2Result::Fail,
            TcpHangUp => O2Result::TcpHup,
            Malformed(_) => O2Result::Fail,
            Io(_) => O2Result::Fail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_ordering_matches_source_table() {
        // §9: "status ordering is load-bearing" — LOCAL/REMOTE/etc. must sort
        // above every *_NOTIME variant so `status >= Status::Local` works.
        assert!(Status::LocalNoTime < Status::Local);
        assert!(Status::RemoteNoTime < Status::Remote);
        assert!(Status::ToOscNoTime < Status::Local);
        assert_eq!(Status::Fail as i32, -1);
        assert_eq!(Status::LocalNoTime as i32, 0);
        assert_eq!(Status::Remote as i32, 5);
        assert_eq!(Status::ToOsc as i32, 7);
    }
}
