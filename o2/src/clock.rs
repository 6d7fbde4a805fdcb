//! Local time, master election bookkeeping, and the disciplined global-time
//! mapping (component C7, §4.7).

use std::time::Instant;

use o2_proto::{Arg, Message, MessageBuilder, MessageExtractor};

use crate::peer::{PeerId, RttSample};

pub const ADDR_CLOCK_GET: &str = "/_o2/cs/get";
pub const ADDR_CLOCK_PUT: &str = "/_o2/cs/put";

/// Builds a `clock-get` probe (§6: `/_o2/cs/get`, typetag `is` — request id,
/// requester peer id).
pub fn build_get(request_id: i32, requester: &PeerId) -> Message<'static> {
    let mut b = MessageBuilder::new();
    b.add_int32(request_id).add_string(requester.as_str().to_owned());
    b.finish(0.0, ADDR_CLOCK_GET)
}

pub fn parse_get(msg: &Message<'_>) -> Option<(i32, PeerId)> {
    if msg.address != ADDR_CLOCK_GET {
        return None;
    }
    let mut ex = MessageExtractor::start(msg);
    let id = match ex.get_next(b'i')? {
        Arg::Int32(v) => v,
        _ => return None,
    };
    let requester = match ex.get_next(b's')? {
        Arg::Str(s) | Arg::Symbol(s) => s.into_owned(),
        _ => return None,
    };
    Some((id, PeerId::from_wire(&requester)))
}

/// Builds a `clock-put` reply (§6: `/_o2/cs/put`) carrying the request id
/// and the master's current global time.
pub fn build_put(request_id: i32, master_time: f64) -> Message<'static> {
    let mut b = MessageBuilder::new();
    b.add_int32(request_id).add_double(master_time);
    b.finish(0.0, ADDR_CLOCK_PUT)
}

pub fn parse_put(msg: &Message<'_>) -> Option<(i32, f64)> {
    if msg.address != ADDR_CLOCK_PUT {
        return None;
    }
    let mut ex = MessageExtractor::start(msg);
    let id = match ex.get_next(b'i')? {
        Arg::Int32(v) => v,
        _ => return None,
    };
    let master_time = match ex.get_next(b'd')? {
        Arg::Double(v) => v,
        _ => return None,
    };
    Some((id, master_time))
}

/// A process's source of monotonic local time (§4.7).
///
/// Installing a non-default clock via [`Clock::set_clock`] is what marks a
/// process as a master candidate — "if the user installs a clock via
/// `set_clock`, that process becomes a master candidate" (§4.7).
pub trait LocalClock: 'static {
    fn now(&self) -> f64;
}

/// The default clock: wall time relative to process start, via
/// [`std::time::Instant`]. Never makes a process a master candidate on its
/// own.
pub struct SystemClock {
    start: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self { start: Instant::now() }
    }
}

impl LocalClock for SystemClock {
    fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

/// The clock subsystem (§4.7): local time source, election participation,
/// and the slewed local-to-global offset.
pub struct Clock {
    local: Box<dyn LocalClock>,
    pub is_master_candidate: bool,
    pub is_master: bool,
    pub master_peer_id: Option<PeerId>,
    /// Whether at least one successful sync sample has ever been taken
    /// (§3 invariant 3, §4.7 `get_time`).
    pub synced: bool,
    /// The value actually added to local time (§4.7 "skew control").
    pub skew: f64,
    /// The raw, unslewed target `skew` is chasing.
    target_offset: f64,
    next_request_id: i32,
    /// `(request_id, t0)` for an outstanding `clock-get` probe, if any.
    pending_request: Option<(i32, f64)>,
}

impl Default for Clock {
    fn default() -> Self {
        Self {
            local: Box::new(SystemClock::default()),
            is_master_candidate: false,
            is_master: false,
            master_peer_id: None,
            synced: false,
            skew: 0.0,
            target_offset: 0.0,
            next_request_id: 0,
            pending_request: None,
        }
    }
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a user-provided clock source, marking this process a master
    /// candidate (§4.7).
    pub fn set_clock(&mut self, clock: Box<dyn LocalClock>) {
        self.local = clock;
        self.is_master_candidate = true;
    }

    pub fn local_time(&self) -> f64 {
        self.local.now()
    }

    /// `get_time()` (§4.7): `-1` until the first successful sync, or
    /// immediately `local_time()` if this process is the master.
    pub fn global_time(&self) -> f64 {
        if self.is_master {
            self.local_time()
        } else if self.synced {
            self.local_time() + self.skew
        } else {
            -1.0
        }
    }

    pub fn has_global_time(&self) -> bool {
        self.is_master || self.synced
    }

    /// Starts a new `clock-get` probe, returning `(request_id, t0)` to embed
    /// in the outgoing `/_o2/cs/get` message (§6).
    pub fn begin_probe(&mut self) -> (i32, f64) {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        let t0 = self.local_time();
        self.pending_request = Some((id, t0));
        (id, t0)
    }

    /// Resolves a `/_o2/cs/put` reply into an [`RttSample`], per §4.7's
    /// `t1 - t0` / midpoint-offset formula. Returns `None` for a stale or
    /// unexpected reply (request id mismatch, or no outstanding probe).
    pub fn complete_probe(&mut self, reply_request_id: i32, master_time: f64) -> Option<RttSample> {
        let (id, t0) = self.pending_request.take()?;
        if id != reply_request_id {
            return None;
        }
        let t1 = self.local_time();
        let rtt = t1 - t0;
        let master_estimate = master_time + rtt / 2.0;
        let offset = master_estimate - (t0 + rtt / 2.0);
        Some(RttSample { rtt, offset })
    }

    /// Adopts a newly-computed target offset (the minimum-RTT sample's
    /// offset, per §4.7) without applying it instantaneously.
    pub fn set_target_offset(&mut self, offset: f64) {
        self.target_offset = offset;
        self.synced = true;
    }

    /// Slews `skew` toward `target_offset` at no more than
    /// `max_slew_rate` of real elapsed time (§4.7: "≤10% of real time").
    pub fn advance_skew(&mut self, elapsed_real_secs: f64, max_slew_rate: f64) {
        let diff = self.target_offset - self.skew;
        let max_step = max_slew_rate * elapsed_real_secs.max(0.0);
        if diff.abs() <= max_step || max_step <= 0.0 {
            self.skew = self.target_offset;
        } else {
            self.skew += max_step.copysign(diff);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_time_is_negative_one_until_first_sync() {
        let clock = Clock::new();
        assert_eq!(clock.global_time(), -1.0);
    }

    #[test]
    fn master_always_reports_its_own_local_time() {
        let mut clock = Clock::new();
        clock.is_master = true;
        assert!(clock.global_time() >= 0.0);
    }

    #[test]
    fn probe_roundtrip_computes_offset_from_midpoint() {
        let mut clock = Clock::new();
        let (id, _t0) = clock.begin_probe();
        let sample = clock.complete_probe(id, 100.0).unwrap();
        assert!(sample.rtt >= 0.0);
    }

    #[test]
    fn stale_reply_id_is_rejected() {
        let mut clock = Clock::new();
        let (id, _) = clock.begin_probe();
        assert!(clock.complete_probe(id + 1, 100.0).is_none());
    }

    #[test]
    fn skew_slews_at_bounded_rate_rather_than_jumping() {
        let mut clock = Clock::new();
        clock.set_target_offset(10.0);
        clock.advance_skew(1.0, 0.1); // max 0.1 units/sec * 1s = 0.1
        assert!((clock.skew - 0.1).abs() < 1e-9);
        // after enough real time, converges exactly
        clock.advance_skew(1000.0, 0.1);
        assert_eq!(clock.skew, 10.0);
    }
}
