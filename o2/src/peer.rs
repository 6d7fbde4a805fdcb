//! Peer identity and the peer table (component C4, §3/§4.4).

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use crate::directory::trie::Node;

/// A process's identity within an ensemble.
///
/// Derived deterministically from `(ensemble, host, pid, start-time)` (§3,
/// §4.7 election) and transmitted on the wire as a string (§6 discovery
/// datagram typetag `s`), so `PeerId` is itself a thin wrapper around that
/// string: comparing `PeerId`s with `Ord` reproduces the source's "string
/// ordering" tie-break (§4.6, §4.7) exactly, since no two processes can
/// independently produce the same `(host, pid, start-time)` triple.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(Box<str>);

impl PeerId {
    /// Builds a `PeerId` from its constituent fields (§3 `peer_id`).
    pub fn generate(ensemble: &str, host: &str, pid: u32, start_time_nanos: u128) -> Self {
        Self(format!("{ensemble}:{host}:{pid:010}:{start_time_nanos:032}").into_boxed_str())
    }

    /// Reconstructs a `PeerId` from its wire string form (discovery/clock
    /// messages carry it as an `s` argument, §6).
    pub fn from_wire(s: &str) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single round-trip sample taken while probing a clock source (§4.7).
#[derive(Debug, Clone, Copy)]
pub struct RttSample {
    pub rtt: f64,
    /// `master_estimate - (t0 + rtt/2)`, the offset implied by this sample.
    pub offset: f64,
}

/// This process's synchronization state against one remote clock source
/// (§3 `clock_state`).
///
/// Only ever populated against the current master; other peers simply never
/// accumulate samples. `skew` is the bounded-rate-slewed value actually
/// added to local time (§4.7 "skew control"); `offset` is the latest raw
/// target the slew is chasing.
#[derive(Debug, Clone)]
pub struct ClockState {
    pub has_sync: bool,
    pub offset: f64,
    pub skew: f64,
    samples: [Option<RttSample>; 5],
    next_slot: usize,
    pub samples_taken: u32,
}

impl Default for ClockState {
    fn default() -> Self {
        Self {
            has_sync: false,
            offset: 0.0,
            skew: 0.0,
            samples: [None; 5],
            next_slot: 0,
            samples_taken: 0,
        }
    }
}

impl ClockState {
    /// Records a new round-trip sample into the bounded ring of 5 (§3, §4.7).
    pub fn record(&mut self, sample: RttSample) {
        self.samples[self.next_slot] = Some(sample);
        self.next_slot = (self.next_slot + 1) % self.samples.len();
        self.samples_taken = self.samples_taken.saturating_add(1);
        self.has_sync = true;
        self.offset = self.min_rtt_offset().unwrap_or(sample.offset);
    }

    /// The offset corresponding to the sample with the minimum RTT in the
    /// ring (§4.7: "the offset corresponding to the minimum RTT sample is
    /// adopted as the authoritative offset").
    pub fn min_rtt_offset(&self) -> Option<f64> {
        self.samples
            .iter()
            .flatten()
            .min_by(|a, b| a.rtt.partial_cmp(&b.rtt).unwrap())
            .map(|s| s.offset)
    }

    /// Mean and minimum RTT over the ring; `None` if unsynced (§4.7
    /// `roundtrip`).
    pub fn roundtrip(&self) -> Option<(f64, f64)> {
        if !self.has_sync {
            return None;
        }
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut n = 0u32;
        for s in self.samples.iter().flatten() {
            sum += s.rtt;
            min = min.min(s.rtt);
            n += 1;
        }
        (n > 0).then_some((sum / f64::from(n), min))
    }
}

/// What a [`crate::directory::Directory`] entry actually is (§3 `Service`).
#[derive(Debug)]
pub enum ServiceKind {
    /// Owned by this process: a method trie rooted at the service name.
    Local(Node),
    /// Owned by a remote peer: forward unchanged (§4.3 step 2).
    Remote(PeerId),
    /// Extension point reserved per §9's open question; never constructed by
    /// this implementation.
    Bridge,
    /// Extension point reserved per §9's open question; never constructed by
    /// this implementation.
    ToOsc,
}

/// A known remote process (§3 `Peer`).
#[derive(Debug)]
pub struct Peer {
    pub id: PeerId,
    pub udp_addr: SocketAddr,
    pub tcp_port: u16,
    pub is_master_candidate: bool,
    pub services: std::collections::HashSet<Box<str>>,
    pub clock: ClockState,
    pub last_heard: Instant,
    pub missed_heartbeats: u32,
    /// Lower-peer_id-initiates connection rule (§4.6): whether we opened the
    /// TCP connection to this peer, or accepted one from it.
    pub we_initiated: bool,
}

impl Peer {
    pub fn new(id: PeerId, udp_addr: SocketAddr, tcp_port: u16, is_master_candidate: bool, we_initiated: bool) -> Self {
        Self {
            id,
            udp_addr,
            tcp_port,
            is_master_candidate,
            services: std::collections::HashSet::new(),
            clock: ClockState::default(),
            last_heard: Instant::now(),
            missed_heartbeats: 0,
            we_initiated,
        }
    }
}

/// The set of all known remote processes (§4.4).
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: HashMap<PeerId, Peer>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, peer: Peer) {
        self.peers.insert(peer.id.clone(), peer);
    }

    pub fn remove(&mut self, id: &PeerId) -> Option<Peer> {
        self.peers.remove(id)
    }

    pub fn get(&self, id: &PeerId) -> Option<&Peer> {
        self.peers.get(id)
    }

    pub fn get_mut(&mut self, id: &PeerId) -> Option<&mut Peer> {
        self.peers.get_mut(id)
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Peer> {
        self.peers.values_mut()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// The lowest `PeerId` among all visible master candidates, including
    /// `self_id` if `self_is_candidate` (§4.7 election).
    pub fn elect_master(&self, self_id: &PeerId, self_is_candidate: bool) -> Option<PeerId> {
        let mut best: Option<&PeerId> = self_is_candidate.then_some(self_id);
        for peer in self.peers.values() {
            if peer.is_master_candidate {
                best = match best {
                    Some(cur) if cur <= &peer.id => Some(cur),
                    _ => Some(&peer.id),
                };
            }
        }
        best.cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_ordering_is_deterministic() {
        let a = PeerId::generate("ens", "host", 100, 5);
        let b = PeerId::generate("ens", "host", 100, 6);
        assert!(a < b);
    }

    #[test]
    fn clock_state_adopts_min_rtt_offset() {
        let mut cs = ClockState::default();
        cs.record(RttSample { rtt: 0.010, offset: 1.0 });
        cs.record(RttSample { rtt: 0.002, offset: 2.0 });
        cs.record(RttSample { rtt: 0.050, offset: 3.0 });
        assert_eq!(cs.offset, 2.0);
        assert!(cs.has_sync);
    }

    #[test]
    fn elect_master_picks_lowest_id() {
        let mut table = PeerTable::new();
        let self_id = PeerId::generate("ens", "h", 1, 100);
        let lower = PeerId::generate("ens", "h", 1, 10);
        let higher = PeerId::generate("ens", "h", 1, 900);
        table.insert(Peer::new(lower.clone(), "127.0.0.1:9000".parse().unwrap(), 9000, true, false));
        table.insert(Peer::new(higher, "127.0.0.1:9001".parse().unwrap(), 9001, true, false));
        assert_eq!(table.elect_master(&self_id, true), Some(lower));
    }
}
