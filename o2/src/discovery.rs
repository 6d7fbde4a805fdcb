//! The discovery protocol (component C6, §4.6).
//!
//! A process periodically broadcasts a discovery datagram; on first contact
//! with an unknown peer, the side with the lower `peer_id` opens a TCP
//! connection and the two sides exchange a full service list, after which
//! service set changes are replicated incrementally (§4.6). The discovery
//! datagram and every handshake message are ordinary `o2_proto` messages,
//! not an ad hoc format: discovery reuses the same addressed, type-tagged
//! encoding as everything else instead of inventing a second wire format
//! (see DESIGN.md).

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use o2_proto::{Arg, Message, MessageBuilder, MessageExtractor};

use crate::peer::PeerId;

pub const ADDR_DISCOVERY: &str = "/_o2/disc";
pub const ADDR_CONNECT: &str = "/_o2/dy/con";
pub const ADDR_SERVICES: &str = "/_o2/dy/services";
pub const ADDR_ADD_SERVICE: &str = "/_o2/dy/add";
pub const ADDR_REMOVE_SERVICE: &str = "/_o2/dy/remove";

/// The fields carried by a discovery datagram (§6: `{ensemble, peer_id,
/// udp_port, tcp_port, is_master_candidate}`).
#[derive(Debug, Clone)]
pub struct DiscoveryInfo {
    pub ensemble: String,
    pub peer_id: PeerId,
    pub udp_port: u16,
    pub tcp_port: u16,
    pub is_master_candidate: bool,
}

pub fn build_discovery(ensemble: &str, peer_id: &PeerId, udp_port: u16, tcp_port: u16, is_master_candidate: bool) -> Message<'static> {
    let mut b = MessageBuilder::new();
    b.add_string(ensemble.to_owned())
        .add_string(peer_id.as_str().to_owned())
        .add_int32(i32::from(udp_port))
        .add_int32(i32::from(tcp_port))
        .add(Arg::Bool(is_master_candidate));
    b.finish(0.0, ADDR_DISCOVERY)
}

pub fn parse_discovery(msg: &Message<'_>) -> Option<DiscoveryInfo> {
    if msg.address != ADDR_DISCOVERY {
        return None;
    }
    let mut ex = MessageExtractor::start(msg);
    let ensemble = as_string(ex.get_next(b's')?)?;
    let peer_id = as_string(ex.get_next(b's')?)?;
    let udp_port = as_i32(ex.get_next(b'i')?)? as u16;
    let tcp_port = as_i32(ex.get_next(b'i')?)? as u16;
    let is_master_candidate = matches!(ex.get_next(b'B')?, Arg::Bool(true));
    Some(DiscoveryInfo {
        ensemble,
        peer_id: PeerId::from_wire(&peer_id),
        udp_port,
        tcp_port,
        is_master_candidate,
    })
}

/// The handshake's first frame over a freshly opened TCP connection:
/// identifies the sender by peer id so the receiver can match the socket to
/// a peer-table entry (§4.6).
pub fn build_connect(peer_id: &PeerId) -> Message<'static> {
    let mut b = MessageBuilder::new();
    b.add_string(peer_id.as_str().to_owned());
    b.finish(0.0, ADDR_CONNECT)
}

pub fn parse_connect(msg: &Message<'_>) -> Option<PeerId> {
    if msg.address != ADDR_CONNECT {
        return None;
    }
    let mut ex = MessageExtractor::start(msg);
    Some(PeerId::from_wire(&as_string(ex.get_next(b's')?)?))
}

/// Full service-list replication sent right after a handshake completes
/// (§4.6).
pub fn build_services(names: impl Iterator<Item = impl AsRef<str>>) -> Message<'static> {
    let mut b = MessageBuilder::new();
    for name in names {
        b.add_string(name.as_ref().to_owned());
    }
    b.finish(0.0, ADDR_SERVICES)
}

pub fn parse_services(msg: &Message<'_>) -> Option<Vec<String>> {
    if msg.address != ADDR_SERVICES {
        return None;
    }
    Some(
        msg.args
            .iter()
            .filter_map(|a| match a {
                Arg::Str(s) | Arg::Symbol(s) => Some(s.to_string()),
                _ => None,
            })
            .collect(),
    )
}

pub fn build_add_service(name: &str) -> Message<'static> {
    let mut b = MessageBuilder::new();
    b.add_string(name.to_owned());
    b.finish(0.0, ADDR_ADD_SERVICE)
}

pub fn build_remove_service(name: &str) -> Message<'static> {
    let mut b = MessageBuilder::new();
    b.add_string(name.to_owned());
    b.finish(0.0, ADDR_REMOVE_SERVICE)
}

pub fn parse_single_service(msg: &Message<'_>) -> Option<String> {
    match msg.args.first()? {
        Arg::Str(s) | Arg::Symbol(s) => Some(s.to_string()),
        _ => None,
    }
}

fn as_string(arg: Arg<'_>) -> Option<String> {
    match arg {
        Arg::Str(s) | Arg::Symbol(s) => Some(s.into_owned()),
        _ => None,
    }
}

fn as_i32(arg: Arg<'_>) -> Option<i32> {
    match arg {
        Arg::Int32(v) => Some(v),
        _ => None,
    }
}

/// Broadcast timer: starts at `min` and backs off geometrically to `max`
/// (§4.6: "starts short (~100ms) and backs off geometrically to a cap
/// (~4s)"). A small random jitter is applied to each computed period to
/// keep independently-started processes from broadcasting in lockstep.
pub struct BroadcastTimer {
    min: Duration,
    max: Duration,
    factor: f64,
    current: Duration,
    last_sent: Option<Instant>,
}

impl BroadcastTimer {
    pub fn new(min: Duration, max: Duration, factor: f64) -> Self {
        Self {
            min,
            max,
            factor,
            current: min,
            last_sent: None,
        }
    }

    /// Whether a broadcast is due at `now`. Always true on the very first
    /// call.
    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_sent {
            None => true,
            Some(last) => now.duration_since(last) >= self.current,
        }
    }

    /// Records that a broadcast was just sent at `now`, advancing the
    /// geometric backoff.
    pub fn record_sent(&mut self, now: Instant) {
        self.last_sent = Some(now);
        let jitter = 0.9 + rand::random::<f64>() * 0.2;
        let grown = self.current.as_secs_f64() * self.factor;
        self.current = Duration::from_secs_f64((grown * jitter).min(self.max.as_secs_f64()).max(self.min.as_secs_f64() * 0.5));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_datagram_roundtrips() {
        let peer_id = PeerId::generate("ens", "host", 42, 7);
        let msg = build_discovery("ens", &peer_id, 9000, 9001, true);
        let info = parse_discovery(&msg).unwrap();
        assert_eq!(info.ensemble, "ens");
        assert_eq!(info.peer_id, peer_id);
        assert_eq!(info.udp_port, 9000);
        assert_eq!(info.tcp_port, 9001);
        assert!(info.is_master_candidate);
    }

    #[test]
    fn services_list_roundtrips() {
        let msg = build_services(["a", "b", "c"].into_iter());
        let names = parse_services(&msg).unwrap();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn timer_fires_immediately_then_backs_off() {
        let mut timer = BroadcastTimer::new(Duration::from_millis(100), Duration::from_secs(4), 1.5);
        let t0 = Instant::now();
        assert!(timer.is_due(t0));
        timer.record_sent(t0);
        assert!(!timer.is_due(t0));
    }
}
