//! The process handle (components C8-C9, §4.9): owns every collaborator
//! and drives the single-threaded poll loop.

use std::cell::Cell;
use std::collections::VecDeque;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use o2_proto::{Arg, Message, MessageBuilder};

use crate::clock::{self, Clock, LocalClock};
use crate::config::Config;
use crate::directory::trie::Method;
use crate::directory::{Directory, Route};
use crate::discovery::{self, BroadcastTimer};
use crate::error::{O2Error, Result};
use crate::outbox::Outbox;
use crate::peer::{Peer, PeerId, PeerTable, ServiceKind};
use crate::status::Status;
use crate::store::Pool;
use crate::scheduler::Wheel;
use crate::transport::{SendMode, TcpEvent, Transport};

/// Identifies a process uniquely enough within an ensemble (§3 `peer_id`)
/// without requiring a real DNS-resolvable hostname: a `HOSTNAME`/
/// `COMPUTERNAME` environment variable if present, otherwise the local
/// address a UDP "connect" (no packet sent — just a routing-table lookup)
/// resolves to, otherwise `"localhost"`. Combined with the pid and process
/// start time, this is still enough to keep two processes on the same host
/// from colliding (§4.6, §4.7).
fn local_host_identifier() -> String {
    if let Ok(h) = std::env::var("HOSTNAME") {
        if !h.is_empty() {
            return h;
        }
    }
    if let Ok(h) = std::env::var("COMPUTERNAME") {
        if !h.is_empty() {
            return h;
        }
    }
    let resolved = UdpSocket::bind((std::net::Ipv4Addr::UNSPECIFIED, 0))
        .and_then(|s| {
            s.connect((std::net::Ipv4Addr::new(8, 8, 8, 8), 80))?;
            s.local_addr()
        })
        .map(|a| a.ip().to_string());
    resolved.unwrap_or_else(|_| "localhost".to_owned())
}

fn monotonic_start_nanos() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0)
}

/// A running O2 process (§3 `O2_context`, §4.9).
///
/// Built by [`O2::initialize`], driven by repeated [`O2::poll`] calls (or
/// [`O2::run`] for the common fixed-rate loop), torn down by [`O2::finish`].
pub struct O2 {
    config: Config,
    self_id: PeerId,
    directory: Directory,
    peers: PeerTable,
    transport: Transport,
    clock: Clock,
    discovery_timer: BroadcastTimer,
    ltsched: Wheel,
    gtsched: Wheel,
    pending_dispatch: VecDeque<Message<'static>>,
    scratch_args: Vec<Arg<'static>>,
    buffer_pool: Pool,
    last_probe_sent: Option<Instant>,
    last_skew_tick: Instant,
    running: bool,
    /// Reentrancy guard for [`O2::poll`] (§3 invariant 6: the poll loop runs
    /// on exactly one thread, and a handler that re-entered it would corrupt
    /// the pending-dispatch queue's drain order).
    polling: Cell<bool>,
}

impl O2 {
    /// Binds every socket and joins `config.ensemble_name` (§4.9
    /// `o2_initialize`). Fails with [`O2Error::BadName`] on an empty
    /// ensemble name, or an I/O error if no free port can be bound.
    pub fn initialize(config: Config) -> Result<Self> {
        if config.ensemble_name.is_empty() {
            return Err(O2Error::BadName);
        }
        let transport = Transport::bind(config.discovery_port, config.port_search_range.clone())?;
        let self_id = PeerId::generate(
            &config.ensemble_name,
            &local_host_identifier(),
            std::process::id(),
            monotonic_start_nanos(),
        );
        let discovery_timer = BroadcastTimer::new(config.discovery_period_min, config.discovery_period_max, config.discovery_backoff_factor);
        let ltsched = Wheel::new(config.scheduler_granularity);
        let gtsched = Wheel::new(config.scheduler_granularity);
        Ok(Self {
            self_id,
            directory: Directory::new(),
            peers: PeerTable::new(),
            transport,
            clock: Clock::new(),
            discovery_timer,
            ltsched,
            gtsched,
            pending_dispatch: VecDeque::new(),
            scratch_args: Vec::new(),
            buffer_pool: Pool::default(),
            last_probe_sent: None,
            last_skew_tick: Instant::now(),
            running: true,
            polling: Cell::new(false),
            config,
        })
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.self_id
    }

    /// Installs a user clock, making this process a master candidate (§4.7).
    pub fn set_clock(&mut self, clock: Box<dyn LocalClock>) {
        self.clock.set_clock(clock);
    }

    pub fn global_time(&self) -> f64 {
        self.clock.global_time()
    }

    pub fn is_master(&self) -> bool {
        self.clock.is_master
    }

    /// Adds a service hosted by this process (§4.3). Idempotent: adding a
    /// name this process already owns is a silent no-op, since neither
    /// `SERVICE_CONFLICT` nor `NO_SERVICE` is ever constructed by this
    /// implementation (§9, see DESIGN.md).
    pub fn add_service(&mut self, name: &str) {
        if self.directory.contains(name) {
            return;
        }
        self.directory.add_local_service(name);
        self.broadcast_service_change(name, true);
    }

    pub fn remove_service(&mut self, name: &str) {
        if self.directory.remove_service(name).is_some() {
            self.broadcast_service_change(name, false);
        }
    }

    fn broadcast_service_change(&mut self, name: &str, added: bool) {
        let msg = if added {
            discovery::build_add_service(name)
        } else {
            discovery::build_remove_service(name)
        };
        let peer_ids: Vec<PeerId> = self.peers.iter().map(|p| p.id.clone()).collect();
        for id in peer_ids {
            self.transport.send_command(&id, &msg);
        }
    }

    /// Installs a method handler at `address` on a service this process owns
    /// (§4.3). Returns `false` if `address`'s leading segment is not a local
    /// service.
    pub fn add_method(
        &mut self,
        address: &str,
        typespec: Option<&str>,
        coerce: bool,
        parse: bool,
        handler: impl FnMut(&Message<'_>, Option<&[Arg<'_>]>, &mut Outbox<'_>) + 'static,
    ) -> bool {
        self.directory.add_method(
            address,
            Method {
                typespec: typespec.map(Into::into),
                coerce,
                parse,
                handler: Box::new(handler),
            },
        )
    }

    /// `status(service)` (§6): `Status::Fail` for an unknown service, else
    /// derived from whether it is local/remote and whether this process has
    /// a synchronized global time.
    pub fn status(&self, service: &str) -> Status {
        match self.directory.get(service) {
            None => Status::Fail,
            Some(entry) => Status::of(&entry.kind, self.clock.has_global_time()),
        }
    }

    /// Sends or schedules `msg` (§4.9 `o2_send`/`o2_schedule`). A message
    /// timestamped `IMMEDIATE` (or already due) is dispatched/forwarded at
    /// once; a future timestamp is handed to `gtsched`, which requires a
    /// synchronized global time (§4.8: "gtsched refuses to accept messages
    /// while `global_time()` is undefined").
    pub fn send(&mut self, msg: Message<'static>, mode: SendMode) -> Result<()> {
        if msg.timestamp <= o2_proto::IMMEDIATE {
            self.deliver_now(msg, mode)
        } else {
            if !self.clock.has_global_time() {
                return Err(O2Error::NoSync);
            }
            self.gtsched.schedule(msg);
            Ok(())
        }
    }

    /// Schedules `msg` against local time regardless of sync state, for
    /// purely local, non-network-coordinated timers (§4.8: `ltsched` is
    /// swept unconditionally, unlike `gtsched`).
    pub fn schedule_local(&mut self, msg: Message<'static>) {
        self.ltsched.schedule(msg);
    }

    fn deliver_now(&mut self, msg: Message<'static>, mode: SendMode) -> Result<()> {
        let route = {
            let mut outbox = Outbox::new(&mut self.pending_dispatch);
            self.directory.dispatch(&msg, &mut self.scratch_args, &mut outbox)
        };
        match route {
            Route::Dispatched(_) => Ok(()),
            Route::Forward(peer_id) => self.forward_to_peer(&peer_id, &msg, mode),
            Route::UnknownService => Err(O2Error::UnknownService(first_segment(&msg.normalized_address()).into())),
        }
    }

    fn deliver_due(&mut self, msg: Message<'static>) {
        if let Err(e) = self.deliver_now(msg, SendMode::BestEffort) {
            log::debug!("dropping due message to {:?}: {e}", msg_address_hint(&msg));
        }
    }

    fn forward_to_peer(&mut self, peer_id: &PeerId, msg: &Message<'_>, mode: SendMode) -> Result<()> {
        let Some(peer) = self.peers.get(peer_id) else {
            return Err(O2Error::UnknownService(first_segment(&msg.normalized_address()).into()));
        };
        let udp_addr = peer.udp_addr;
        match mode {
            SendMode::Command => {
                if self.transport.send_command(peer_id, msg) {
                    Ok(())
                } else {
                    Err(O2Error::TcpHangUp)
                }
            }
            SendMode::BestEffort => {
                let mut buf = self.buffer_pool.acquire(256).unwrap_or_default();
                let sent = self.transport.send_best_effort_buf(udp_addr, msg, &mut buf)?;
                self.buffer_pool.release(buf);
                if sent {
                    Ok(())
                } else if self.transport.send_command(peer_id, msg) {
                    Ok(())
                } else {
                    Err(O2Error::TcpHangUp)
                }
            }
        }
    }

    /// Routes one inbound message (from the network, not a local `send`
    /// call): dispatched immediately if due, scheduled into `gtsched` if
    /// timestamped for the future and this process has global time, or
    /// dropped if it carries a future timestamp and no sync path exists yet
    /// (§4.8, §7 — there is no caller to return `NoSync` to here).
    fn route_incoming(&mut self, msg: Message<'static>) {
        if msg.timestamp <= o2_proto::IMMEDIATE {
            self.deliver_due(msg);
            return;
        }
        if self.clock.has_global_time() {
            if msg.timestamp <= self.clock.global_time() {
                self.deliver_due(msg);
            } else {
                self.gtsched.schedule(msg);
            }
        } else {
            log::debug!("dropping future-timestamped inbound message: no clock sync yet");
        }
    }

    /// Runs one iteration of the poll loop (§4.9 `o2_poll`): drain sockets,
    /// tick discovery and clock housekeeping, sweep both schedulers, then
    /// drain whatever handlers appended to the pending-dispatch queue.
    ///
    /// Panics if called reentrantly (from within a method handler, e.g.) —
    /// see the `polling` field's doc comment.
    pub fn poll(&mut self) -> Result<()> {
        assert!(!self.polling.get(), "O2::poll is not reentrant");
        self.polling.set(true);
        let result = self.poll_inner();
        self.polling.set(false);
        result
    }

    fn poll_inner(&mut self) -> Result<()> {
        self.poll_io();
        self.tick_discovery();
        self.tick_clock();

        let local_now = self.clock.local_time();
        let mut due = Vec::new();
        self.ltsched.sweep(local_now, &mut due);
        for msg in due {
            self.deliver_due(msg);
        }

        if self.clock.has_global_time() {
            let global_now = self.clock.global_time();
            let mut due = Vec::new();
            self.gtsched.sweep(global_now, &mut due);
            for msg in due {
                self.deliver_due(msg);
            }
        }

        while let Some(msg) = self.pending_dispatch.pop_front() {
            if let Err(e) = self.send(msg, SendMode::BestEffort) {
                log::debug!("dropping handler-scheduled message: {e}");
            }
        }

        Ok(())
    }

    /// Step 1 of §4.9: drains the data UDP socket, routing clock-probe
    /// traffic (§6 `/_o2/cs/get`/`/_o2/cs/put`) to the clock subsystem and
    /// everything else through ordinary intake.
    fn poll_io(&mut self) {
        for dg in self.transport.poll_data() {
            if dg.message.address == clock::ADDR_CLOCK_GET {
                self.handle_clock_get(dg.from, &dg.message);
            } else if dg.message.address == clock::ADDR_CLOCK_PUT {
                self.handle_clock_put(&dg.message);
            } else {
                self.route_incoming(dg.message);
            }
        }
    }

    fn handle_clock_get(&mut self, from: SocketAddr, msg: &Message<'_>) {
        if !self.clock.is_master {
            return;
        }
        if let Some((request_id, _requester)) = clock::parse_get(msg) {
            let reply = clock::build_put(request_id, self.clock.global_time());
            if let Err(e) = self.transport.send_best_effort(from, &reply) {
                log::debug!("failed to reply to clock probe from {from}: {e}");
            }
        }
    }

    fn handle_clock_put(&mut self, msg: &Message<'_>) {
        let Some((request_id, master_time)) = clock::parse_put(msg) else {
            return;
        };
        let Some(sample) = self.clock.complete_probe(request_id, master_time) else {
            return;
        };
        let Some(master_id) = self.clock.master_peer_id.clone() else {
            return;
        };
        if let Some(peer) = self.peers.get_mut(&master_id) {
            peer.clock.record(sample);
            if let Some(offset) = peer.clock.min_rtt_offset() {
                self.clock.set_target_offset(offset);
            }
        }
    }

    /// Step 2 of §4.9: broadcasts discovery on its backoff schedule, accepts
    /// and identifies TCP connections, and replicates service-set changes
    /// (§4.6).
    fn tick_discovery(&mut self) {
        let now = Instant::now();
        if self.discovery_timer.is_due(now) {
            let msg = discovery::build_discovery(
                &self.config.ensemble_name,
                &self.self_id,
                self.transport.data_port,
                self.transport.tcp_port,
                self.clock.is_master_candidate,
            );
            if let Err(e) = self.transport.broadcast_discovery(&msg) {
                log::debug!("discovery broadcast failed: {e}");
            }
            self.discovery_timer.record_sent(now);
        }

        self.transport.accept_incoming();

        for dg in self.transport.poll_discovery() {
            if let Some(info) = discovery::parse_discovery(&dg.message) {
                self.handle_discovery_info(dg.from, info);
            }
        }

        let pending_events = self.transport.poll_pending();
        for (addr, events) in pending_events {
            for ev in events {
                if let TcpEvent::Message(msg) = ev {
                    if let Some(peer_id) = discovery::parse_connect(&msg) {
                        self.transport.promote(addr, peer_id.clone());
                        let names: Vec<String> = self.directory.names().map(str::to_owned).collect();
                        let services_msg = discovery::build_services(names.into_iter());
                        self.transport.send_command(&peer_id, &services_msg);
                    }
                }
            }
        }

        let link_events = self.transport.poll_links();
        for (peer_id, events) in link_events {
            for ev in events {
                match ev {
                    TcpEvent::Message(msg) => self.handle_peer_tcp_message(&peer_id, msg),
                    TcpEvent::Closed => self.handle_peer_lost(&peer_id),
                }
            }
        }

        self.sweep_missed_heartbeats(now);
    }

    fn handle_discovery_info(&mut self, from: SocketAddr, info: discovery::DiscoveryInfo) {
        if info.ensemble != self.config.ensemble_name || info.peer_id == self.self_id {
            return;
        }
        let udp_addr = SocketAddr::new(from.ip(), info.udp_port);
        if let Some(peer) = self.peers.get_mut(&info.peer_id) {
            peer.last_heard = Instant::now();
            peer.missed_heartbeats = 0;
            peer.is_master_candidate = info.is_master_candidate;
            return;
        }

        let we_initiate = self.self_id < info.peer_id;
        let peer = Peer::new(info.peer_id.clone(), udp_addr, info.tcp_port, info.is_master_candidate, we_initiate);
        self.peers.insert(peer);

        if we_initiate {
            let tcp_addr = SocketAddr::new(from.ip(), info.tcp_port);
            match self.transport.connect(tcp_addr) {
                Ok(()) => {
                    let handshake = discovery::build_connect(&self.self_id);
                    self.transport.send_on_pending(tcp_addr, &handshake);
                    self.transport.promote(tcp_addr, info.peer_id.clone());
                    let names: Vec<String> = self.directory.names().map(str::to_owned).collect();
                    let services_msg = discovery::build_services(names.into_iter());
                    self.transport.send_command(&info.peer_id, &services_msg);
                }
                Err(e) => log::debug!("failed to connect to {tcp_addr}: {e}"),
            }
        }
    }

    fn handle_peer_tcp_message(&mut self, peer_id: &PeerId, msg: Message<'static>) {
        if msg.address == discovery::ADDR_SERVICES {
            if let Some(names) = discovery::parse_services(&msg) {
                for name in names {
                    if let Some(peer) = self.peers.get_mut(peer_id) {
                        peer.services.insert(name.as_str().into());
                    }
                    self.directory.add_remote_service(&name, peer_id.clone());
                }
            }
        } else if msg.address == discovery::ADDR_ADD_SERVICE {
            if let Some(name) = discovery::parse_single_service(&msg) {
                if let Some(peer) = self.peers.get_mut(peer_id) {
                    peer.services.insert(name.as_str().into());
                }
                self.directory.add_remote_service(&name, peer_id.clone());
            }
        } else if msg.address == discovery::ADDR_REMOVE_SERVICE {
            if let Some(name) = discovery::parse_single_service(&msg) {
                if let Some(peer) = self.peers.get_mut(peer_id) {
                    peer.services.remove(name.as_str());
                }
                self.directory.remove_service(&name);
            }
        } else {
            self.route_incoming(msg);
        }
    }

    /// Tears down a lost peer (§4.4): drops its peer-table entry, removes
    /// every service it owned, and closes its transport link. Messages
    /// already in flight toward it are not hunted down individually; once
    /// its services are gone they simply fail to route on their next sweep
    /// (§4.4 "in-flight messages toward a lost peer are dropped").
    fn handle_peer_lost(&mut self, peer_id: &PeerId) {
        if self.peers.remove(peer_id).is_some() {
            let removed = self.directory.remove_services_of(peer_id);
            if !removed.is_empty() {
                log::info!("peer {peer_id} lost; removed services {removed:?}");
            } else {
                log::info!("peer {peer_id} lost");
            }
            self.transport.remove_link(peer_id);
            if self.clock.master_peer_id.as_ref() == Some(peer_id) {
                self.clock.is_master = false;
                self.clock.master_peer_id = None;
                self.clock.synced = false;
            }
        }
    }

    fn sweep_missed_heartbeats(&mut self, now: Instant) {
        let threshold = self.config.discovery_period_max.mul_f64(f64::from(self.config.missed_heartbeats_limit));
        let dead: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|p| now.duration_since(p.last_heard) > threshold)
            .map(|p| p.id.clone())
            .collect();
        for id in dead {
            self.handle_peer_lost(&id);
        }
    }

    /// Step 3 of §4.9: maintains the master election outcome and, if not
    /// master, paces `clock-get` probes and slews `skew` toward the latest
    /// adopted offset (§4.7).
    fn tick_clock(&mut self) {
        let elected = self.peers.elect_master(&self.self_id, self.clock.is_master_candidate);
        match elected {
            Some(ref id) if *id == self.self_id => {
                if !self.clock.is_master {
                    self.clock.is_master = true;
                    self.clock.master_peer_id = Some(self.self_id.clone());
                    log::info!("{} elected master", self.self_id);
                }
            }
            Some(id) => {
                if self.clock.master_peer_id.as_ref() != Some(&id) {
                    self.clock.is_master = false;
                    self.clock.master_peer_id = Some(id.clone());
                    self.clock.synced = false;
                    log::info!("master is now {id}");
                }
            }
            None => {
                self.clock.is_master = false;
                self.clock.master_peer_id = None;
            }
        }

        let now = Instant::now();
        let elapsed = now.duration_since(self.last_skew_tick).as_secs_f64();
        self.clock.advance_skew(elapsed, self.config.max_skew_slew_rate);
        self.last_skew_tick = now;

        if self.clock.is_master {
            return;
        }
        let Some(master_id) = self.clock.master_peer_id.clone() else {
            return;
        };

        let samples_taken = self.peers.get(&master_id).map(|p| p.clock.samples_taken).unwrap_or(0);
        let period = if samples_taken < self.config.clock_sync_fast_samples {
            self.config.clock_sync_period_fast
        } else {
            self.config.clock_sync_period
        };
        let due = match self.last_probe_sent {
            None => true,
            Some(last) => now.duration_since(last) >= period,
        };
        if !due {
            return;
        }
        let Some(peer) = self.peers.get(&master_id) else {
            return;
        };
        let udp_addr = peer.udp_addr;
        let (request_id, _t0) = self.clock.begin_probe();
        let probe = clock::build_get(request_id, &self.self_id);
        if self.transport.send_best_effort(udp_addr, &probe).is_ok() {
            self.last_probe_sent = Some(now);
        }
    }

    /// Runs [`O2::poll`] at `rate_hz`, sleeping out the remainder of each
    /// period, until [`O2::stop`] is called (§4.9 `o2_run`).
    pub fn run(&mut self, rate_hz: f64) -> Result<()> {
        self.running = true;
        let period = Duration::from_secs_f64(1.0 / rate_hz);
        while self.running {
            let start = Instant::now();
            self.poll()?;
            let elapsed = start.elapsed();
            if let Some(remaining) = period.checked_sub(elapsed) {
                std::thread::sleep(remaining);
            }
        }
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Tears down this process (§4.9 `o2_finish`). Consuming `self` by value
    /// makes the whole-process drop that owns every socket and handler
    /// explicit at the call site.
    pub fn finish(self) {
        drop(self);
    }
}

fn first_segment(normalized: &str) -> &str {
    normalized.trim_start_matches('/').split('/').next().unwrap_or("")
}

fn msg_address_hint(msg: &Message<'_>) -> &str {
    &msg.address
}

/// Convenience builder for an immediate (non-scheduled) outgoing message
/// (§4.9 "the common case is an immediate send to a named address").
pub fn immediate_message(address: &str, args: Vec<Arg<'static>>) -> Message<'static> {
    let mut b = MessageBuilder::new();
    for a in args {
        b.add(a);
    }
    b.finish(o2_proto::IMMEDIATE, address.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Binds every socket to port 0 (OS-assigned), so concurrently-run tests
    /// never collide on a real port.
    fn config(ensemble: &str) -> Config {
        let mut c = Config::new(ensemble);
        c.discovery_port = 0;
        c.port_search_range = 0..=0;
        c
    }

    #[test]
    fn initialize_rejects_empty_ensemble_name() {
        let err = O2::initialize(Config::default()).unwrap_err();
        assert!(matches!(err, O2Error::BadName));
    }

    #[test]
    fn status_of_unknown_service_is_fail() {
        let mut o2 = O2::initialize(config("test-ensemble")).unwrap();
        assert_eq!(o2.status("nope"), Status::Fail);
        o2.add_service("synth");
        assert_eq!(o2.status("synth"), Status::LocalNoTime);
    }

    #[test]
    fn send_future_timestamp_without_sync_fails() {
        let mut o2 = O2::initialize(config("test-ensemble")).unwrap();
        o2.add_service("synth");
        let mut future = immediate_message("/synth/x", vec![Arg::Int32(1)]);
        future.timestamp = 5.0;
        let err = o2.send(future, SendMode::BestEffort).unwrap_err();
        assert!(matches!(err, O2Error::NoSync));
    }

    #[test]
    fn send_to_unknown_service_fails() {
        let mut o2 = O2::initialize(config("test-ensemble")).unwrap();
        let msg = immediate_message("/nope/x", vec![]);
        let err = o2.send(msg, SendMode::BestEffort).unwrap_err();
        assert!(matches!(err, O2Error::UnknownService(_)));
    }

    #[test]
    fn reentrant_poll_panics() {
        let o2 = O2::initialize(config("test-ensemble")).unwrap();
        o2.polling.set(true);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut o2 = o2;
            o2.poll()
        }));
        assert!(result.is_err());
    }

    /// A message scheduled against `gtsched` with a future timestamp is never
    /// dispatched while `global_time() < msg.timestamp`, even once this
    /// process has a synchronized clock.
    #[test]
    fn future_message_not_dispatched_before_global_time() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let mut o2 = O2::initialize(config("test-ensemble")).unwrap();
        o2.add_service("synth");
        let hit = Rc::new(RefCell::new(false));
        let hit2 = hit.clone();
        o2.add_method("/synth/x", None, false, false, move |_m, _a, _outbox| {
            *hit2.borrow_mut() = true;
        });

        // Force this process to believe itself synchronized without waiting
        // on a real peer, by acting as its own master ("get_time() returns
        // local_time() if self is master"). `is_master_candidate` must also
        // be set so `tick_clock`'s election sweep re-confirms (rather than
        // revokes) master status on every poll.
        o2.clock.is_master_candidate = true;
        o2.clock.is_master = true;

        let mut future = immediate_message("/synth/x", vec![]);
        future.timestamp = o2.global_time() + 1000.0;
        o2.send(future, SendMode::BestEffort).unwrap();

        // Many sweeps at the current time must not fire the far-future message.
        for _ in 0..5 {
            o2.poll().unwrap();
        }
        assert!(!*hit.borrow(), "handler fired before its timestamp was reached");
    }

    /// Ownership of anything the core is handed — a sent message, or
    /// resources a handler captures — is never doubled up or silently
    /// dropped. A `Drop`-counted value captured by an installed handler must
    /// be dropped exactly once, when the owning `O2` process (and with it the
    /// directory holding the handler) is torn down, not during dispatch and
    /// not twice.
    #[test]
    fn handler_captured_resource_is_dropped_exactly_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        struct DropCounter(Arc<AtomicUsize>);
        impl Drop for DropCounter {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        let counter = DropCounter(drops.clone());

        let mut o2 = O2::initialize(config("test-ensemble")).unwrap();
        o2.add_service("synth");
        o2.add_method("/synth/x", None, false, true, move |_m, _a, _outbox| {
            let _keep_alive = &counter;
        });

        let msg = immediate_message("/synth/x", vec![Arg::Int32(1)]);
        o2.send(msg, SendMode::BestEffort).unwrap();

        // The handler (and its captured counter) is still alive after the
        // call returns; the counted value has not been double-dropped.
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        drop(o2);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn local_dispatch_through_send_invokes_handler() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let mut o2 = O2::initialize(config("test-ensemble")).unwrap();
        o2.add_service("synth");
        let hit = Rc::new(RefCell::new(false));
        let hit2 = hit.clone();
        o2.add_method("/synth/vol", None, false, true, move |_m, _a, _outbox| {
            *hit2.borrow_mut() = true;
        });
        let msg = immediate_message("/synth/vol", vec![Arg::Float32(0.5)]);
        o2.send(msg, SendMode::BestEffort).unwrap();
        assert!(*hit.borrow());
    }
}
