//! UDP broadcast/unicast and TCP transport (component C5, §4.5).
//!
//! Three socket kinds, all non-blocking, polled once per [`crate::O2::poll`]
//! call rather than ever blocking (§4.5, §5): a discovery UDP socket bound
//! to the well-known broadcast port, a data UDP socket on an ephemeral
//! port, and a TCP listener for reliable peer connections. TCP frames are a
//! 4-byte big-endian length prefix followed by one encoded message (§4.5,
//! §6). `socket2` builds the discovery socket so `SO_REUSEADDR`/
//! `SO_BROADCAST` can be set before bind, matching the source's requirement
//! that several O2 processes on one host all bind the same discovery port.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::ops::RangeInclusive;

use o2_proto::{decode_message, encode_message, Message};

use crate::peer::PeerId;

/// Best-effort (UDP, may be dropped) vs. command (TCP, reliable) send mode
/// (§4.5, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    BestEffort,
    Command,
}

/// A decoded datagram plus the address it arrived from.
pub struct Datagram {
    pub from: SocketAddr,
    pub message: Message<'static>,
}

/// An event surfaced by a TCP connection (identified or not yet identified
/// by peer id — see [`Transport::poll_pending`] vs [`Transport::poll_links`]).
pub enum TcpEvent {
    Message(Message<'static>),
    /// The peer closed the connection, or a read/write failed (§7
    /// "Transport errors").
    Closed,
}

const MAX_BEST_EFFORT_DATAGRAM: usize = 1452;

struct TcpLink {
    stream: TcpStream,
    write_queue: VecDeque<u8>,
    read_buf: Vec<u8>,
}

impl TcpLink {
    fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            write_queue: VecDeque::new(),
            read_buf: Vec::new(),
        })
    }

    fn queue_message(&mut self, msg: &Message<'_>) {
        let mut body = Vec::new();
        encode_message(&mut body, msg);
        self.write_queue.extend((body.len() as u32).to_be_bytes());
        self.write_queue.extend(body);
    }

    /// Writes as much of the queued bytes as the socket will accept without
    /// blocking, leaving the rest buffered (§4.5 "partial writes are
    /// buffered per connection").
    fn flush(&mut self) -> io::Result<()> {
        while !self.write_queue.is_empty() {
            let chunk = self.write_queue.make_contiguous();
            match self.stream.write(chunk) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => drop(self.write_queue.drain(..n)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Reads whatever is available and decodes every complete
    /// length-prefixed frame accumulated so far (§4.5 "partial reads
    /// accumulate per connection until a full length-prefixed frame is
    /// present").
    fn poll_read(&mut self) -> io::Result<Vec<TcpEvent>> {
        let mut tmp = [0u8; 4096];
        loop {
            match self.stream.read(&mut tmp) {
                Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(n) => self.read_buf.extend_from_slice(&tmp[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        let mut events = Vec::new();
        loop {
            if self.read_buf.len() < 4 {
                break;
            }
            let len = u32::from_be_bytes(self.read_buf[..4].try_into().unwrap()) as usize;
            if self.read_buf.len() < 4 + len {
                break;
            }
            let frame = self.read_buf[4..4 + len].to_vec();
            self.read_buf.drain(..4 + len);
            match decode_message(&frame) {
                Ok(msg) => events.push(TcpEvent::Message(msg.into_owned())),
                Err(e) => log::debug!("malformed TCP frame dropped: {e}"),
            }
        }
        Ok(events)
    }
}

fn bind_udp_in_range(range: RangeInclusive<u16>) -> io::Result<UdpSocket> {
    for port in range.clone() {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        if let Ok(s) = UdpSocket::bind(addr) {
            s.set_nonblocking(true)?;
            return Ok(s);
        }
    }
    Err(io::Error::new(io::ErrorKind::AddrInUse, "no free UDP port in search range"))
}

fn bind_tcp_in_range(range: RangeInclusive<u16>) -> io::Result<TcpListener> {
    for port in range {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        if let Ok(l) = TcpListener::bind(addr) {
            l.set_nonblocking(true)?;
            return Ok(l);
        }
    }
    Err(io::Error::new(io::ErrorKind::AddrInUse, "no free TCP port in search range"))
}

fn bind_discovery_socket(port: u16) -> io::Result<UdpSocket> {
    use socket2::{Domain, Protocol, Socket, Type};
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

/// Owns every socket a single O2 process touches (§4.5).
pub struct Transport {
    discovery_udp: UdpSocket,
    data_udp: UdpSocket,
    tcp_listener: TcpListener,
    discovery_port: u16,
    pub data_port: u16,
    pub tcp_port: u16,
    links: HashMap<PeerId, TcpLink>,
    pending: Vec<(SocketAddr, TcpLink)>,
}

impl Transport {
    pub fn bind(discovery_port: u16, port_search_range: RangeInclusive<u16>) -> io::Result<Self> {
        let discovery_udp = bind_discovery_socket(discovery_port)?;
        let data_udp = bind_udp_in_range(port_search_range.clone())?;
        let tcp_listener = bind_tcp_in_range(port_search_range)?;
        let data_port = data_udp.local_addr()?.port();
        let tcp_port = tcp_listener.local_addr()?.port();
        Ok(Self {
            discovery_udp,
            data_udp,
            tcp_listener,
            discovery_port,
            data_port,
            tcp_port,
            links: HashMap::new(),
            pending: Vec::new(),
        })
    }

    /// Broadcasts `msg` to every process listening on the discovery port
    /// (§4.6).
    pub fn broadcast_discovery(&self, msg: &Message<'_>) -> io::Result<()> {
        let mut buf = Vec::new();
        encode_message(&mut buf, msg);
        let dest = SocketAddr::from((Ipv4Addr::BROADCAST, self.discovery_port));
        self.discovery_udp.send_to(&buf, dest)?;
        Ok(())
    }

    /// Sends a discovery datagram directly to one address (used to reply to
    /// a specific peer rather than broadcasting, e.g. a targeted rediscovery
    /// probe).
    pub fn send_discovery_to(&self, msg: &Message<'_>, addr: SocketAddr) -> io::Result<()> {
        let mut buf = Vec::new();
        encode_message(&mut buf, msg);
        self.discovery_udp.send_to(&buf, addr)?;
        Ok(())
    }

    fn drain_udp(socket: &UdpSocket) -> Vec<Datagram> {
        let mut out = Vec::new();
        let mut buf = [0u8; 65536];
        loop {
            match socket.recv_from(&mut buf) {
                Ok((n, from)) => match decode_message(&buf[..n]) {
                    Ok(message) => out.push(Datagram { from, message: message.into_owned() }),
                    Err(e) => log::debug!("malformed UDP datagram from {from} dropped: {e}"),
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break, // UDP errors are silent (§7)
            }
        }
        out
    }

    pub fn poll_discovery(&self) -> Vec<Datagram> {
        Self::drain_udp(&self.discovery_udp)
    }

    pub fn poll_data(&self) -> Vec<Datagram> {
        Self::drain_udp(&self.data_udp)
    }

    /// Sends `msg` best-effort via the data UDP socket if it fits a single
    /// datagram; otherwise reports that it must be promoted to a command
    /// send instead (§4.5: "otherwise it is promoted to TCP").
    pub fn send_best_effort(&self, addr: SocketAddr, msg: &Message<'_>) -> io::Result<bool> {
        let mut buf = Vec::new();
        encode_message(&mut buf, msg);
        if buf.len() > MAX_BEST_EFFORT_DATAGRAM {
            return Ok(false);
        }
        self.data_udp.send_to(&buf, addr)?;
        Ok(true)
    }

    /// Same as [`Transport::send_best_effort`] but encodes into a
    /// caller-supplied, pool-acquired buffer instead of a fresh `Vec`
    /// (§4.2 "the encode-then-send path reuses pooled buffers").
    pub fn send_best_effort_buf(&self, addr: SocketAddr, msg: &Message<'_>, buf: &mut Vec<u8>) -> io::Result<bool> {
        buf.clear();
        encode_message(buf, msg);
        if buf.len() > MAX_BEST_EFFORT_DATAGRAM {
            return Ok(false);
        }
        self.data_udp.send_to(buf, addr)?;
        Ok(true)
    }

    /// Queues `msg` onto a not-yet-identified connection at `addr` (used to
    /// send the handshake's first frame before the peer id is even known to
    /// the caller as the map key — see [`Transport::promote`]).
    pub fn send_on_pending(&mut self, addr: SocketAddr, msg: &Message<'_>) -> bool {
        if let Some((_, link)) = self.pending.iter_mut().find(|(a, _)| *a == addr) {
            link.queue_message(msg);
            let _ = link.flush();
            true
        } else {
            false
        }
    }

    /// Accepts every pending inbound TCP connection into the unidentified
    /// `pending` set; the caller learns which peer it is from the first
    /// framed message (§4.6 handshake) and calls [`Transport::promote`].
    pub fn accept_incoming(&mut self) {
        loop {
            match self.tcp_listener.accept() {
                Ok((stream, addr)) => match TcpLink::new(stream) {
                    Ok(link) => self.pending.push((addr, link)),
                    Err(e) => log::debug!("failed to configure accepted connection from {addr}: {e}"),
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    }

    /// Opens an outbound TCP connection to `addr`, parking it in `pending`
    /// until the handshake completes (§4.6: "only the side with the lower
    /// peer_id initiates").
    pub fn connect(&mut self, addr: SocketAddr) -> io::Result<()> {
        let stream = TcpStream::connect_timeout(&addr, std::time::Duration::from_millis(200))?;
        let link = TcpLink::new(stream)?;
        self.pending.push((addr, link));
        Ok(())
    }

    /// Polls every not-yet-identified connection, returning `(addr, events)`
    /// pairs. A connection stays `pending` until the caller promotes it;
    /// connections that close before being identified are simply dropped.
    pub fn poll_pending(&mut self) -> Vec<(SocketAddr, Vec<TcpEvent>)> {
        let mut results = Vec::new();
        self.pending.retain_mut(|(addr, link)| match link.poll_read() {
            Ok(events) => {
                if !events.is_empty() {
                    results.push((*addr, events));
                }
                true
            }
            Err(_) => false,
        });
        results
    }

    /// Moves a pending connection from `addr` into the identified link
    /// table under `peer_id`. No-op if no such pending connection exists.
    pub fn promote(&mut self, addr: SocketAddr, peer_id: PeerId) -> bool {
        if let Some(pos) = self.pending.iter().position(|(a, _)| *a == addr) {
            let (_, link) = self.pending.remove(pos);
            self.links.insert(peer_id, link);
            true
        } else {
            false
        }
    }

    pub fn has_link(&self, peer_id: &PeerId) -> bool {
        self.links.contains_key(peer_id)
    }

    pub fn remove_link(&mut self, peer_id: &PeerId) {
        self.links.remove(peer_id);
    }

    /// Queues `msg` for reliable delivery to `peer_id` (§4.5, §6 "command
    /// send"). No-op (message silently dropped) if no link is open.
    pub fn send_command(&mut self, peer_id: &PeerId, msg: &Message<'_>) -> bool {
        if let Some(link) = self.links.get_mut(peer_id) {
            link.queue_message(msg);
            true
        } else {
            false
        }
    }

    /// Flushes pending writes and polls reads on every identified link,
    /// returning `(peer_id, events)` pairs. A link whose read or flush
    /// fails is torn down and reported as `Closed` (§7 "TCP hang-up").
    pub fn poll_links(&mut self) -> Vec<(PeerId, Vec<TcpEvent>)> {
        let mut dead = Vec::new();
        let mut results = Vec::new();
        for (id, link) in self.links.iter_mut() {
            if link.flush().is_err() {
                dead.push(id.clone());
                continue;
            }
            match link.poll_read() {
                Ok(events) if !events.is_empty() => results.push((id.clone(), events)),
                Ok(_) => {}
                Err(_) => dead.push(id.clone()),
            }
        }
        for id in dead {
            self.links.remove(&id);
            results.push((id, vec![TcpEvent::Closed]));
        }
        results
    }
}
