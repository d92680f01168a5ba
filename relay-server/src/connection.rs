//! One entry per connected client endpoint, and the registry that owns
//! them all. Keyed by `"address:port"` exactly as spec.md §4.3 requires,
//! generalizing the teacher's `AppState.rooms: HashMap<String, Room>`
//! keyed-map idiom to connections.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::Instant;

use bytes::Bytes;

use crate::handshake::HandshakeState;

/// Per-connection cap on both the in-flight and received-nonce deques (§3,
/// §8 invariant: "the in-flight deque has size ≤ 8").
pub const MAX_IN_FLIGHT: usize = 8;

/// A reliable packet we sent, tracked until acked or discarded by the cap.
#[derive(Clone, Debug)]
pub struct SentPacket {
    pub nonce: u16,
    pub bytes: Bytes,
    pub sent_at: Instant,
    pub acked: bool,
}

/// A client-declared mod, recorded during the handshake (§3, §4.4).
#[derive(Clone, Debug, PartialEq)]
pub struct ModDeclaration {
    pub net_id: u16,
    pub mod_id: String,
    pub version: String,
    pub side: protocol::ModSide,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct ClientId(pub u16);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub struct Connection {
    pub remote: SocketAddr,
    pub client_id: ClientId,

    pub username: String,
    pub language: String,
    pub client_version: String,

    pub handshake: HandshakeState,
    pub uses_mod_framework: bool,
    pub declared_mod_count: u16,
    pub mods: Vec<ModDeclaration>,

    /// Newest-first, bounded to `MAX_IN_FLIGHT`.
    received_nonces: VecDeque<u16>,
    /// Newest-first, bounded to `MAX_IN_FLIGHT`.
    pub in_flight: VecDeque<SentPacket>,
    pub last_seen_nonce: u16,
    pub next_send_nonce: u16,
    pub last_round_trip: Option<std::time::Duration>,

    pub room: Option<i32>,
    pub disconnect_initiated: bool,
}

impl Connection {
    fn new(remote: SocketAddr, client_id: ClientId) -> Self {
        Connection {
            remote,
            client_id,
            username: String::new(),
            language: String::new(),
            client_version: String::new(),
            handshake: HandshakeState::New,
            uses_mod_framework: false,
            declared_mod_count: 0,
            mods: Vec::new(),
            received_nonces: VecDeque::with_capacity(MAX_IN_FLIGHT),
            in_flight: VecDeque::with_capacity(MAX_IN_FLIGHT),
            last_seen_nonce: 0,
            next_send_nonce: 1,
            last_round_trip: None,
            room: None,
            disconnect_initiated: false,
        }
    }

    /// Allocates the next outbound nonce for this connection (§4.2: "starting
    /// at 1").
    pub fn allocate_nonce(&mut self) -> u16 {
        let nonce = self.next_send_nonce;
        self.next_send_nonce = self.next_send_nonce.wrapping_add(1);
        nonce
    }

    /// Pushes a newly-sent reliable packet, discarding anything past the
    /// cap. §3 invariant: bounded to 8, newest-first, ordered by `sentAt`.
    pub fn record_sent(&mut self, nonce: u16, bytes: Bytes) {
        self.in_flight.push_front(SentPacket {
            nonce,
            bytes,
            sent_at: Instant::now(),
            acked: false,
        });
        self.in_flight.truncate(MAX_IN_FLIGHT);
    }

    /// Marks the in-flight packet with this nonce acked, returning its
    /// round-trip time if found.
    pub fn acknowledge(&mut self, nonce: u16) -> Option<std::time::Duration> {
        let sent = self.in_flight.iter_mut().find(|p| p.nonce == nonce)?;
        sent.acked = true;
        let rtt = sent.sent_at.elapsed();
        self.last_round_trip = Some(rtt);
        Some(rtt)
    }

    /// `true` once 8 consecutive in-flight packets are all unacked -
    /// §4.2's liveness-failure condition.
    pub fn is_dead(&self) -> bool {
        self.in_flight.len() == MAX_IN_FLIGHT && self.in_flight.iter().all(|p| !p.acked)
    }

    /// Returns `true` if `nonce` should be processed (not a duplicate),
    /// updating `last_seen_nonce` and the received-nonce deque as a side
    /// effect when accepted. The nonce-0 mod-declaration quirk is handled by
    /// the caller, which should pass `allow_duplicate = true` for it (§4.2,
    /// §9 "Nonce-0 mod-declaration quirk").
    pub fn accept_nonce(&mut self, nonce: u16, allow_duplicate: bool) -> bool {
        if !allow_duplicate && nonce <= self.last_seen_nonce {
            return false;
        }
        if nonce > self.last_seen_nonce {
            self.last_seen_nonce = nonce;
        }
        self.received_nonces.push_front(nonce);
        self.received_nonces.truncate(MAX_IN_FLIGHT);
        true
    }

    pub fn add_mod(&mut self, decl: ModDeclaration) {
        if self.mods.len() >= self.declared_mod_count as usize {
            // Excess declarations are silently discarded (§4.4).
            return;
        }
        self.mods.push(decl);
    }

    pub fn has_mod(&self, mod_id: &str) -> Option<&ModDeclaration> {
        self.mods.iter().find(|m| m.mod_id == mod_id)
    }
}

/// Owns every live connection, keyed by remote address (§4.3).
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: HashMap<SocketAddr, Connection>,
    next_client_id: u16,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        ConnectionRegistry {
            connections: HashMap::new(),
            next_client_id: 1,
        }
    }

    /// Returns the existing connection for `remote`, or creates one with a
    /// freshly allocated client id.
    pub fn get_or_create(&mut self, remote: SocketAddr) -> &mut Connection {
        if !self.connections.contains_key(&remote) {
            let id = ClientId(self.next_client_id);
            self.next_client_id = self.next_client_id.wrapping_add(1);
            self.connections.insert(remote, Connection::new(remote, id));
        }
        self.connections.get_mut(&remote).unwrap()
    }

    pub fn get(&self, remote: &SocketAddr) -> Option<&Connection> {
        self.connections.get(remote)
    }

    pub fn get_mut(&mut self, remote: &SocketAddr) -> Option<&mut Connection> {
        self.connections.get_mut(remote)
    }

    pub fn find_by_client_id(&self, client_id: ClientId) -> Option<&Connection> {
        self.connections.values().find(|c| c.client_id == client_id)
    }

    pub fn find_remote_by_client_id(&self, client_id: ClientId) -> Option<SocketAddr> {
        self.connections
            .values()
            .find(|c| c.client_id == client_id)
            .map(|c| c.remote)
    }

    /// Removes a connection by its remote key. Returns the removed
    /// connection, if any, so the caller can emit a `ClientLeave` event when
    /// it was in a room (§4.3).
    pub fn remove(&mut self, remote: &SocketAddr) -> Option<Connection> {
        self.connections.remove(remote)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.connections.values_mut()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn in_flight_deque_is_bounded_and_newest_first() {
        let mut conn = Connection::new(addr(1), ClientId(1));
        for nonce in 1..=10u16 {
            conn.record_sent(nonce, Bytes::new());
        }
        assert_eq!(conn.in_flight.len(), MAX_IN_FLIGHT);
        assert_eq!(conn.in_flight.front().unwrap().nonce, 10);
        assert_eq!(conn.in_flight.back().unwrap().nonce, 3);
    }

    #[test]
    fn duplicate_nonce_is_rejected() {
        let mut conn = Connection::new(addr(1), ClientId(1));
        assert!(conn.accept_nonce(5, false));
        assert!(!conn.accept_nonce(5, false));
        assert!(!conn.accept_nonce(3, false));
        assert!(conn.accept_nonce(6, false));
    }

    #[test]
    fn nonce_zero_mod_declaration_quirk_bypasses_dedupe() {
        let mut conn = Connection::new(addr(1), ClientId(1));
        assert!(conn.accept_nonce(5, false));
        // An ordinary nonce 0 packet would be rejected...
        assert!(!conn.accept_nonce(0, false));
        // ...but the documented quirk allows it through anyway.
        assert!(conn.accept_nonce(0, true));
        // last_seen_nonce must not regress from the bypass.
        assert_eq!(conn.last_seen_nonce, 5);
    }

    #[test]
    fn connection_is_dead_after_eight_unacked_in_flight() {
        let mut conn = Connection::new(addr(1), ClientId(1));
        for nonce in 1..=7u16 {
            conn.record_sent(nonce, Bytes::new());
            assert!(!conn.is_dead());
        }
        conn.record_sent(8, Bytes::new());
        assert!(conn.is_dead());
    }

    #[test]
    fn acking_one_in_flight_packet_prevents_dead_declaration() {
        let mut conn = Connection::new(addr(1), ClientId(1));
        for nonce in 1..=8u16 {
            conn.record_sent(nonce, Bytes::new());
        }
        assert!(conn.acknowledge(4).is_some());
        assert!(!conn.is_dead());
    }

    #[test]
    fn registry_allocates_monotonic_client_ids() {
        let mut registry = ConnectionRegistry::new();
        let first = registry.get_or_create(addr(1)).client_id;
        let second = registry.get_or_create(addr(2)).client_id;
        assert_eq!(first, ClientId(1));
        assert_eq!(second, ClientId(2));
        // Re-fetching the same remote does not allocate a new id.
        assert_eq!(registry.get_or_create(addr(1)).client_id, first);
    }
}
