//! The reliability layer (§4.2): nonce assignment on send, dedupe-by-nonce
//! plus immediate ack on receive, and the 2000ms ticker that retransmits
//! unacked packets, pings idle connections, and declares dead ones. Grounded
//! in the wider pack's tokio-UDP-server idiom since the teacher's WebSocket
//! transport has no analogue (WS delivery is already reliable).

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use protocol::{Direction, GameMessage, RootPacket};

use crate::connection::{ClientId, Connection, ConnectionRegistry};

/// How often the global ticker fires (§4.2, §5).
pub const TICK_INTERVAL: Duration = Duration::from_millis(2000);
/// Age past which an unacked in-flight packet is retransmitted.
pub const RETRANSMIT_AGE: Duration = Duration::from_millis(500);

/// `true` if `nonce` is the documented mod-declaration-at-nonce-0 exception
/// (§4.2, §9) - the one case where an otherwise-duplicate nonce must still
/// be processed.
pub fn is_nonce_zero_quirk(root: &RootPacket) -> bool {
    matches!(root, RootPacket::Reliable { nonce: 0, children } if children.iter().any(|c| matches!(
        c,
        GameMessage::GameData { children, .. } | GameMessage::GameDataTo { children, .. }
            if children.iter().any(|d| matches!(d, protocol::GameDataChild::ModDeclaration { .. }))
    )))
}

/// Encodes `children` as a new Reliable packet for `conn`, allocating the
/// next nonce and recording it in the in-flight deque (§4.2 "Sending").
pub fn send_reliable(conn: &mut Connection, children: Vec<GameMessage>, direction: Direction) -> Bytes {
    let nonce = conn.allocate_nonce();
    let packet = RootPacket::Reliable { nonce, children };
    let bytes = protocol::write(&packet, direction).freeze();
    conn.record_sent(nonce, bytes.clone());
    bytes
}

/// Encodes `children` as a new Reliable packet but does not record it in
/// the in-flight deque, so it is never retransmitted - the "unreliable
/// path" for movement data (§4.6). It still carries a fresh nonce so the
/// receiver's ordinary dedupe/ack handling applies uniformly.
pub fn send_unreliable(conn: &mut Connection, children: Vec<GameMessage>, direction: Direction) -> Bytes {
    let nonce = conn.allocate_nonce();
    let packet = RootPacket::Reliable { nonce, children };
    protocol::write(&packet, direction).freeze()
}

/// Builds the immediate Acknowledge reply for an accepted inbound nonce.
pub fn build_acknowledge(nonce: u16) -> Bytes {
    protocol::write(&RootPacket::Acknowledge { nonce, missing: 0 }, Direction::Clientbound).freeze()
}

/// Applies an inbound Acknowledge to the matching in-flight entry, returning
/// the measured round-trip if the nonce was found.
pub fn on_acknowledge(conn: &mut Connection, nonce: u16) -> Option<Duration> {
    conn.acknowledge(nonce)
}

/// What the caller must do as a result of one ticker firing for one
/// connection.
pub struct TickAction {
    pub remote: SocketAddr,
    pub client_id: ClientId,
    pub ping: Bytes,
    pub retransmits: Vec<Bytes>,
    pub dead: bool,
}

/// Runs one 2000ms tick over every connection in the registry (§4.2): issue
/// a fresh ping, retransmit anything older than 500ms, and flag dead
/// connections. Does not mutate the registry itself (removal is the
/// caller's job, since it must also emit room-leave bookkeeping).
pub fn tick(registry: &mut ConnectionRegistry) -> Vec<TickAction> {
    let mut actions = Vec::new();
    for conn in registry.iter_mut() {
        let ping_nonce = conn.allocate_nonce();
        let ping = protocol::write(&RootPacket::Ping { nonce: ping_nonce }, Direction::Clientbound)
            .freeze();

        let mut retransmits = Vec::new();
        for sent in conn.in_flight.iter_mut() {
            if !sent.acked && sent.sent_at.elapsed() > RETRANSMIT_AGE {
                retransmits.push(sent.bytes.clone());
                sent.sent_at = std::time::Instant::now();
            }
        }

        actions.push(TickAction {
            remote: conn.remote,
            client_id: conn.client_id,
            ping,
            retransmits,
            dead: conn.is_dead(),
        });
    }
    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ClientId;
    use std::net::SocketAddr;

    fn addr() -> SocketAddr {
        "127.0.0.1:9".parse().unwrap()
    }

    #[test]
    fn send_reliable_assigns_sequential_nonces_and_records_in_flight() {
        let mut registry = ConnectionRegistry::new();
        let conn = registry.get_or_create(addr());
        let first = send_reliable(
            conn,
            vec![GameMessage::StartGame { code: 1 }],
            Direction::Clientbound,
        );
        let second = send_reliable(
            conn,
            vec![GameMessage::EndGame { code: 1 }],
            Direction::Clientbound,
        );
        assert_ne!(first, second);
        assert_eq!(conn.in_flight.len(), 2);
        assert_eq!(conn.in_flight.front().unwrap().nonce, 2);
    }

    #[test]
    fn tick_retransmits_only_old_unacked_packets() {
        let mut registry = ConnectionRegistry::new();
        {
            let conn = registry.get_or_create(addr());
            conn.record_sent(1, Bytes::from_static(b"stale"));
            conn.in_flight.front_mut().unwrap().sent_at =
                std::time::Instant::now() - Duration::from_millis(600);
            conn.record_sent(2, Bytes::from_static(b"fresh"));
        }
        let actions = tick(&mut registry);
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].retransmits.len(), 1);
        assert_eq!(actions[0].retransmits[0], Bytes::from_static(b"stale"));
    }

    #[test]
    fn tick_flags_dead_connection_after_eight_unacked() {
        let mut registry = ConnectionRegistry::new();
        {
            let conn = registry.get_or_create(addr());
            for nonce in 1..=8u16 {
                conn.record_sent(nonce, Bytes::new());
            }
        }
        let actions = tick(&mut registry);
        assert!(actions[0].dead);
        assert_eq!(actions[0].client_id, ClientId(1));
    }

    #[test]
    fn acknowledge_reports_round_trip_time() {
        let mut registry = ConnectionRegistry::new();
        let conn = registry.get_or_create(addr());
        conn.record_sent(1, Bytes::new());
        assert!(on_acknowledge(conn, 1).is_some());
        assert!(on_acknowledge(conn, 99).is_none());
    }
}
