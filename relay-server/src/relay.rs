//! Room relay: join handling, broadcast fan-out, directed messages, the
//! unreliable-movement path, perspective two-phase relay, host-only
//! authority, and `GetGameList` (§4.6). Generalizes the teacher's
//! `host_to_client_broadcaster: broadcast::Sender<Bytes>` in
//! `lobby.rs`/`processing_module.rs` - a native broadcast channel - into
//! per-recipient reliability-layer sends, since raw UDP has no equivalent.

use std::net::SocketAddr;

use protocol::{DisconnectReason, GameDataChild, GameListEntry, GameMessage};

use crate::connection::{ClientId, ConnectionRegistry};
use crate::room::{Room, RoomRegistry, RoomState};

const GAME_LIST_CAP: usize = 10;

/// One piece of mail the relay wants delivered; the caller (handlers.rs)
/// turns these into actual datagrams via the reliability layer, since that
/// is where per-connection nonce state lives.
pub struct Delivery {
    pub remote: SocketAddr,
    pub children: Vec<GameMessage>,
    pub reliable: bool,
}

/// Outcome of a join attempt.
pub enum JoinOutcome {
    Joined {
        deliveries: Vec<Delivery>,
    },
    Refused {
        reason: DisconnectReason,
    },
}

/// `handleRemoteJoin` (§4.6 "Join"). Does not touch `conn.room`; the caller
/// sets it once this returns `Joined`, mirroring the connection registry's
/// ownership of that field.
pub fn join_room(
    room: &mut Room,
    registry: &ConnectionRegistry,
    joiner_remote: SocketAddr,
    joiner_id: ClientId,
) -> JoinOutcome {
    if room.state == RoomState::Destroyed {
        return JoinOutcome::Refused {
            reason: DisconnectReason::GameNotFound,
        };
    }
    if room.is_banned(joiner_remote.ip()) {
        return JoinOutcome::Refused {
            reason: DisconnectReason::Banned,
        };
    }
    if room.is_full() {
        return JoinOutcome::Refused {
            reason: DisconnectReason::GameFull,
        };
    }
    if room.state == RoomState::Started {
        return JoinOutcome::Refused {
            reason: DisconnectReason::GameStarted,
        };
    }

    let existing_members: Vec<ClientId> = room.members.clone();
    room.add_member(joiner_id);
    let host_id = room.host.expect("add_member always designates a host");

    let mut deliveries = Vec::new();
    let joined_for_others = GameMessage::JoinedGame {
        code: room.code,
        client_id: joiner_id.0,
        host_id: host_id.0,
        members: existing_members.iter().map(|m| m.0).collect(),
    };
    for member in &existing_members {
        if let Some(remote) = registry.find_remote_by_client_id(*member) {
            deliveries.push(Delivery {
                remote,
                children: vec![joined_for_others.clone()],
                reliable: true,
            });
        }
    }

    let mut all_members: Vec<u16> = existing_members.iter().map(|m| m.0).collect();
    all_members.push(joiner_id.0);
    deliveries.push(Delivery {
        remote: joiner_remote,
        children: vec![GameMessage::JoinedGame {
            code: room.code,
            client_id: joiner_id.0,
            host_id: host_id.0,
            members: all_members,
        }],
        reliable: true,
    });

    JoinOutcome::Joined { deliveries }
}

/// `true` if `children` is exactly one `Data` child for a net-object spawned
/// as `CustomNetworkTransform` - the one class whose updates must not
/// retransmit (§4.6 "Unreliable path"). `spawned_classes` maps net-id to the
/// class byte recorded from a prior `Spawn` (populated by the caller as it
/// observes `Spawn`/`Despawn` while relaying).
pub fn is_unreliable_movement(
    children: &[GameDataChild],
    spawned_classes: &std::collections::HashMap<u32, u8>,
) -> bool {
    match children {
        [GameDataChild::Data { net_id, .. }] => spawned_classes
            .get(net_id)
            .is_some_and(|class| *class == protocol::tags::CLASS_CUSTOM_NETWORK_TRANSFORM),
        _ => false,
    }
}

/// Gathers the room members (by remote address) that should receive a
/// broadcast, honoring `exclude` and an optional single `target` (§4.6
/// "Broadcast").
pub fn broadcast_targets(
    room: &Room,
    registry: &ConnectionRegistry,
    exclude: &[ClientId],
    target: Option<ClientId>,
) -> Vec<SocketAddr> {
    let candidates: Vec<ClientId> = match target {
        Some(single) => vec![single],
        None => room.members.clone(),
    };
    candidates
        .into_iter()
        .filter(|m| !exclude.contains(m))
        .filter_map(|m| registry.find_remote_by_client_id(m))
        .collect()
}

/// `GameDataTo(recipientId, children)`: forwarded to exactly the named
/// recipient if present in the room, otherwise silently dropped (§4.6
/// "Directed messages").
pub fn directed_target(room: &Room, registry: &ConnectionRegistry, recipient: ClientId) -> Option<SocketAddr> {
    if !room.members.contains(&recipient) {
        return None;
    }
    registry.find_remote_by_client_id(recipient)
}

/// Result of running the perspective two-phase relay for one sender's
/// `GameData` children (§4.6 "Perspectives", §9 "Perspective re-entrancy").
pub struct PerspectiveRelay {
    /// Children to broadcast to the base room (and other perspectives),
    /// excluding the sender.
    pub to_base: Vec<GameDataChild>,
    /// Children to broadcast inside the sender's own perspective, excluding
    /// the sender.
    pub to_perspective: Vec<GameDataChild>,
}

/// Runs the perspective relay for a sender currently inside perspective `p`.
/// When `optimizations.disablePerspectives` is set, or the sender has no
/// active perspective, callers should skip this and broadcast `children`
/// directly to the base room instead (§9 "Perspectives feature").
pub fn relay_through_perspective(room: &Room, sender: ClientId, children: Vec<GameDataChild>) -> PerspectiveRelay {
    let Some(perspective) = room.perspective_of(sender) else {
        return PerspectiveRelay {
            to_base: children.clone(),
            to_perspective: children,
        };
    };

    // Step 1: the perspective's internal decoder observes every child. No
    // built-in decoder cancels anything today (the plugin host that would is
    // out of scope, §1) - this is the hook point §9 describes.
    let not_canceled_in_step1 = children;

    // Step 2: run the outgoing filter against a fresh copy for the base-room
    // path - the two-phase semantics from §9 require independent copies so
    // cancellation in one phase never bleeds into the other.
    let to_base: Vec<GameDataChild> = not_canceled_in_step1
        .iter()
        .filter(|child| perspective.outgoing_filter.permits(child))
        .cloned()
        .collect();

    // Step 3: everything not canceled in step 1, regardless of step 2's
    // outcome, also goes to the rest of the perspective's own members.
    let to_perspective = not_canceled_in_step1;

    PerspectiveRelay {
        to_base,
        to_perspective,
    }
}

/// `GetGameList` (§4.6): scan every room but LOCAL, filter by keyword
/// equality, map-mask bit overlap, and impostor-count match (0 = no
/// preference), cap at 10.
pub fn game_list(
    rooms: &RoomRegistry,
    registry: &ConnectionRegistry,
    keyword: u32,
    map_mask: u8,
    impostor_count: u8,
) -> Vec<GameListEntry> {
    rooms
        .iter()
        .filter(|room| room.code != protocol::tags::RESERVED_ROOM_CODE)
        .filter(|room| room.state == RoomState::NotStarted)
        .filter(|room| room.settings.keyword == keyword)
        .filter(|room| room.settings.map_mask & map_mask != 0)
        .filter(|room| impostor_count == 0 || room.settings.impostor_count == impostor_count)
        .filter_map(|room| {
            let host = room.host?;
            let host_addr = registry.find_remote_by_client_id(host)?;
            let host_username = registry
                .find_by_client_id(host)
                .map(|c| c.username.clone())
                .unwrap_or_default();
            Some(GameListEntry {
                code: room.code,
                host_addr,
                host_username,
                player_count: room.members.len() as u8,
                age_seconds: room.created_at.elapsed().as_secs() as u32,
                map_mask: room.settings.map_mask,
                impostor_count: room.settings.impostor_count,
                max_players: room.settings.max_players,
            })
        })
        .take(GAME_LIST_CAP)
        .collect()
}

/// Host-only root messages (§4.6 "Host-only root messages"): `AlterGame`,
/// `StartGame`, `EndGame`, `KickPlayer` must originate from the sender's
/// room's current host.
pub fn is_host_only(message: &GameMessage) -> bool {
    matches!(
        message,
        GameMessage::AlterGame { .. }
            | GameMessage::StartGame { .. }
            | GameMessage::EndGame { .. }
            | GameMessage::KickPlayer { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::GameSettings;
    use std::net::SocketAddr;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn join_refused_when_room_full() {
        let mut room = Room::new(1, GameSettings { max_players: 1, ..Default::default() });
        let mut registry = ConnectionRegistry::new();
        let first = registry.get_or_create(addr(1)).client_id;
        room.add_member(first);

        let outcome = join_room(&mut room, &registry, addr(2), ClientId(2));
        assert!(matches!(
            outcome,
            JoinOutcome::Refused {
                reason: DisconnectReason::GameFull
            }
        ));
    }

    #[test]
    fn join_refused_when_started() {
        let mut room = Room::new(1, GameSettings::default());
        room.state = RoomState::Started;
        let registry = ConnectionRegistry::new();
        let outcome = join_room(&mut room, &registry, addr(2), ClientId(2));
        assert!(matches!(
            outcome,
            JoinOutcome::Refused {
                reason: DisconnectReason::GameStarted
            }
        ));
    }

    #[test]
    fn join_success_notifies_existing_members_and_full_list_to_joiner() {
        let mut room = Room::new(1, GameSettings::default());
        let mut registry = ConnectionRegistry::new();
        let existing = registry.get_or_create(addr(1)).client_id;
        room.add_member(existing);

        let joiner_remote = addr(2);
        let joiner_id = ClientId(2);
        let outcome = join_room(&mut room, &registry, joiner_remote, joiner_id);
        match outcome {
            JoinOutcome::Joined { deliveries } => {
                assert_eq!(deliveries.len(), 2);
                let to_joiner = deliveries
                    .iter()
                    .find(|d| d.remote == joiner_remote)
                    .unwrap();
                match &to_joiner.children[0] {
                    GameMessage::JoinedGame { members, .. } => assert_eq!(members.len(), 2),
                    _ => panic!("expected JoinedGame"),
                }
            }
            JoinOutcome::Refused { .. } => panic!("expected success"),
        }
    }

    #[test]
    fn directed_message_dropped_when_recipient_absent() {
        let room = Room::new(1, GameSettings::default());
        let registry = ConnectionRegistry::new();
        assert!(directed_target(&room, &registry, ClientId(5)).is_none());
    }

    #[test]
    fn unreliable_movement_detected_only_for_custom_network_transform() {
        let mut spawned = std::collections::HashMap::new();
        spawned.insert(1u32, protocol::tags::CLASS_CUSTOM_NETWORK_TRANSFORM);
        spawned.insert(2u32, 9);

        let movement = vec![GameDataChild::Data {
            net_id: 1,
            payload: bytes::Bytes::new(),
        }];
        assert!(is_unreliable_movement(&movement, &spawned));

        let other_class = vec![GameDataChild::Data {
            net_id: 2,
            payload: bytes::Bytes::new(),
        }];
        assert!(!is_unreliable_movement(&other_class, &spawned));

        let multi = vec![
            GameDataChild::Data { net_id: 1, payload: bytes::Bytes::new() },
            GameDataChild::Despawn { net_id: 1 },
        ];
        assert!(!is_unreliable_movement(&multi, &spawned));
    }

    #[test]
    fn perspective_outgoing_filter_splits_base_and_perspective_views() {
        use crate::room::{OutgoingFilter, Perspective};

        let mut room = Room::new(1, GameSettings::default());
        room.add_member(ClientId(1));
        room.add_member(ClientId(2));
        let mut perspective = Perspective::new(1);
        perspective.members.insert(ClientId(1));
        perspective.members.insert(ClientId(2));
        let mut filter = OutgoingFilter::default();
        filter.blocked_rpc_call_ids.insert(42);
        perspective.outgoing_filter = filter;
        room.perspectives.push(perspective);

        let blocked = GameDataChild::Rpc {
            net_id: 1,
            call_id: 42,
            payload: protocol::RpcPayload::Opaque(bytes::Bytes::new()),
        };
        let normal = GameDataChild::Rpc {
            net_id: 1,
            call_id: 1,
            payload: protocol::RpcPayload::Opaque(bytes::Bytes::new()),
        };

        let relay = relay_through_perspective(&room, ClientId(1), vec![blocked, normal.clone()]);
        assert_eq!(relay.to_base, vec![normal.clone()]);
        assert_eq!(relay.to_perspective.len(), 2);
    }

    #[test]
    fn game_list_excludes_reserved_code_and_started_rooms() {
        let mut rooms = RoomRegistry::new();
        let mut registry = ConnectionRegistry::new();
        let host_a = registry.get_or_create(addr(1)).client_id;
        let host_b = registry.get_or_create(addr(2)).client_id;

        rooms
            .create_room(protocol::tags::RESERVED_ROOM_CODE, GameSettings::default())
            .unwrap();
        rooms.get_mut(protocol::tags::RESERVED_ROOM_CODE).unwrap().host = Some(host_a);

        rooms.create_room(5, GameSettings::default()).unwrap();
        rooms.get_mut(5).unwrap().host = Some(host_a);
        rooms.get_mut(5).unwrap().state = RoomState::Started;

        rooms.create_room(6, GameSettings::default()).unwrap();
        rooms.get_mut(6).unwrap().host = Some(host_b);

        let entries = game_list(&rooms, &registry, 0, 0xff, 0);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].code, 6);
    }

    #[test]
    fn host_only_messages_are_identified() {
        assert!(is_host_only(&GameMessage::StartGame { code: 1 }));
        assert!(!is_host_only(&GameMessage::JoinGame { code: 1 }));
    }
}
