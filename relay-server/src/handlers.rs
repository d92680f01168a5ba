//! Root-message routing (§4): ties the codec, reliability layer,
//! handshake state machine, and room relay together. Styled after the
//! teacher's `processing_module::handle_server_logic`/`handle_client_logic`
//! dispatch-by-tag idiom.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use protocol::{Direction, DisconnectReason, GameDataChild, GameMessage, PluginModEntry, RootPacket};
use tracing::{info, warn};

use crate::commands::CallError;
use crate::config::ServerConfig;
use crate::connection::{ClientId, ConnectionRegistry, ModDeclaration};
use crate::errors::RelayError;
use crate::handshake::{self, HandshakeAction};
use crate::operator::PluginRegistry;
use crate::relay::{self, JoinOutcome};
use crate::room::RoomRegistry;
use crate::{commands::CommandTable, reliability};

/// Everything a single event-loop iteration needs. Owned by `main.rs`, one
/// instance per process (§5: single-threaded cooperative loop, no locking
/// needed since handlers never run concurrently with each other).
pub struct AppState {
    pub connections: ConnectionRegistry,
    pub rooms: RoomRegistry,
    pub commands: CommandTable,
    pub plugins: PluginRegistry,
    /// Per-room net-id -> spawned class, used to classify the unreliable
    /// movement path (§4.6).
    pub spawned_classes: HashMap<i32, HashMap<u32, u8>>,
}

impl Default for AppState {
    fn default() -> Self {
        AppState {
            connections: ConnectionRegistry::new(),
            rooms: RoomRegistry::new(),
            commands: CommandTable::new(),
            plugins: PluginRegistry::new(),
            spawned_classes: HashMap::new(),
        }
    }
}

impl AppState {
    fn plugin_mods(&self) -> Vec<PluginModEntry> {
        self.plugins
            .iter()
            .enumerate()
            .map(|(i, plugin)| PluginModEntry {
                net_id: i as u16,
                mod_id: plugin.id.clone(),
                version: "1.0.0".into(),
            })
            .collect()
    }

    /// Detaches a connection from its room, if any, running host election
    /// and logging the `ClientLeave` event (§4.3).
    fn leave_room(&mut self, client_id: ClientId, room_code: i32) {
        if let Some(room) = self.rooms.get_mut(room_code) {
            let elected_new_host = room.remove_member(client_id);
            info!(%client_id, room_code, "client left room");
            if elected_new_host {
                info!(room_code, new_host = ?room.host, "host re-elected after departure");
            }
            if room.members.is_empty() {
                self.rooms.remove(room_code);
                info!(room_code, "room destroyed (empty)");
            }
        }
    }
}

/// Processes one inbound datagram, returning the raw bytes to send back out
/// (recipient, payload) pairs. Malformed/unrecognized datagrams are logged
/// and produce no output (§7).
pub fn handle_datagram(
    state: &mut AppState,
    config: &ServerConfig,
    remote: SocketAddr,
    data: &[u8],
) -> Vec<(SocketAddr, Bytes)> {
    let root = match protocol::parse(data, Direction::Serverbound) {
        Ok(root) => root,
        Err(err) => {
            let err = RelayError::Malformed(remote, err);
            warn!(%err, "dropping datagram");
            return Vec::new();
        }
    };

    match root {
        RootPacket::Hello { nonce, hello } => {
            let mut out = ack_for(remote, nonce);
            let conn = state.connections.get_or_create(remote);
            conn.username = hello.username;
            conn.language = hello.language;
            conn.client_version = hello.client_version;
            match handshake::on_hello(conn, config) {
                HandshakeAction::Disconnect(reason) => {
                    out.push((remote, disconnect_bytes(Some(reason))));
                    state.connections.remove(&remote);
                }
                _ => info!(%remote, "hello accepted"),
            }
            out
        }
        RootPacket::HelloMod {
            nonce,
            hello,
            mod_count,
        } => {
            let mut out = ack_for(remote, nonce);
            let plugin_mods = state.plugin_mods();
            let conn = state.connections.get_or_create(remote);
            conn.username = hello.username;
            conn.language = hello.language;
            conn.client_version = hello.client_version;
            match handshake::on_hello_mod(conn, config, mod_count, &plugin_mods) {
                HandshakeAction::Disconnect(reason) => {
                    out.push((remote, disconnect_bytes(Some(reason))));
                    state.connections.remove(&remote);
                }
                HandshakeAction::SendHandshakeAck(chunks) => {
                    for chunk in chunks {
                        let bytes = reliability::send_reliable(
                            conn,
                            vec![GameMessage::HandshakeAck { mods: chunk }],
                            Direction::Clientbound,
                        );
                        out.push((remote, bytes));
                    }
                }
                _ => {}
            }
            out
        }
        RootPacket::Ping { nonce } => ack_for(remote, nonce),
        RootPacket::Acknowledge { nonce, .. } => {
            if let Some(conn) = state.connections.get_mut(&remote) {
                if let Some(rtt) = reliability::on_acknowledge(conn, nonce) {
                    info!(%remote, nonce, rtt_ms = rtt.as_millis() as u64, "acked");
                }
            }
            Vec::new()
        }
        RootPacket::Disconnect { reason } => {
            info!(%remote, ?reason, "client disconnected");
            if let Some(conn) = state.connections.remove(&remote) {
                if let Some(room_code) = conn.room {
                    state.leave_room(conn.client_id, room_code);
                }
            }
            Vec::new()
        }
        RootPacket::Reliable { nonce, children } => {
            let quirk = reliability::is_nonce_zero_quirk(&RootPacket::Reliable {
                nonce,
                children: children.clone(),
            });
            let mut out = ack_for(remote, nonce);
            let should_process = state
                .connections
                .get_mut(&remote)
                .map(|conn| conn.accept_nonce(nonce, quirk))
                .unwrap_or(false);
            if should_process {
                for child in children {
                    out.extend(handle_game_message(state, config, remote, child));
                }
            }
            out
        }
    }
}

/// Every nonce-bearing root packet is acked immediately, whether or not it
/// turns out to be a duplicate (§4.2 "Receiving", §8 scenario 2).
fn ack_for(remote: SocketAddr, nonce: u16) -> Vec<(SocketAddr, Bytes)> {
    vec![(remote, reliability::build_acknowledge(nonce))]
}

fn disconnect_bytes(reason: Option<DisconnectReason>) -> Bytes {
    protocol::write(&RootPacket::Disconnect { reason }, Direction::Clientbound).freeze()
}

fn handle_game_message(
    state: &mut AppState,
    config: &ServerConfig,
    remote: SocketAddr,
    message: GameMessage,
) -> Vec<(SocketAddr, Bytes)> {
    let Some(client_id) = state.connections.get(&remote).map(|c| c.client_id) else {
        return Vec::new();
    };

    if relay::is_host_only(&message) {
        let sender_room = state.connections.get(&remote).and_then(|c| c.room);
        let is_host = sender_room
            .and_then(|code| state.rooms.get(code))
            .is_some_and(|room| room.is_host(client_id));
        if !is_host {
            let err = RelayError::ProtocolViolation(remote, DisconnectReason::Hacking);
            warn!(%err, ?message, "host-only message from non-host, disconnecting");
            state.connections.remove(&remote);
            return vec![(remote, disconnect_bytes(err.disconnect_reason().cloned()))];
        }
    }

    match message {
        GameMessage::HostGame { settings } => {
            let scheme = config.rooms.game_codes;
            let code = state.rooms.generate_code(scheme);
            if state.rooms.create_room(code, settings).is_ok() {
                info!(%remote, room_code = code, "room created");
            }
            Vec::new()
        }
        GameMessage::JoinGame { code } => {
            let host_mods: Option<Vec<ModDeclaration>> = state
                .rooms
                .get(code)
                .and_then(|room| room.host)
                .and_then(|host_id| state.connections.find_by_client_id(host_id))
                .map(|host_conn| host_conn.mods.clone());

            let joiner_ok = state
                .connections
                .get(&remote)
                .map(|conn| handshake::validate_join(conn, config, host_mods.as_deref()))
                .unwrap_or(Err(DisconnectReason::Custom("connection missing".into())));

            if let Err(reason) = joiner_ok {
                return vec![(remote, disconnect_bytes(Some(reason)))];
            }

            let Some(room) = state.rooms.get_mut(code) else {
                return vec![(remote, disconnect_bytes(Some(DisconnectReason::GameNotFound)))];
            };

            match relay::join_room(room, &state.connections, remote, client_id) {
                JoinOutcome::Refused { reason } => {
                    vec![(remote, disconnect_bytes(Some(reason)))]
                }
                JoinOutcome::Joined { deliveries } => {
                    if let Some(conn) = state.connections.get_mut(&remote) {
                        conn.room = Some(code);
                    }
                    deliveries
                        .into_iter()
                        .filter_map(|delivery| {
                            let conn = state.connections.get_mut(&delivery.remote)?;
                            Some((
                                delivery.remote,
                                reliability::send_reliable(conn, delivery.children, Direction::Clientbound),
                            ))
                        })
                        .collect()
                }
            }
        }
        GameMessage::StartGame { code } => with_room_broadcast(state, remote, code, vec![GameMessage::StartGame { code }], |room| {
            room.state = crate::room::RoomState::Started;
        }),
        GameMessage::EndGame { code } => with_room_broadcast(state, remote, code, vec![GameMessage::EndGame { code }], |room| {
            room.state = crate::room::RoomState::Ended;
        }),
        GameMessage::AlterGame { code, settings } => {
            let msg = GameMessage::AlterGame { code, settings: settings.clone() };
            with_room_broadcast(state, remote, code, vec![msg], move |room| {
                room.settings = settings;
            })
        }
        GameMessage::KickPlayer { code, client_id: target, banned } => {
            if state.rooms.get(code).is_none() {
                return Vec::new();
            }
            let Some(target_remote) = state.connections.find_remote_by_client_id(ClientId(target)) else {
                return Vec::new();
            };
            if let Some(room) = state.rooms.get_mut(code) {
                room.remove_member(ClientId(target));
                if banned {
                    room.bans.insert(target_remote.ip());
                }
            }
            state.connections.remove(&target_remote);
            info!(room_code = code, target, banned, "player kicked");
            vec![(target_remote, disconnect_bytes(Some(DisconnectReason::Banned)))]
        }
        GameMessage::GameData { code, children } => handle_game_data(state, config, remote, client_id, code, children, None),
        GameMessage::GameDataTo { code, recipient, children } => {
            handle_game_data(state, config, remote, client_id, code, children, Some(ClientId(recipient)))
        }
        GameMessage::GetGameList { keyword, map_mask, impostor_count } => {
            let entries = relay::game_list(&state.rooms, &state.connections, keyword, map_mask, impostor_count);
            let Some(conn) = state.connections.get_mut(&remote) else {
                return Vec::new();
            };
            let bytes = reliability::send_reliable(conn, vec![GameMessage::GameList { entries }], Direction::Clientbound);
            vec![(remote, bytes)]
        }
        GameMessage::RemoveGame { code } => {
            state.rooms.remove(code);
            info!(room_code = code, "room removed");
            Vec::new()
        }
        // Clientbound-only variants never arrive serverbound.
        GameMessage::JoinError { .. }
        | GameMessage::JoinedGame { .. }
        | GameMessage::GameList { .. }
        | GameMessage::HandshakeAck { .. } => Vec::new(),
    }
}

fn with_room_broadcast(
    state: &mut AppState,
    sender: SocketAddr,
    code: i32,
    children: Vec<GameMessage>,
    apply: impl FnOnce(&mut crate::room::Room),
) -> Vec<(SocketAddr, Bytes)> {
    let Some(room) = state.rooms.get_mut(code) else {
        return Vec::new();
    };
    apply(room);
    let sender_id = state.connections.get(&sender).map(|c| c.client_id);
    let targets = relay::broadcast_targets(room, &state.connections, sender_id.as_slice(), None);
    targets
        .into_iter()
        .filter_map(|target| {
            let conn = state.connections.get_mut(&target)?;
            Some((
                target,
                reliability::send_reliable(conn, children.clone(), Direction::Clientbound),
            ))
        })
        .collect()
}

fn handle_game_data(
    state: &mut AppState,
    _config: &ServerConfig,
    sender_remote: SocketAddr,
    sender_id: ClientId,
    code: i32,
    children: Vec<GameDataChild>,
    directed_to: Option<ClientId>,
) -> Vec<(SocketAddr, Bytes)> {
    // Track Spawn/Despawn so the unreliable-movement classification (§4.6)
    // has data to work with.
    let class_map = state.spawned_classes.entry(code).or_default();
    for child in &children {
        match child {
            GameDataChild::Spawn { net_id, class } => {
                class_map.insert(*net_id, *class);
            }
            GameDataChild::Despawn { net_id } => {
                class_map.remove(net_id);
            }
            _ => {}
        }
    }

    // Chat: a canceled Rpc carrying a leading "/" is a command, dispatched
    // and never relayed (§4.7). ModDeclaration sub-messages (§4.4, usually
    // riding the nonce-0 quirk) feed the handshake state machine instead of
    // being relayed as game data.
    let mut relayed_children = Vec::with_capacity(children.len());
    let mut command_replies: Vec<String> = Vec::new();
    for child in children {
        if let GameDataChild::ModDeclaration { net_id, mod_id, version, side } = child {
            if let Some(conn) = state.connections.get_mut(&sender_remote) {
                handshake::on_mod_declaration(
                    conn,
                    ModDeclaration { net_id, mod_id, version, side },
                );
            }
            continue;
        }
        if let GameDataChild::Rpc {
            call_id,
            payload: protocol::RpcPayload::SendChat { text, .. },
            ..
        } = &child
        {
            if *call_id == protocol::tags::RPC_CALL_SEND_CHAT {
                if let Some(rest) = text.strip_prefix('/') {
                    let tokens = crate::commands::tokenize(rest);
                    if let Some(name) = tokens.first().cloned() {
                        let replies = state
                            .commands
                            .dispatch(&name, &tokens[1..], code, sender_id, text);
                        command_replies.extend(replies);
                    }
                    continue;
                }
            }
        }
        relayed_children.push(child);
    }

    let mut out = Vec::new();

    for reply in command_replies {
        if let Some(conn) = state.connections.get_mut(&sender_remote) {
            let bytes = reliability::send_reliable(
                conn,
                vec![GameMessage::GameData {
                    code,
                    children: vec![GameDataChild::Rpc {
                        net_id: 0,
                        call_id: protocol::tags::RPC_CALL_SEND_CHAT,
                        payload: protocol::RpcPayload::SendChat {
                            text: reply,
                            side: protocol::ChatSide::Left,
                        },
                    }],
                }],
                Direction::Clientbound,
            );
            out.push((sender_remote, bytes));
        }
    }

    if relayed_children.is_empty() {
        return out;
    }

    let Some(room) = state.rooms.get(code) else {
        return out;
    };

    if let Some(target_id) = directed_to {
        if let Some(target_remote) = relay::directed_target(room, &state.connections, target_id) {
            if let Some(conn) = state.connections.get_mut(&target_remote) {
                let bytes = reliability::send_reliable(
                    conn,
                    vec![GameMessage::GameDataTo {
                        code,
                        recipient: target_id.0,
                        children: relayed_children,
                    }],
                    Direction::Clientbound,
                );
                out.push((target_remote, bytes));
            }
        }
        return out;
    }

    let unreliable = relay::is_unreliable_movement(&relayed_children, class_map);
    let relay::PerspectiveRelay { to_base, to_perspective } =
        relay::relay_through_perspective(room, sender_id, relayed_children);

    let mut exclude = vec![sender_id];
    if let Some(perspective) = room.perspective_of(sender_id) {
        exclude.extend(perspective.members.iter().copied());
    }
    let base_targets = relay::broadcast_targets(room, &state.connections, &exclude, None);
    for target in base_targets {
        if let Some(conn) = state.connections.get_mut(&target) {
            let msg = vec![GameMessage::GameData { code, children: to_base.clone() }];
            let bytes = if unreliable {
                reliability::send_unreliable(conn, msg, Direction::Clientbound)
            } else {
                reliability::send_reliable(conn, msg, Direction::Clientbound)
            };
            out.push((target, bytes));
        }
    }

    if let Some(perspective) = state
        .rooms
        .get(code)
        .and_then(|room| room.perspective_of(sender_id))
    {
        let perspective_targets: Vec<SocketAddr> = perspective
            .members
            .iter()
            .filter(|m| **m != sender_id)
            .filter_map(|m| state.connections.find_remote_by_client_id(*m))
            .collect();
        for target in perspective_targets {
            if let Some(conn) = state.connections.get_mut(&target) {
                let bytes = reliability::send_reliable(
                    conn,
                    vec![GameMessage::GameData { code, children: to_perspective.clone() }],
                    Direction::Clientbound,
                );
                out.push((target, bytes));
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_handshake_completes_with_reactor_disabled() {
        let mut state = AppState::default();
        let config = ServerConfig::default();
        let remote: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let packet = RootPacket::Hello {
            nonce: 1,
            hello: protocol::HelloInfo {
                username: "carl".into(),
                language: "en".into(),
                client_version: "1.0".into(),
            },
        };
        let bytes = protocol::write(&packet, Direction::Serverbound);
        let out = handle_datagram(&mut state, &config, remote, &bytes);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, remote);
        assert_eq!(
            state.connections.get(&remote).unwrap().handshake,
            crate::handshake::HandshakeState::Ready
        );
    }

    #[test]
    fn malformed_packet_is_dropped_without_panicking() {
        let mut state = AppState::default();
        let config = ServerConfig::default();
        let remote: SocketAddr = "127.0.0.1:2".parse().unwrap();
        let out = handle_datagram(&mut state, &config, remote, &[0xfe]);
        assert!(out.is_empty());
    }

    #[test]
    fn non_host_start_game_is_disconnected_with_hacking_reason() {
        let mut state = AppState::default();
        let config = ServerConfig::default();
        let remote: SocketAddr = "127.0.0.1:3".parse().unwrap();
        let conn = state.connections.get_or_create(remote);
        conn.handshake = crate::handshake::HandshakeState::Ready;
        conn.room = Some(42);
        state.rooms.create_room(42, protocol::GameSettings::default()).unwrap();
        // Host is some other (non-existent) client id, so this sender is not host.
        state.rooms.get_mut(42).unwrap().host = Some(ClientId(999));

        let out = handle_game_message(&mut state, &config, remote, GameMessage::StartGame { code: 42 });
        assert_eq!(out.len(), 1);
        assert!(state.connections.get(&remote).is_none());
    }
}
