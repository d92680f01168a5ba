//! Wire tags for the root packet family and the nested message families.
//!
//! Layout: every datagram starts with a one-byte root tag. `Reliable` and
//! both hello variants additionally carry a 2-byte big-endian nonce right
//! after the tag. Children of `Reliable` are themselves tagged and framed
//! Hazel-style (2-byte little-endian length, 1-byte tag, payload) - see
//! [`crate::packet::write_hazel_frame`].

// Root tags.
pub const ROOT_RELIABLE: u8 = 0;
pub const ROOT_HELLO: u8 = 1;
pub const ROOT_HELLO_MOD: u8 = 2;
pub const ROOT_DISCONNECT: u8 = 3;
pub const ROOT_ACKNOWLEDGE: u8 = 4;
pub const ROOT_PING: u8 = 5;

// Children of `Reliable`.
pub const GAME_HOST_GAME: u8 = 0;
pub const GAME_JOIN_GAME: u8 = 1;
pub const GAME_START_GAME: u8 = 2;
pub const GAME_END_GAME: u8 = 4;
pub const GAME_ALTER_GAME: u8 = 10;
pub const GAME_KICK_PLAYER: u8 = 5;
pub const GAME_DATA: u8 = 6;
pub const GAME_DATA_TO: u8 = 7;
pub const GAME_GET_GAME_LIST: u8 = 9;
pub const GAME_REMOVE_GAME: u8 = 11;
pub const GAME_JOIN_ERROR: u8 = 12;
pub const GAME_JOINED_GAME: u8 = 13;
pub const GAME_GAME_LIST: u8 = 14;
pub const GAME_HANDSHAKE_ACK: u8 = 15;
pub const GAME_MOD_LIST: u8 = 16;

// Children nested inside `GameData`/`GameDataTo` - one net-object action each.
pub const DATA_RPC: u8 = 0;
pub const DATA_DESPAWN: u8 = 1;
pub const DATA_SPAWN: u8 = 2;
pub const DATA_DATA: u8 = 3;
pub const DATA_SCENE_CHANGE: u8 = 4;
pub const DATA_READY_UP: u8 = 5;
pub const DATA_CLIENT_INFO: u8 = 6;
pub const DATA_MOD_DECLARATION: u8 = 0xff;
// Anything else decodes to `UnknownGameData`, tag recorded verbatim.

/// RPC call-id understood by the chat dispatcher. All others are forwarded
/// opaque since the server does not simulate gameplay.
pub const RPC_CALL_SEND_CHAT: u8 = 2;

/// Reserved object class carried in [`crate::packet::Spawn`] that marks a
/// net-object whose `Data` messages must travel unreliably (movement).
pub const CLASS_CUSTOM_NETWORK_TRANSFORM: u8 = 1;

/// The reserved room code ("LOCAL") that is never allocated or listed.
pub const RESERVED_ROOM_CODE: i32 = 0x20;
